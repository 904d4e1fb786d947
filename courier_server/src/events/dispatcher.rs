use courier_core::{
  Channel, DeliveryRecord, EventEnvelope, RenderedContent, TenantBranding, Template,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::registry::{HandlerRegistry, RecipientSpec, Route};
use crate::cache::BrandingCache;
use crate::queue::DeliveryQueue;
use crate::render;
use crate::store::{resolve_or_seed, DeviceStore, TemplateStore};

#[derive(Error, Debug)]
pub enum DispatchError {
  /// No handler claims the event type; the consumer commits and moves on
  #[error("no handler registered for event type")]
  Unhandled,

  /// Permanent problem (template miss, schema error): commit + dead-letter
  #[error("non-retriable dispatch failure: {0}")]
  NonRetriable(String),

  /// Transient problem (store unavailable): leave uncommitted for redelivery
  #[error("retriable dispatch failure: {0}")]
  Retriable(String),
}

#[derive(Debug, Default, PartialEq)]
pub struct DispatchSummary {
  pub enqueued: usize,
  /// Records skipped by the idempotency key on event redelivery
  pub duplicates: usize,
}

/// Turns one validated event into delivery records: handler lookup, context
/// and branding enrichment, template resolution, rendering, and enqueue.
pub struct EventDispatcher {
  registry: HandlerRegistry,
  templates: Arc<dyn TemplateStore>,
  branding: Arc<BrandingCache>,
  devices: Arc<dyn DeviceStore>,
  queue: Arc<DeliveryQueue>,
  max_retries: u32,
}

impl EventDispatcher {
  pub fn new(
    registry: HandlerRegistry,
    templates: Arc<dyn TemplateStore>,
    branding: Arc<BrandingCache>,
    devices: Arc<dyn DeviceStore>,
    queue: Arc<DeliveryQueue>,
    max_retries: u32,
  ) -> Self {
    Self {
      registry,
      templates,
      branding,
      devices,
      queue,
      max_retries,
    }
  }

  pub fn registry(&self) -> &HandlerRegistry {
    &self.registry
  }

  pub async fn dispatch(&self, envelope: &EventEnvelope) -> Result<DispatchSummary, DispatchError> {
    let handler = self
      .registry
      .get(&envelope.event_type)
      .ok_or(DispatchError::Unhandled)?;

    let branding = self.branding.get_or_fallback(&envelope.tenant_id).await;
    let context = handler.context(envelope, &branding);
    let routes = handler.routes(envelope);

    if routes.is_empty() {
      debug!(event_type = %envelope.event_type, "handler produced no routes");
      return Ok(DispatchSummary::default());
    }

    let mut summary = DispatchSummary::default();
    let mut template_misses = 0usize;

    for route in routes {
      let template_name = handler.template_name(&envelope.event_type, route.channel);
      let template = resolve_or_seed(
        self.templates.as_ref(),
        &envelope.tenant_id,
        &template_name,
        route.channel,
      )
      .await
      .map_err(|e| DispatchError::Retriable(e.to_string()))?;

      let Some(template) = template else {
        warn!(
          tenant = %envelope.tenant_id,
          template = %template_name,
          channel = %route.channel,
          "no template for route"
        );
        template_misses += 1;
        continue;
      };

      let recipients = self
        .expand_recipients(envelope, &route)
        .await
        .map_err(DispatchError::Retriable)?;
      if recipients.is_empty() {
        debug!(channel = %route.channel, "route resolved to no recipients");
        continue;
      }

      let content = render_for_channel(&template, &context, route.channel, &branding);

      for recipient in recipients {
        let record = DeliveryRecord {
          max_retries: self.max_retries,
          ..DeliveryRecord::new(
            envelope.tenant_id.clone(),
            route.channel,
            recipient,
            content.clone(),
            Value::Object(context.clone()),
          )
        }
        .with_event_id(envelope.metadata.event_id.clone());

        match self.queue.enqueue(record).await {
          Ok(true) => summary.enqueued += 1,
          Ok(false) => summary.duplicates += 1,
          Err(e) => return Err(DispatchError::Retriable(e.to_string())),
        }
      }
    }

    // All routes dead-ended on missing templates: a permanent miss
    if summary.enqueued == 0 && summary.duplicates == 0 && template_misses > 0 {
      return Err(DispatchError::NonRetriable(format!(
        "no template for any route of {}",
        envelope.event_type
      )));
    }

    Ok(summary)
  }

  async fn expand_recipients(
    &self,
    envelope: &EventEnvelope,
    route: &Route,
  ) -> Result<Vec<String>, String> {
    match &route.recipient {
      RecipientSpec::Address(address) => Ok(vec![address.clone()]),
      RecipientSpec::User(user_id) => Ok(vec![user_id.to_string()]),
      RecipientSpec::UserDevices(user_id) => self
        .devices
        .active_tokens(&envelope.tenant_id, *user_id)
        .await
        .map_err(|e| e.to_string()),
    }
  }
}

/// Render the content snapshot for one channel. Email bodies additionally
/// get the branded HTML shell, carried alongside the raw body in `data`.
pub fn render_for_channel(
  template: &Template,
  context: &Map<String, Value>,
  channel: Channel,
  branding: &TenantBranding,
) -> RenderedContent {
  let mut content = render::render(template, context);

  if channel == Channel::Email {
    let html = render::wrap_email_body(&content.body, branding);
    match content.data {
      Some(Value::Object(ref mut map)) => {
        map.insert("html".into(), Value::String(html));
      }
      _ => {
        let mut map = Map::new();
        map.insert("html".into(), Value::String(html));
        content.data = Some(Value::Object(map));
      }
    }
  }

  content
}
