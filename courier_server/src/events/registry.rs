use courier_core::{Channel, EventEnvelope, TenantBranding, UserId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::handlers::{ApplicationHandler, AuthHandler, DocumentHandler, SecurityHandler};

/// Where a routed message goes; push targets expand to the user's active
/// device tokens at dispatch time
#[derive(Debug, Clone, PartialEq)]
pub enum RecipientSpec {
  /// A concrete address from the payload (email address, phone number)
  Address(String),
  /// An in-app recipient, addressed by user id
  User(UserId),
  /// All active device tokens registered for the user
  UserDevices(UserId),
}

#[derive(Debug, Clone)]
pub struct Route {
  pub channel: Channel,
  pub recipient: RecipientSpec,
}

impl Route {
  pub fn new(channel: Channel, recipient: RecipientSpec) -> Self {
    Self { channel, recipient }
  }
}

/// Type-specific event handler.
///
/// Handlers are pure with respect to the event plus tenant branding; all
/// side effects flow through the delivery queue.
pub trait EventHandler: Send + Sync {
  /// Exact event types this handler claims
  fn event_types(&self) -> &'static [&'static str];

  /// Channel selection and recipient resolution for one event
  fn routes(&self, event: &EventEnvelope) -> Vec<Route>;

  /// Build the render context from the payload and tenant branding
  fn context(&self, event: &EventEnvelope, branding: &TenantBranding) -> Map<String, Value> {
    base_context(event, branding)
  }

  /// Template name for a `(event type, channel)` pair
  fn template_name(&self, event_type: &str, _channel: Channel) -> String {
    event_type.to_string()
  }
}

/// Explicit handler registry, constructed at init and passed by reference
/// into the consumer.
#[derive(Default)]
pub struct HandlerRegistry {
  handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the built-in handler families installed
  pub fn with_builtin_handlers() -> Self {
    let mut registry = Self::new();
    registry.register(Arc::new(AuthHandler));
    registry.register(Arc::new(SecurityHandler));
    registry.register(Arc::new(ApplicationHandler));
    registry.register(Arc::new(DocumentHandler));
    registry
  }

  pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
    for event_type in handler.event_types() {
      self.handlers.insert(event_type, handler.clone());
    }
  }

  /// Exact-match lookup by event type
  pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
    self.handlers.get(event_type)
  }

  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }
}

/// Shared context builder: scalar payload fields, the event timestamp, and
/// the branding values templates and the email shell rely on.
pub fn base_context(event: &EventEnvelope, branding: &TenantBranding) -> Map<String, Value> {
  let mut context = Map::new();

  for (key, value) in &event.payload {
    if !value.is_object() && !value.is_array() {
      context.insert(key.clone(), value.clone());
    }
  }

  context.insert("occurred_at".into(), Value::String(event.timestamp.to_rfc3339()));
  context.insert("tenant_name".into(), Value::String(branding.name.clone()));
  if let Some(logo_url) = &branding.logo_url {
    context.insert("logo_url".into(), Value::String(logo_url.clone()));
  }

  context
}

/// Payload user-id fields arrive as numbers or strings depending on the
/// producer; accept both.
pub fn payload_user_id(payload: &Map<String, Value>, key: &str) -> Option<UserId> {
  match payload.get(key)? {
    Value::Number(n) => n.as_i64().map(UserId),
    Value::String(s) => s.parse().ok().map(UserId),
    _ => None,
  }
}
