use async_nats::jetstream::{self, consumer::PullConsumer};
use courier_core::EventEnvelope;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::dispatcher::{DispatchError, EventDispatcher};
use crate::config::MessagingConfig;
use crate::observability::metrics::ConsumerMetrics;

const CONNECT_MAX_RETRIES: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Connect to the event log with bounded retry and reconnect options.
pub async fn connect_with_retry(url: &str) -> anyhow::Result<async_nats::Client> {
  let mut retries = 0;

  loop {
    info!("connecting to event log: {}", url);

    let options = async_nats::ConnectOptions::new()
      .connection_timeout(Duration::from_secs(10))
      .ping_interval(Duration::from_secs(30))
      .max_reconnects(Some(10));

    match options.connect(url).await {
      Ok(client) => {
        info!("connected to event log: {}", url);
        return Ok(client);
      }
      Err(e) => {
        retries += 1;
        if retries >= CONNECT_MAX_RETRIES {
          error!("failed to connect to event log after {} retries: {}", retries, e);
          return Err(e.into());
        }
        warn!(
          "event log connection failed (attempt {}/{}): {}; retrying in {:?}",
          retries, CONNECT_MAX_RETRIES, e, CONNECT_RETRY_DELAY
        );
        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
      }
    }
  }
}

/// Reads the event log, validates envelopes and feeds the dispatcher.
///
/// Commit semantics follow the at-least-once contract: success, unknown
/// event type and permanent failures ack; retriable failures leave the
/// message unacked so the log redelivers it.
pub struct EventConsumer {
  client: async_nats::Client,
  dispatcher: Arc<EventDispatcher>,
  config: MessagingConfig,
}

impl EventConsumer {
  pub fn new(
    client: async_nats::Client,
    dispatcher: Arc<EventDispatcher>,
    config: MessagingConfig,
  ) -> Self {
    Self {
      client,
      dispatcher,
      config,
    }
  }

  /// Spawn one consumer task per configured topic, all in the same durable
  /// consumer group.
  pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(self.config.topics.len());

    for topic in self.config.topics.clone() {
      let consumer = self.clone();
      let token = shutdown.clone();
      handles.push(tokio::spawn(async move {
        if let Err(e) = consumer.consume_topic(&topic, token).await {
          error!(topic = %topic, "event consumer failed: {}", e);
        }
      }));
    }

    handles
  }

  async fn consume_topic(&self, topic: &str, shutdown: CancellationToken) -> anyhow::Result<()> {
    let js = jetstream::new(self.client.clone());

    let stream_name = format!("courier_{}", topic.replace(['.', '-'], "_"));
    let stream = js
      .get_or_create_stream(jetstream::stream::Config {
        name: stream_name.clone(),
        subjects: vec![topic.to_string()],
        storage: jetstream::stream::StorageType::File,
        ..Default::default()
      })
      .await?;

    let durable = format!("{}_{}", self.config.consumer_group, stream_name);
    let consumer: PullConsumer = stream
      .get_or_create_consumer(
        &durable,
        jetstream::consumer::pull::Config {
          durable_name: Some(durable.clone()),
          ..Default::default()
        },
      )
      .await?;

    let mut messages = consumer.messages().await?;
    info!(topic = %topic, durable = %durable, "event consumer started");

    loop {
      let message = tokio::select! {
        _ = shutdown.cancelled() => break,
        message = messages.next() => message,
      };

      match message {
        Some(Ok(message)) => self.process_message(topic, message).await,
        Some(Err(e)) => {
          warn!(topic = %topic, "event stream error: {}", e);
        }
        None => {
          warn!(topic = %topic, "event stream closed");
          break;
        }
      }
    }

    info!(topic = %topic, "event consumer stopped");
    Ok(())
  }

  async fn process_message(&self, topic: &str, message: jetstream::Message) {
    let envelope = match EventEnvelope::decode(&message.payload) {
      Ok(envelope) => envelope,
      Err(e) => {
        // Malformed envelope: structured log, dead-letter counter, commit
        warn!(topic = %topic, "rejecting event: {}", e);
        ConsumerMetrics::dead_lettered(topic, "invalid_envelope");
        ack(topic, &message).await;
        return;
      }
    };

    let deadline = Duration::from_secs(self.config.handler_timeout_secs);
    let dispatched = tokio::time::timeout(deadline, self.dispatcher.dispatch(&envelope)).await;

    match dispatched {
      Ok(Ok(summary)) => {
        info!(
          topic = %topic,
          event_type = %envelope.event_type,
          tenant = %envelope.tenant_id,
          enqueued = summary.enqueued,
          duplicates = summary.duplicates,
          "event dispatched"
        );
        ConsumerMetrics::consumed(topic);
        ack(topic, &message).await;
      }
      Ok(Err(DispatchError::Unhandled)) => {
        info!(topic = %topic, event_type = %envelope.event_type, "no handler; committing");
        ConsumerMetrics::unhandled(&envelope.event_type);
        ack(topic, &message).await;
      }
      Ok(Err(DispatchError::NonRetriable(reason))) => {
        warn!(
          topic = %topic,
          event_type = %envelope.event_type,
          "dead-lettering event: {}", reason
        );
        ConsumerMetrics::dead_lettered(topic, "non_retriable");
        ack(topic, &message).await;
      }
      Ok(Err(DispatchError::Retriable(reason))) => {
        // No ack: the log redelivers
        warn!(
          topic = %topic,
          event_type = %envelope.event_type,
          "leaving event for redelivery: {}", reason
        );
      }
      Err(_) => {
        warn!(
          topic = %topic,
          event_type = %envelope.event_type,
          "handler deadline ({:?}) exceeded; leaving event for redelivery", deadline
        );
      }
    }
  }
}

async fn ack(topic: &str, message: &jetstream::Message) {
  if let Err(e) = message.ack().await {
    warn!(topic = %topic, "failed to ack message: {}", e);
  }
}
