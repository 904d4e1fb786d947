//! Shared fixtures for the integration tests: an in-memory application
//! state and a scripted channel sender.

#![allow(dead_code)]

use async_trait::async_trait;
use courier_core::{Channel, Credential, DeliveryRecord, EventEnvelope, TenantId};
use courier_server::config::{
  AppConfig, AuthConfig, ChannelDefaults, DatabaseConfig, DeliveryConfig, IdentityConfig,
  MessagingConfig, NatsConfig, ServerConfig,
};
use courier_server::senders::{ChannelSender, SendOutcome};
use courier_server::state::AppState;
use courier_server::store::{
  MemoryChatStore, MemoryCredentialStore, MemoryDeliveryStore, MemoryDeviceStore,
  MemoryTemplateStore,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub struct TestWorld {
  pub state: AppState,
  pub deliveries: Arc<MemoryDeliveryStore>,
  pub templates: Arc<MemoryTemplateStore>,
  pub chat: Arc<MemoryChatStore>,
  pub devices: Arc<MemoryDeviceStore>,
  pub credentials: Arc<MemoryCredentialStore>,
}

pub fn test_config() -> AppConfig {
  AppConfig {
    server: ServerConfig { port: 0 },
    auth: AuthConfig {
      jwt_secret: "integration-test-secret".to_string(),
      encryption_key: None,
    },
    database: DatabaseConfig {
      url: "postgres://unused".to_string(),
    },
    messaging: MessagingConfig {
      enabled: false,
      nats: NatsConfig {
        url: "nats://unused".to_string(),
      },
      topics: vec!["auth-events".to_string()],
      consumer_group: "courier-test".to_string(),
      handler_timeout_secs: 15,
    },
    identity: IdentityConfig {
      // Nothing listens here: branding lookups fail fast and fall back
      base_url: "http://127.0.0.1:1".to_string(),
      positive_ttl_secs: 300,
      negative_ttl_secs: 30,
    },
    delivery: DeliveryConfig {
      workers: 2,
      ..DeliveryConfig::default()
    },
    defaults: ChannelDefaults::default(),
  }
}

/// Application state wired entirely against the in-memory stores.
///
/// The identity base URL points at a closed port, so branding always takes
/// the tenant-id fallback without leaving the host.
pub fn test_world() -> TestWorld {
  let deliveries = Arc::new(MemoryDeliveryStore::new());
  let templates = Arc::new(MemoryTemplateStore::new());
  let chat = Arc::new(MemoryChatStore::new());
  let devices = Arc::new(MemoryDeviceStore::new());
  let credentials = Arc::new(MemoryCredentialStore::new());

  let state = AppState::assemble(
    test_config(),
    deliveries.clone(),
    templates.clone(),
    chat.clone(),
    devices.clone(),
    credentials.clone(),
  )
  .expect("test state");

  TestWorld {
    state,
    deliveries,
    templates,
    chat,
    devices,
    credentials,
  }
}

/// Sender returning scripted outcomes in order (success once exhausted) and
/// recording every record it saw.
pub struct ScriptedSender {
  channel: Channel,
  script: Mutex<VecDeque<SendOutcome>>,
  pub sent: Mutex<Vec<DeliveryRecord>>,
}

impl ScriptedSender {
  pub fn new(channel: Channel, outcomes: Vec<SendOutcome>) -> Arc<Self> {
    Arc::new(Self {
      channel,
      script: Mutex::new(outcomes.into()),
      sent: Mutex::new(Vec::new()),
    })
  }

  pub fn accepting(channel: Channel) -> Arc<Self> {
    Self::new(channel, Vec::new())
  }

  pub fn sent_count(&self) -> usize {
    self.sent.lock().unwrap().len()
  }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
  fn channel(&self) -> Channel {
    self.channel
  }

  async fn send(&self, _credential: Option<&Credential>, record: &DeliveryRecord) -> SendOutcome {
    self.sent.lock().unwrap().push(record.clone());
    self
      .script
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| SendOutcome::success(Some("accepted".to_string())))
  }
}

pub fn envelope(event_type: &str, tenant: &str, payload: serde_json::Value) -> EventEnvelope {
  EventEnvelope {
    event_type: event_type.to_string(),
    tenant_id: TenantId::new(tenant),
    timestamp: chrono::Utc::now(),
    payload: payload.as_object().expect("object payload").clone(),
    metadata: Default::default(),
  }
}

/// Poll until the predicate holds or the deadline passes; the worker pool
/// runs on real time with a one-second claim poll.
pub async fn wait_until<F>(deadline: std::time::Duration, mut predicate: F) -> bool
where
  F: FnMut() -> bool,
{
  let start = std::time::Instant::now();
  while start.elapsed() < deadline {
    if predicate() {
      return true;
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
  }
  predicate()
}
