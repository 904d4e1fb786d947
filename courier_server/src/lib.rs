//! # Courier Server - Multi-tenant Notification Delivery Service
//!
//! Layering follows config -> state -> events/queue/senders/hub:
//! - `events` consumes the event log and turns events into delivery records
//! - `queue` drives the retrying per-channel worker pool
//! - `senders` speak SMTP, the SMS provider API, FCM and the in-app hub
//! - `hub` fans notifications and chat traffic out over WebSockets

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod observability;
pub mod queue;
pub mod render;
pub mod senders;
pub mod state;
pub mod store;

pub use config::AppConfig;
pub use error::ServerError;
pub use state::AppState;

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Json, Router};
use courier_core::SecretCipher;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use events::{connect_with_retry, EventConsumer, EventDispatcher, HandlerRegistry};
use hub::{chat_ws_handler, close, notifications_ws_handler};
use queue::WorkerPool;
use senders::{ChannelSender, EmailSender, InAppSender, PushSender, SmsSender};

/// The assembled service: router plus the background tasks feeding it
pub struct Service {
  pub state: AppState,
  pub router: Router,
  shutdown: CancellationToken,
  handles: Vec<JoinHandle<()>>,
}

impl Service {
  /// Propagate shutdown: consumers stop pulling, workers finish their
  /// current record, the hub closes every client.
  pub async fn graceful_shutdown(self) {
    info!("shutting down");
    self.shutdown.cancel();
    self.state.hub.close_all(close::GOING_AWAY);

    for handle in self.handles {
      let _ = handle.await;
    }
    info!("shutdown complete");
  }

  pub fn shutdown_token(&self) -> CancellationToken {
    self.shutdown.clone()
  }
}

/// Build the full service against Postgres and the configured event log.
pub async fn build_service(config: AppConfig, cipher: Arc<dyn SecretCipher>) -> Result<Service> {
  let state = AppState::try_new_async(config, cipher).await?;
  let shutdown = CancellationToken::new();

  let mut handles = spawn_workers(&state, &shutdown);

  if state.config.messaging.enabled {
    info!("event log consumption is enabled");
    let client = connect_with_retry(&state.config.messaging.nats.url).await?;
    let consumer = Arc::new(EventConsumer::new(
      client,
      Arc::new(build_dispatcher(&state)),
      state.config.messaging.clone(),
    ));
    handles.extend(consumer.spawn(shutdown.clone()));
  } else {
    info!("event log consumption is disabled; only direct sends will flow");
  }

  let router = build_router(state.clone());

  Ok(Service {
    state,
    router,
    shutdown,
    handles,
  })
}

/// Dispatcher wired to the state's stores with the built-in handler
/// registry (constructed at init, per the explicit-registry design)
pub fn build_dispatcher(state: &AppState) -> EventDispatcher {
  EventDispatcher::new(
    HandlerRegistry::with_builtin_handlers(),
    state.templates.clone(),
    state.branding.clone(),
    state.devices.clone(),
    state.queue.clone(),
    state.config.delivery.max_retries,
  )
}

/// Spawn the delivery worker pool and lease reclaimer
pub fn spawn_workers(state: &AppState, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
  let senders: Vec<Arc<dyn ChannelSender>> = vec![
    Arc::new(EmailSender::new()),
    Arc::new(SmsSender::new()),
    Arc::new(PushSender::new(state.devices.clone())),
    Arc::new(InAppSender::new(state.hub.clone(), state.deliveries.clone())),
  ];

  let pool = Arc::new(WorkerPool::new(
    state.queue.clone(),
    senders,
    state.credentials.clone(),
    state.config.delivery.clone(),
  ));
  pool.spawn(shutdown.clone())
}

/// WebSocket endpoints plus the health probe
pub fn build_router(state: AppState) -> Router {
  Router::new()
    .route("/ws/notifications/{tenant}", get(notifications_ws_handler))
    .route("/ws/notifications/{tenant}/", get(notifications_ws_handler))
    .route("/ws/chat/{tenant}", get(chat_ws_handler))
    .route("/ws/chat/{tenant}/", get(chat_ws_handler))
    .route("/health", get(health_check))
    .with_state(state)
}

async fn health_check() -> impl IntoResponse {
  Json(serde_json::json!({
    "status": "healthy",
    "service": "courier_server",
    "version": env!("CARGO_PKG_VERSION"),
    "timestamp": chrono::Utc::now().to_rfc3339(),
  }))
}
