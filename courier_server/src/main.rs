use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use courier_core::PlainCipher;
use courier_server::{build_service, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer())
    .init();

  if let Err(e) = courier_server::observability::init_observability().await {
    eprintln!("failed to initialize observability: {}", e);
    std::process::exit(1);
  }

  let config = match AppConfig::load() {
    Ok(config) => config,
    Err(e) => {
      eprintln!("failed to load configuration: {}", e);
      eprintln!("hint: copy courier.yml.example to courier.yml or set COURIER_CONFIG");
      std::process::exit(1);
    }
  };

  // The secret cipher is an external capability; without a configured key
  // the pass-through cipher is used and secrets land unencrypted
  if config.auth.encryption_key.is_none() {
    warn!("no encryption key configured; credential secrets will not be encrypted at rest");
  }
  let cipher = Arc::new(PlainCipher);

  let addr = format!("0.0.0.0:{}", config.server.port);
  let service = build_service(config, cipher).await?;
  let router = service.router.clone();

  let listener = TcpListener::bind(&addr).await?;
  info!("courier_server listening on {}", addr);

  let shutdown = service.shutdown_token();
  let serve = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async move {
    let _ = tokio::signal::ctrl_c().await;
    shutdown.cancel();
  });

  serve.await?;
  service.graceful_shutdown().await;

  Ok(())
}
