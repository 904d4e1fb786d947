pub mod metrics;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Install the Prometheus recorder. Safe to call once at startup; tests and
/// embedded use simply skip it and the metrics macros become no-ops.
pub async fn init_observability() -> Result<()> {
  PrometheusBuilder::new().install()?;
  info!("metrics recorder installed");
  Ok(())
}
