//! Logging and metrics.

use crate::config::ObservabilityConfig;
use crate::error::{Result, StoreError};
use axum::{routing::get, Router};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level; fails if a subscriber is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let level = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| StoreError::InvalidConfig {
            field: "observability.log_level".to_string(),
            reason: e.to_string(),
        })?;

    let json = config.json_logs.then(|| fmt::layer().json());
    let plain = (!config.json_logs).then(fmt::layer);

    tracing_subscriber::registry()
        .with(level)
        .with(json)
        .with(plain)
        .try_init()
        .map_err(|e| StoreError::Internal(format!("Logging already initialized: {}", e)))?;

    info!(level = %config.log_level, json = config.json_logs, "Logging ready");
    Ok(())
}

/// Expose the counters in Prometheus text format on `metrics_addr` until
/// `shutdown` resolves.
pub async fn run_metrics_server<F>(config: ObservabilityConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let exporter = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StoreError::Internal(format!("Cannot install metrics recorder: {}", e)))?;
    register_metrics();

    let routes = Router::new().route("/metrics", get(move || async move { exporter.render() }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Serving metrics");

    axum::serve(listener, routes)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))
}

/// Register the counters so they appear before the first request.
fn register_metrics() {
    counter!("statestore_requests_total").absolute(0);
    counter!("statestore_request_errors_total").absolute(0);
    counter!("statestore_tso_issued_total").absolute(0);
    counter!("statestore_service_ops_total").absolute(0);
}
