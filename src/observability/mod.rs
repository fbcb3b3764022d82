// src/observability/mod.rs
//! Logging and metrics setup
//!
//! - **Tracing**: `tracing-subscriber` with an `EnvFilter` (`RUST_LOG` wins over
//!   the configured level) and JSON or human-readable output
//! - **Metrics**: `metrics` facade, optionally exported to Prometheus

pub mod metrics;

use crate::utils::config::{LogFormat, ObservabilityConfig};
use crate::utils::errors::{CoordinatorError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| CoordinatorError::ObservabilityError(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    installed.map_err(|e| {
        CoordinatorError::ObservabilityError(format!("Failed to install subscriber: {}", e))
    })
}

/// Install the Prometheus recorder when a listener address is configured.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(addr) = config.metrics_addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| {
            CoordinatorError::ObservabilityError(format!("Failed to install Prometheus: {}", e))
        })?;

    self::metrics::describe();
    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}
