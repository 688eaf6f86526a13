//! Observability for the nlq gateway
//!
//! This crate provides:
//! - Tracing subscriber setup (text or JSON lines per configuration)
//! - A process-wide metrics registry with labeled counters and latency
//!   histograms, rendered in Prometheus text exposition format

pub mod metrics;

pub use metrics::{Metrics, StageTimer};

use nlq_core::config::ObservabilityConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set. Calling
/// this twice is a no-op (the second init attempt is discarded).
pub fn init_telemetry(config: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true),
            )
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("telemetry already initialized, keeping existing subscriber");
    }
}
