//! Logging and metrics setup.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Counter: chat messages broadcast, labelled by `kind` (user, ai, system).
pub const MESSAGES_SENT: &str = "giga_messages_sent_total";
/// Counter: assistant runs started.
pub const ASSISTANT_RUNS: &str = "giga_assistant_runs_total";
/// Counter: assistant requests that ended in an error.
pub const ASSISTANT_ERRORS: &str = "giga_assistant_errors_total";

/// Initialize structured logging.
///
/// `RUST_LOG` wins over the configured filter when set.
pub fn init(config: &LoggingConfig) {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let registry = tracing_subscriber::registry().with(filter_layer);

    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init();
    }
}

/// Install the global Prometheus recorder.
///
/// Only one recorder may exist per process; a second call returns `None`.
pub fn install_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    }
}
