use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cartomill_job_ok_total",
            Unit::Count,
            "Total number of jobs completed successfully by pooled workers."
        );
        describe_counter!(
            "cartomill_job_failure_total",
            Unit::Count,
            "Total number of jobs that failed, including job-level compiler failures."
        );
        describe_counter!(
            "cartomill_job_timeout_total",
            Unit::Count,
            "Total number of jobs destroyed for exceeding their time budget."
        );
        describe_counter!(
            "cartomill_pool_worker_spawned_total",
            Unit::Count,
            "Total number of worker processes spawned by the pool."
        );
        describe_counter!(
            "cartomill_pool_worker_retired_total",
            Unit::Count,
            "Total number of worker processes destroyed (dead, stale, or reaped)."
        );
        describe_counter!(
            "cartomill_pool_reset_total",
            Unit::Count,
            "Total number of pool resets."
        );
        describe_gauge!(
            "cartomill_pool_idle",
            Unit::Count,
            "Current number of idle worker processes."
        );
        describe_histogram!(
            "cartomill_job_ms",
            Unit::Milliseconds,
            "Pooled job round-trip latency in milliseconds."
        );
    });
}
