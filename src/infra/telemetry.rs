use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            "scorta_cache_hit_total",
            Unit::Count,
            "Total number of partition cache hits."
        );
        describe_counter!(
            "scorta_cache_miss_total",
            Unit::Count,
            "Total number of partition cache misses."
        );
        describe_counter!(
            "scorta_cache_fill_total",
            Unit::Count,
            "Total number of successful responses written back to a partition."
        );
        describe_counter!(
            "scorta_offline_fallback_total",
            Unit::Count,
            "Total number of synthesized offline fallback responses."
        );
        describe_counter!(
            "scorta_partitions_deleted_total",
            Unit::Count,
            "Total number of stale partitions deleted during activation."
        );
        describe_counter!(
            "scorta_refresh_wipe_total",
            Unit::Count,
            "Total number of full partition wipes triggered by a refresh request."
        );
        describe_counter!(
            "scorta_install_failed_total",
            Unit::Count,
            "Total number of failed install attempts."
        );
    });
}
