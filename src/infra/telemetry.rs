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
///
/// Events go to stderr so that command output on stdout stays machine-readable.
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "transfer_cache_hit_total",
            Unit::Count,
            "Requests answered from a cached snapshot."
        );
        describe_counter!(
            "transfer_cache_miss_total",
            Unit::Count,
            "Requests sent to the transport while caching was active."
        );
        describe_counter!(
            "transfer_cache_passthrough_total",
            Unit::Count,
            "Requests sent to the transport while caching was inactive."
        );
        describe_counter!(
            "transfer_cache_snapshot_stored_total",
            Unit::Count,
            "Terminal responses written to the state store."
        );
        describe_counter!(
            "transfer_cache_gc_removed_total",
            Unit::Count,
            "Transfer-state keys removed by garbage collection."
        );
    });
}
