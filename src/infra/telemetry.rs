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
            "shutterbug_render_total",
            Unit::Count,
            "Render requests by requested format and outcome."
        );
        describe_histogram!(
            "shutterbug_render_ms",
            Unit::Milliseconds,
            "End-to-end latency of successful renders in milliseconds."
        );
        describe_gauge!(
            "shutterbug_pool_idle",
            Unit::Count,
            "Browser instances parked in the idle set."
        );
        describe_gauge!(
            "shutterbug_pool_leased",
            Unit::Count,
            "Browser instances currently leased to a request."
        );
        describe_gauge!(
            "shutterbug_pool_population",
            Unit::Count,
            "Browser instances alive, idle or leased."
        );
    });
}
