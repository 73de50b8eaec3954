use std::borrow::Cow;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

/// Flushes the global tracer provider when dropped.
pub struct OtelGuard {
    _private: (),
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Console rendering of log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shipping.
    Json,
    /// Compact human-readable lines for interactive runs.
    Text,
}

impl LogFormat {
    /// `LOG_FORMAT=text` switches to text; anything else keeps JSON.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("text") => Self::Text,
            _ => Self::Json,
        }
    }
}

struct ErrorCounterLayer;

impl<S> Layer<S> for ErrorCounterLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level == tracing::Level::ERROR {
            metrics::counter!("tracing_error_events").increment(1);
        } else if level == tracing::Level::WARN {
            metrics::counter!("tracing_warn_events").increment(1);
        }
    }
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);
    match format {
        LogFormat::Json => base.json().boxed(),
        LogFormat::Text => base.compact().boxed(),
    }
}

/// Build a `tracing` dispatcher with:
/// - `EnvFilter` (`RUST_LOG` wins, otherwise `default_level`)
/// - JSON or text console output
/// - `tracing_error_events` / `tracing_warn_events` counters
/// - OTLP span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set
pub fn build_dispatch(
    service_name: impl Into<Cow<'static, str>>,
    default_level: &str,
    format: LogFormat,
) -> (tracing::Dispatch, Option<OtelGuard>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let service_name = service_name.into();

    let base = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer(format))
        .with(ErrorCounterLayer);

    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return (tracing::Dispatch::new(base), None);
    };

    let Ok(exporter) = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    else {
        return (tracing::Dispatch::new(base), None);
    };

    let resource = Resource::new(vec![KeyValue::new(
        "service.name",
        service_name.to_string(),
    )]);

    // Batch export needs a Tokio runtime; the binary runs under `#[tokio::main]`.
    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("leaderboard_tracker");
    let _ = opentelemetry::global::set_tracer_provider(provider);

    let subscriber = base.with(tracing_opentelemetry::layer().with_tracer(tracer));
    (
        tracing::Dispatch::new(subscriber),
        Some(OtelGuard { _private: () }),
    )
}
