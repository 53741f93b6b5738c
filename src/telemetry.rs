//! OpenTelemetry tracing export
//!
//! Spans are shipped over OTLP/gRPC to the collector named by
//! `OTEL_EXPORTER_OTLP_ENDPOINT`. Without that variable the operator only
//! logs locally.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace, Resource};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

/// Service name reported on every exported span
pub const SERVICE_NAME: &str = "consul-merge-operator";

/// Environment variable enabling the exporter
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Whether an OTLP collector has been configured
pub fn otel_enabled() -> bool {
    std::env::var(OTLP_ENDPOINT_ENV)
        .map(|endpoint| !endpoint.is_empty())
        .unwrap_or(false)
}

/// Build the tracing layer exporting spans to the OTLP collector
///
/// Returns `None` (and logs to stderr) when the pipeline cannot be
/// installed, so a broken collector never prevents the operator from
/// starting.
pub fn init_telemetry<S>(_registry: &S) -> Option<OpenTelemetryLayer<S, trace::Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let endpoint = std::env::var(OTLP_ENDPOINT_ENV).ok()?;

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio);

    match tracer {
        Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
        Err(e) => {
            eprintln!("Failed to install OpenTelemetry pipeline: {}", e);
            None
        }
    }
}

/// Flush pending spans before exit
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
