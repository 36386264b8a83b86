//! OpenTelemetry Tracing Configuration
//! Batch export of spans to an OTLP/gRPC collector

use opentelemetry::trace::TraceError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};

use crate::config::Config;

/// Initialize OpenTelemetry tracer with OTLP exporter.
///
/// Installs the tracer provider globally; spans are flushed by
/// [`super::Observability::shutdown`].
pub fn init_tracer(config: &Config) -> Result<sdktrace::Tracer, TraceError> {
    let endpoint = config.collector_endpoint();

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(sdktrace::Sampler::AlwaysOn)
                .with_id_generator(sdktrace::RandomIdGenerator::default())
                .with_resource(resource(config)),
        )
        .install_batch(runtime::Tokio)?;

    Ok(tracer)
}

fn resource(config: &Config) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("environment", config.environment.clone()),
    ])
}
