//! Observability Module - OpenTelemetry Tracing, Prometheus Metrics, Structured Logging

pub mod metrics;
pub mod propagation;
pub mod tracing_setup;

use opentelemetry::global;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Config;

pub use metrics::{InFlightGuard, Metrics};

/// Handle to the installed telemetry pipeline.
#[derive(Debug)]
pub struct Observability {
    tracing_enabled: bool,
}

impl Observability {
    pub fn tracing_enabled(&self) -> bool {
        self.tracing_enabled
    }

    /// Flush pending spans and shut the tracer provider down.
    pub async fn shutdown(self) {
        if !self.tracing_enabled {
            return;
        }

        tracing::info!("Shutting down tracer provider...");
        // The batch processor blocks while it drains; keep it off the async workers.
        if let Err(e) = tokio::task::spawn_blocking(global::shutdown_tracer_provider).await {
            tracing::error!(error = %e, "failed to shutdown tracer");
        }
    }
}

/// Initialize the observability stack: JSON logs on stdout plus, when the
/// exporter can be built, an OTLP span layer.
///
/// A tracer failure is logged and the service keeps running untraced.
pub fn init_observability(config: &Config) -> anyhow::Result<Observability> {
    propagation::install_propagator();

    let (telemetry_layer, tracer_error) = match tracing_setup::init_tracer(config) {
        Ok(tracer) => (Some(tracing_opentelemetry::layer().with_tracer(tracer)), None),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer())
        .with(telemetry_layer)
        .try_init()?;

    let tracing_enabled = match tracer_error {
        None => {
            tracing::info!(
                service = %config.service_name,
                otlp_endpoint = %config.collector_endpoint(),
                "tracer initialized"
            );
            true
        }
        Some(e) => {
            tracing::error!(error = %e, "failed to initialize tracer");
            false
        }
    };

    Ok(Observability { tracing_enabled })
}

/// JSON logs only, for failures that happen before the configuration is known.
pub fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer())
        .try_init()?;
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn json_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stdout)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
}
