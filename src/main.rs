//! helloworld - greeting service wired for metrics, traces and structured logs

use std::sync::Arc;

use helloworld::observability::{self, Metrics};
use helloworld::server::{shutdown_signal, HttpServer};
use helloworld::simulation::ThreadRandom;
use helloworld::{AppState, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            observability::init_logging()?;
            error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };

    // Initialize observability (logs, traces)
    let telemetry = observability::init_observability(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        tracing_enabled = telemetry.tracing_enabled(),
        "Starting helloworld..."
    );

    let metrics = Arc::new(Metrics::new()?);
    let state = AppState::new(metrics, Arc::new(ThreadRandom));

    let result = match HttpServer::bind(config.listen_addr(), state).await {
        Ok(server) => server.run(shutdown_signal()).await,
        Err(e) => {
            error!(error = %e, "server error");
            Err(e)
        }
    };

    telemetry.shutdown().await;
    result?;

    info!("helloworld stopped");
    Ok(())
}
