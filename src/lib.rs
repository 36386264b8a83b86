//! helloworld - greeting service with Prometheus metrics and OpenTelemetry tracing

pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod server;
pub mod simulation;

pub use config::Config;
pub use error::{ConfigError, ServerError};
pub use handlers::AppState;
pub use observability::Metrics;
pub use server::{HttpServer, ServerPhase};
