//! HTTP server: routing, listen/serve lifecycle and signal-driven shutdown

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{routing::any, Router};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::handlers::{self, AppState};

/// Upper bound on reading a request head and on producing its response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time in-flight requests get to finish once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Starting,
    Serving,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerPhase::Starting => "starting",
            ServerPhase::Serving => "serving",
            ServerPhase::ShuttingDown => "shutting_down",
            ServerPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Static path dispatch for the three endpoints. Every method is served.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/hello", any(handlers::hello))
        .route("/healthz", any(handlers::healthz))
        .route("/metrics", any(handlers::metrics))
        .layer(ServiceBuilder::new().layer(TimeoutLayer::new(REQUEST_TIMEOUT)))
        .with_state(state)
}

pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    grace: Duration,
    read_timeout: Duration,
    phase: watch::Sender<ServerPhase>,
}

impl HttpServer {
    pub async fn bind(addr: SocketAddr, state: AppState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let (phase, _) = watch::channel(ServerPhase::Starting);

        Ok(Self {
            listener,
            router: router(state),
            grace: SHUTDOWN_GRACE,
            read_timeout: REQUEST_TIMEOUT,
            phase,
        })
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Close connections whose request head has not fully arrived within `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Observe lifecycle transitions.
    pub fn phase(&self) -> watch::Receiver<ServerPhase> {
        self.phase.subscribe()
    }

    /// Serve until `shutdown` resolves, then drain for at most the grace period.
    ///
    /// Connections still busy when the grace period ends are aborted; that is
    /// not reported as an error.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            router,
            grace,
            read_timeout,
            phase,
        } = self;

        let port = listener.local_addr()?.port();
        let (drain_tx, drain_rx) = watch::channel(());
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        transition(&phase, ServerPhase::Serving);
        info!(port = port, "starting server");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        connections.spawn(serve_connection(
                            stream,
                            remote_addr,
                            router.clone(),
                            read_timeout,
                            drain_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    reap(joined);
                }
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        transition(&phase, ServerPhase::ShuttingDown);
        info!(
            grace_secs = grace.as_secs_f64(),
            open_connections = connections.len(),
            "shutting down"
        );
        drain_tx.send_replace(());

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = connections.join_next().await {
                reap(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = grace.as_secs_f64(),
                abandoned = connections.len(),
                "shutdown grace period elapsed, aborting in-flight requests"
            );
            connections.shutdown().await;
        }

        transition(&phase, ServerPhase::Stopped);
        info!("server stopped");
        Ok(())
    }
}

/// Drive one connection; on drain, let the current request finish and close.
async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    router: Router,
    read_timeout: Duration,
    mut drain: watch::Receiver<()>,
) {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(Some(read_timeout));

    let conn = builder.serve_connection_with_upgrades(
        TokioIo::new(stream),
        TowerToHyperService::new(router),
    );
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = drain.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(e) = result {
        debug!(remote_addr = %remote_addr, error = %e, "connection closed with error");
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "connection task panicked");
        }
    }
}

fn transition(phase: &watch::Sender<ServerPhase>, next: ServerPhase) {
    let previous = phase.send_replace(next);
    debug!(from = %previous, to = %next, "server phase changed");
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C only on non-unix targets).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}
