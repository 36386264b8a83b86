//! HTTP Handlers
//! Provides /hello, /healthz, /metrics endpoints

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tracing::{field, info_span, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::observability::{propagation, Metrics};
use crate::simulation::RandomSource;

const DEFAULT_NAME: &str = "World";
const FAILURE_BODY: &str = "Something went wrong!";

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub random: Arc<dyn RandomSource>,
}

impl AppState {
    pub fn new(metrics: Arc<Metrics>, random: Arc<dyn RandomSource>) -> Self {
        Self { metrics, random }
    }
}

/// Greeting text for the `name` query value; blank or missing means "World".
pub fn greeting(name: Option<&str>) -> String {
    format!("Hello, {}!", name.filter(|n| !n.is_empty()).unwrap_or(DEFAULT_NAME))
}

/// `/hello?name=<string>`, any method
pub async fn hello(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let start = Instant::now();
    let _in_flight = state.metrics.track_in_flight();

    let span = info_span!(
        "hello-handler",
        "request.name" = field::Empty,
        "http.method" = field::Empty,
        "http.url" = field::Empty,
        error = field::Empty,
        "otel.status_code" = field::Empty
    );
    // An incoming traceparent makes this span the local root under the caller's trace.
    span.set_parent(propagation::extract_context(&headers));

    simulate_work(state.random.as_ref())
        .instrument(info_span!(parent: &span, "process-request", "work.duration_ms" = field::Empty))
        .await;

    // First occurrence wins when the key is repeated.
    let name = params
        .iter()
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_NAME);

    span.record("request.name", name);
    span.record("http.method", method.as_str());
    span.record("http.url", uri.to_string().as_str());

    let mut status = StatusCode::OK;
    let mut body = greeting(Some(name));

    let failed = state.random.should_fail();
    if failed {
        status = StatusCode::INTERNAL_SERVER_ERROR;
        body = FAILURE_BODY.to_string();
        span.record("error", true);
        span.record("otel.status_code", "ERROR");
    }

    let trace_id = propagation::trace_id(&span);
    let elapsed_ms = start.elapsed().as_millis() as u64;
    span.in_scope(|| {
        if failed {
            tracing::error!(
                method = %method,
                path = uri.path(),
                name = name,
                duration_ms = elapsed_ms,
                trace_id = %trace_id,
                "simulated error"
            );
        } else {
            tracing::info!(
                method = %method,
                path = uri.path(),
                name = name,
                duration_ms = elapsed_ms,
                trace_id = %trace_id,
                "request handled"
            );
        }
    });

    let response = (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response();
    drop(span);

    state
        .metrics
        .increment(method.as_str(), uri.path(), status.as_str());
    state
        .metrics
        .observe_duration(method.as_str(), uri.path(), start.elapsed().as_secs_f64());

    response
}

/// Sleeps for the drawn work duration inside the current `process-request` span.
async fn simulate_work(random: &dyn RandomSource) {
    let started = Instant::now();
    tokio::time::sleep(random.work_duration()).await;
    tracing::Span::current().record("work.duration_ms", started.elapsed().as_millis() as u64);
}

/// `/healthz`
pub async fn healthz() -> &'static str {
    "ok"
}

/// `/metrics`
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, state.metrics.content_type())],
        state.metrics.render(),
    )
}
