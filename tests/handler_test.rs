//! Handler tests driving the router in-process

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use helloworld::observability::metrics::{
    IN_FLIGHT_REQUESTS, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS,
};
use helloworld::server::router;
use helloworld::simulation::{FixedRandom, RandomSource, ThreadRandom};
use helloworld::{AppState, Metrics};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    metrics: Arc<Metrics>,
}

impl TestApp {
    fn new(random: impl RandomSource + 'static) -> Self {
        let metrics = Arc::new(Metrics::new().unwrap());
        let state = AppState::new(metrics.clone(), Arc::new(random));
        Self {
            router: router(state),
            metrics,
        }
    }

    async fn get(&self, uri: &str) -> (StatusCode, Option<String>, String) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }
}

#[cfg(test)]
mod hello {
    use super::*;

    #[tokio::test]
    async fn test_greets_by_name() {
        let app = TestApp::new(FixedRandom::succeeding());

        let (status, content_type, body) = app.get("/hello?name=Ferris").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain"));
        assert_eq!(body, "Hello, Ferris!");
    }

    #[tokio::test]
    async fn test_defaults_to_world() {
        let app = TestApp::new(FixedRandom::succeeding());

        for uri in ["/hello", "/hello?name=", "/hello?other=x"] {
            let (status, _, body) = app.get(uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body, "Hello, World!", "{uri}");
        }
    }

    #[tokio::test]
    async fn test_decodes_query_value() {
        let app = TestApp::new(FixedRandom::succeeding());

        let (_, _, body) = app.get("/hello?name=Ada%20Lovelace").await;
        assert_eq!(body, "Hello, Ada Lovelace!");

        let (_, _, body) = app.get("/hello?name=first&name=second").await;
        assert_eq!(body, "Hello, first!");
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let app = TestApp::new(FixedRandom::failing());

        let (status, content_type, body) = app.get("/hello?name=Ferris").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(content_type.as_deref(), Some("text/plain"));
        assert_eq!(body, "Something went wrong!");
        assert_eq!(app.metrics.requests("GET", "/hello", "500"), 1);
        assert_eq!(app.metrics.requests("GET", "/hello", "200"), 0);
    }

    #[tokio::test]
    async fn test_waits_for_simulated_work() {
        let app = TestApp::new(FixedRandom {
            work_millis: 120,
            unit: 0.9,
        });

        let started = Instant::now();
        let (status, _, _) = app.get("/hello").await;

        assert_eq!(status, StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_accepts_remote_trace_parent() {
        let app = TestApp::new(FixedRandom::succeeding());
        let request = Request::get("/hello?name=traced")
            .header(
                "traceparent",
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            )
            .body(Body::empty())
            .unwrap();

        let (status, _, body) = app.send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Hello, traced!");
    }
}

#[cfg(test)]
mod metrics {
    use super::*;

    #[tokio::test]
    async fn test_request_counter_sums_to_calls() {
        let app = Arc::new(TestApp::new(ThreadRandom));
        let calls = 20;

        let mut set = tokio::task::JoinSet::new();
        for i in 0..calls {
            let app = app.clone();
            set.spawn(async move { app.get(&format!("/hello?name=user{i}")).await });
        }

        while let Some(joined) = set.join_next().await {
            let (status, _, _) = joined.expect("Task panicked");
            assert!(status == StatusCode::OK || status == StatusCode::INTERNAL_SERVER_ERROR);
        }

        let ok = app.metrics.requests("GET", "/hello", "200");
        let failed = app.metrics.requests("GET", "/hello", "500");
        assert_eq!(ok + failed, calls);
        assert_eq!(app.metrics.requests_for("GET", "/hello"), calls);
    }

    #[tokio::test]
    async fn test_in_flight_gauge_tracks_requests() {
        let app = Arc::new(TestApp::new(FixedRandom {
            work_millis: 200,
            unit: 0.9,
        }));

        let pending = {
            let app = app.clone();
            tokio::spawn(async move { app.get("/hello").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(app.metrics.in_flight(), 1);

        pending.await.unwrap();
        assert_eq!(app.metrics.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_released_when_request_dropped() {
        let app = TestApp::new(FixedRandom {
            work_millis: 200,
            unit: 0.9,
        });

        let cancelled =
            tokio::time::timeout(Duration::from_millis(30), app.get("/hello")).await;

        assert!(cancelled.is_err());
        assert_eq!(app.metrics.in_flight(), 0);
        assert_eq!(app.metrics.requests_for("GET", "/hello"), 0);
    }

    #[tokio::test]
    async fn test_duration_includes_work_floor() {
        let app = TestApp::new(FixedRandom::succeeding());

        for _ in 0..4 {
            app.get("/hello").await;
        }

        let (count, sum) = app.metrics.duration_samples("GET", "/hello");
        assert_eq!(count, 4);
        assert!(sum >= 0.05 * count as f64);

        let text = app.metrics.render();
        let below_floor = format!(
            "{REQUEST_DURATION_SECONDS}_bucket{{method=\"GET\",path=\"/hello\",le=\"0.05\"}} 0\n"
        );
        assert!(text.contains(&below_floor), "{text}");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_all_instruments() {
        let app = TestApp::new(FixedRandom::succeeding());
        app.get("/hello").await;

        let (status, content_type, body) = app.get("/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().starts_with("text/plain"));
        assert!(body.contains(REQUESTS_TOTAL));
        assert!(body.contains(REQUEST_DURATION_SECONDS));
        assert!(body.contains(IN_FLIGHT_REQUESTS));
        assert!(body.contains(r#"method="GET",path="/hello",status="200""#));
    }

    #[tokio::test]
    async fn test_health_and_metrics_are_not_counted() {
        let app = TestApp::new(FixedRandom::succeeding());

        app.get("/healthz").await;
        app.get("/metrics").await;

        assert_eq!(app.metrics.requests_for("GET", "/healthz"), 0);
        assert_eq!(app.metrics.requests_for("GET", "/metrics"), 0);
    }
}

#[cfg(test)]
mod routing {
    use super::*;

    #[tokio::test]
    async fn test_healthz_under_concurrent_load() {
        let app = Arc::new(TestApp::new(FixedRandom::succeeding()));

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..25 {
            let app = app.clone();
            set.spawn(async move { app.get("/hello").await });
        }
        for _ in 0..50 {
            let app = app.clone();
            set.spawn(async move { app.get("/healthz").await });
        }

        let mut health_checks = 0;
        while let Some(joined) = set.join_next().await {
            let (status, _, body) = joined.expect("Task panicked");
            if body == "ok" {
                assert_eq!(status, StatusCode::OK);
                health_checks += 1;
            }
        }
        assert_eq!(health_checks, 50);
    }

    #[tokio::test]
    async fn test_every_method_is_served() {
        let app = TestApp::new(FixedRandom::succeeding());

        let (status, _, body) = app
            .send(Request::post("/hello?name=Ferris").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Hello, Ferris!");
        assert_eq!(app.metrics.requests("POST", "/hello", "200"), 1);
        assert_eq!(app.metrics.requests_for("GET", "/hello"), 0);

        let (status, _, body) = app
            .send(Request::put("/healthz").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, _, body) = app
            .send(Request::delete("/metrics").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(REQUESTS_TOTAL));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let app = TestApp::new(FixedRandom::succeeding());

        let (status, _, _) = app.get("/goodbye").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
