//! Prometheus Metrics for the greeting service
//! Request counter, latency histogram and in-flight gauge behind one registry

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub const REQUESTS_TOTAL: &str = "helloworld_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "helloworld_request_duration_seconds";
pub const IN_FLIGHT_REQUESTS: &str = "helloworld_in_flight_requests";

/// Application metrics. One instance per process, shared through `AppState`.
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    in_flight: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(REQUESTS_TOTAL, "Total number of requests"),
            &["method", "path", "status"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(REQUEST_DURATION_SECONDS, "Request duration in seconds")
                .buckets(prometheus::DEFAULT_BUCKETS.to_vec()),
            &["method", "path"],
        )?;

        let in_flight = IntGauge::new(IN_FLIGHT_REQUESTS, "Number of in-flight requests")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;

        // process_* series (cpu, memory, fds, start time) read from /proc.
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        tracing::info!("Prometheus metrics initialized");

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            in_flight,
        })
    }

    pub fn increment(&self, method: &str, path: &str, status: &str) {
        self.requests_total
            .with_label_values(&[method, path, status])
            .inc();
    }

    pub fn observe_duration(&self, method: &str, path: &str, seconds: f64) {
        self.request_duration
            .with_label_values(&[method, path])
            .observe(seconds);
    }

    pub fn increment_in_flight(&self) {
        self.in_flight.inc();
    }

    pub fn decrement_in_flight(&self) {
        self.in_flight.dec();
    }

    /// Count the current request as in flight until the guard is dropped.
    pub fn track_in_flight(&self) -> InFlightGuard<'_> {
        self.increment_in_flight();
        InFlightGuard { metrics: self }
    }

    /// Encode metrics to Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    pub fn requests(&self, method: &str, path: &str, status: &str) -> u64 {
        self.requests_total
            .with_label_values(&[method, path, status])
            .get()
    }

    /// Requests recorded for (method, path) summed over every status label.
    pub fn requests_for(&self, method: &str, path: &str) -> u64 {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == REQUESTS_TOTAL)
            .flat_map(|family| family.get_metric())
            .filter(|metric| {
                let labels = metric.get_label();
                let has = |name: &str, value: &str| {
                    labels
                        .iter()
                        .any(|l| l.get_name() == name && l.get_value() == value)
                };
                has("method", method) && has("path", path)
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum()
    }

    /// (sample count, sample sum) of the duration histogram for (method, path).
    pub fn duration_samples(&self, method: &str, path: &str) -> (u64, f64) {
        let histogram = self.request_duration.with_label_values(&[method, path]);
        (histogram.get_sample_count(), histogram.get_sample_sum())
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.get()
    }
}

/// Decrements the in-flight gauge on drop, including unwinding and
/// cancellation of the request future.
pub struct InFlightGuard<'a> {
    metrics: &'a Metrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.decrement_in_flight();
    }
}
