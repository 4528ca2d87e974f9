//! Prometheus metrics for the router.
//!
//! A single registry behind a `OnceLock`, exposed at `GET /metrics` when
//! the exposition endpoint is enabled.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Requests by endpoint, model, provider and status code.
    pub request_count: IntCounterVec,

    /// End-to-end request duration in seconds.
    pub request_duration: HistogramVec,

    /// Provider selections by strategy, model and provider id.
    pub provider_selections: IntCounterVec,

    /// Selection failures by strategy and model.
    pub selection_failures: IntCounterVec,

    /// Upstream call duration in seconds by provider.
    pub upstream_latency: HistogramVec,

    /// Keep-alive pings by model, host and outcome.
    pub keepalive_pings: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry. Idempotent; later calls return the
/// same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "llm_router_requests_total",
            "Total number of requests",
            &["endpoint", "model", "provider", "status_code"]
        )
        .expect("register request_count");

        let request_duration = register_histogram_vec!(
            "llm_router_request_duration_seconds",
            "Request duration in seconds",
            &["endpoint", "model", "provider"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("register request_duration");

        let provider_selections = register_int_counter_vec!(
            "llm_router_provider_selections_total",
            "Provider selections by strategy",
            &["strategy", "model", "provider"]
        )
        .expect("register provider_selections");

        let selection_failures = register_int_counter_vec!(
            "llm_router_selection_failures_total",
            "Provider selection failures by strategy",
            &["strategy", "model"]
        )
        .expect("register selection_failures");

        let upstream_latency = register_histogram_vec!(
            "llm_router_upstream_latency_seconds",
            "Upstream call latency in seconds",
            &["provider"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
        )
        .expect("register upstream_latency");

        let keepalive_pings = register_int_counter_vec!(
            "llm_router_keepalive_pings_total",
            "Keep-alive pings by outcome",
            &["model", "host", "outcome"]
        )
        .expect("register keepalive_pings");

        Metrics {
            request_count,
            request_duration,
            provider_selections,
            selection_failures,
            upstream_latency,
            keepalive_pings,
        }
    })
}

/// Access the registry, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Render the default registry in the Prometheus text exposition format.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        let a = init_metrics() as *const Metrics;
        let b = init_metrics() as *const Metrics;
        assert_eq!(a, b);
    }

    #[test]
    fn test_counters_record() {
        let metrics = get_metrics();
        metrics
            .provider_selections
            .with_label_values(&["balanced", "m", "p1"])
            .inc();
        let rendered = render_metrics();
        assert!(rendered.contains("llm_router_provider_selections_total"));
    }

    #[test]
    fn test_render_metrics_is_text_format() {
        init_metrics();
        let rendered = render_metrics();
        assert!(rendered.contains("# TYPE"));
    }
}
