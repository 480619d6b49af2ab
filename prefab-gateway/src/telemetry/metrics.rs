//! Prometheus Metrics Definitions
//!
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter,
    CounterVec, Encoder, Gauge, HistogramVec, IntCounter, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Downstream invocation latency buckets (seconds), up to the 30s timeout
const INVOKE_LATENCY_BUCKETS: &[f64] = &[0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<PrefabMetrics>> = Lazy::new(PrefabMetrics::new);

/// The registered metrics, or `None` when registration failed.
pub fn metrics() -> Option<&'static PrefabMetrics> {
    METRICS.as_ref().ok()
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

#[derive(Clone)]
pub struct PrefabMetrics {
    /// labels: method, path, status
    pub http_requests_total: CounterVec,

    /// labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// labels: status (SUCCESS/FAILED), code
    pub calls_total: CounterVec,

    /// labels: outcome (success/error)
    pub invoke_duration_seconds: HistogramVec,

    /// labels: tier (fast/durable/none)
    pub spec_cache_lookups_total: CounterVec,

    /// labels: outcome (applied/unchanged/rejected/ignored/duplicate/failed)
    pub webhook_events_total: CounterVec,

    pub workspace_bytes_reclaimed_total: IntCounter,

    /// Fraction of the workspace volume in use after the last sweep
    pub workspace_disk_utilization: Gauge,
}

impl PrefabMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "prefab_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "prefab_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            calls_total: register_counter_vec!(
                "prefab_calls_total",
                "Unit function calls by result",
                &["status", "code"]
            )
            .map_err(|e| registration_error("calls_total", e))?,

            invoke_duration_seconds: register_histogram_vec!(
                "prefab_invoke_duration_seconds",
                "Downstream unit invocation duration in seconds",
                &["outcome"],
                INVOKE_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("invoke_duration_seconds", e))?,

            spec_cache_lookups_total: register_counter_vec!(
                "prefab_spec_cache_lookups_total",
                "Spec lookups by the tier that answered",
                &["tier"]
            )
            .map_err(|e| registration_error("spec_cache_lookups_total", e))?,

            webhook_events_total: register_counter_vec!(
                "prefab_webhook_events_total",
                "Deployment webhook events by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("webhook_events_total", e))?,

            workspace_bytes_reclaimed_total: register_int_counter!(
                "prefab_workspace_bytes_reclaimed_total",
                "Bytes freed by the workspace reclaimer"
            )
            .map_err(|e| registration_error("workspace_bytes_reclaimed_total", e))?,

            workspace_disk_utilization: register_gauge!(
                "prefab_workspace_disk_utilization",
                "Workspace volume utilization after the last sweep (0.0 to 1.0)"
            )
            .map_err(|e| registration_error("workspace_disk_utilization", e))?,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// `code` is empty for successful calls.
    pub fn record_call(&self, status: &str, code: &str) {
        self.calls_total.with_label_values(&[status, code]).inc();
    }

    pub fn record_invoke(&self, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "error" };
        self.invoke_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn record_spec_lookup(&self, tier: &str) {
        self.spec_cache_lookups_total.with_label_values(&[tier]).inc();
    }

    pub fn record_webhook_event(&self, outcome: &str) {
        self.webhook_events_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_reclaim(&self, bytes_freed: u64, utilization: Option<f64>) {
        self.workspace_bytes_reclaimed_total.inc_by(bytes_freed);
        if let Some(u) = utilization {
            self.workspace_disk_utilization.set(u);
        }
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
))]
pub async fn metrics_handler() -> impl IntoResponse {
    // Registration happens on first touch; make sure the families exist.
    let _ = metrics();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered() -> Result<&'static PrefabMetrics, String> {
        METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))
    }

    #[test]
    fn test_record_http_request() -> Result<(), String> {
        let metrics = registered()?;
        metrics.record_http_request("GET", "/v1/secrets", 200, 0.015);
        let count = metrics
            .http_requests_total
            .with_label_values(&["GET", "/v1/secrets", "200"])
            .get();
        assert!(count >= 1.0);
        Ok(())
    }

    #[test]
    fn test_record_reclaim() -> Result<(), String> {
        let metrics = registered()?;
        let before = metrics.workspace_bytes_reclaimed_total.get();
        metrics.record_reclaim(4096, Some(0.42));
        assert_eq!(metrics.workspace_bytes_reclaimed_total.get(), before + 4096);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() -> Result<(), String> {
        registered()?.record_call("FAILED", "NOT_FOUND");
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("prefab_calls_total"));
        Ok(())
    }
}
