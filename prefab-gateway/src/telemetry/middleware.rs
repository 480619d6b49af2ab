//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Every request gets a server span (parented on an incoming W3C
//! `traceparent` when present) and is counted in Prometheus under its
//! route template.

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use once_cell::sync::Lazy;
use opentelemetry::{global, Context};
use opentelemetry_http::HeaderExtractor;
use regex::Regex;
use std::time::Instant;
use tracing::{field, info_span, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::metrics::metrics;

static UUID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}").ok()
});

static NUMERIC_ID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/\d+(/|$)").ok());

fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Replace UUIDs and numeric segments with `{id}` for unmatched paths.
fn normalize_path(path: &str) -> String {
    let mut result = path.to_string();
    if let Some(re) = UUID_PATTERN.as_ref() {
        result = re.replace_all(&result, "{id}").into_owned();
    }
    if let Some(re) = NUMERIC_ID_PATTERN.as_ref() {
        result = re.replace_all(&result, "/{id}$1").into_owned();
    }
    result
}

/// Route label for metrics and span names.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| normalize_path(request.uri().path()))
}

pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_label(&request);

    let span = info_span!(
        "http_request",
        otel.name = %format!("{} {}", method, route),
        otel.kind = "server",
        http.method = %method,
        http.target = %path,
        http.route = %route,
        http.status_code = field::Empty,
    );
    let _ = span.set_parent(extract_trace_context(request.headers()));

    let response = next.run(request).instrument(span.clone()).await;

    let duration = start.elapsed();
    let status = response.status();
    span.record("http.status_code", status.as_u16());

    if let Some(m) = metrics() {
        m.record_http_request(method.as_str(), &route, status.as_u16(), duration.as_secs_f64());
    }

    tracing::info!(
        parent: &span,
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}
