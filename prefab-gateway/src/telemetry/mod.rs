//! Gateway Telemetry
//!
//! OpenTelemetry tracing and Prometheus metrics for the HTTP surface, the
//! orchestrator, the webhook processor and the workspace reclaimer.
//! Everything works without an OTLP collector.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics, metrics_handler, PrefabMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, shutdown_tracer, TelemetryConfig};
