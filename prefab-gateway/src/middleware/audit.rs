//! Request audit trail.
//!
//! Appends one [`AuditEntry`] per authenticated `/v1` request once the
//! handler has answered. A failed append is logged and never changes the
//! response.

use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderName,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use prefab_core::{AuditEntry, Identity};
use prefab_storage::AuditLog;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct AuditState {
    pub log: Arc<dyn AuditLog>,
}

impl AuditState {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }
}

/// Must run inside [`super::auth_middleware`] so the caller is known.
pub async fn audit_middleware(
    State(state): State<AuditState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let user_id = request
        .extensions()
        .get::<Identity>()
        .map(|i| i.user_id.clone());
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let (resource_type, resource_id) = classify(request.uri().path());

    let response = next.run(request).await;

    let status = response.status();
    let entry = AuditEntry {
        id: Uuid::new_v4(),
        request_id,
        user_id,
        action: format!("{} {}", method, endpoint),
        resource_type,
        resource_id,
        endpoint,
        method,
        success: status.is_success(),
        error_code: (!status.is_success()).then(|| status.as_u16().to_string()),
        duration_ms: started.elapsed().as_millis() as i64,
        created_at: Utc::now(),
    };
    if let Err(e) = state.log.append(&entry).await {
        tracing::warn!(request_id = %entry.request_id, error = %e, "Failed to write audit entry");
    }
    response
}

/// Resource type and id from a concrete `/v1/...` path.
///
/// `/v1/secrets/weather-api/API_KEY` → (`secrets`, `weather-api/API_KEY`);
/// `/v1/admin/prefabs/x/1.0` → (`prefabs`, `x/1.0`).
fn classify(path: &str) -> (String, Option<String>) {
    let mut segments = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .skip_while(|s| *s == "v1" || *s == "admin");
    let resource_type = segments.next().unwrap_or("unknown").to_string();
    let rest: Vec<&str> = segments.filter(|s| *s != "spec").collect();
    let resource_id = (!rest.is_empty()).then(|| rest.join("/"));
    (resource_type, resource_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use prefab_core::AuditQuery;
    use prefab_storage::MemoryAuditLog;
    use tower::ServiceExt;

    #[test]
    fn test_classify() {
        assert_eq!(classify("/v1/run"), ("run".to_string(), None));
        assert_eq!(
            classify("/v1/secrets/weather-api/API_KEY"),
            ("secrets".to_string(), Some("weather-api/API_KEY".to_string()))
        );
        assert_eq!(
            classify("/v1/prefabs/weather-api/1.0.0/spec"),
            ("prefabs".to_string(), Some("weather-api/1.0.0".to_string()))
        );
        assert_eq!(classify("/v1/admin/audit"), ("audit".to_string(), None));
    }

    #[tokio::test]
    async fn test_entries_are_appended() {
        let log = Arc::new(MemoryAuditLog::new());
        let app = Router::new()
            .route("/v1/secrets/:unit_id", get(|| async { StatusCode::OK }))
            .route("/v1/files", get(|| async { StatusCode::FORBIDDEN }))
            .layer(from_fn_with_state(AuditState::new(log.clone()), audit_middleware))
            .layer(axum::middleware::from_fn(|mut req: Request, next: Next| async move {
                req.extensions_mut().insert(Identity::new("user-1"));
                next.run(req).await
            }));

        let request = Request::builder()
            .uri("/v1/secrets/weather-api")
            .header("x-request-id", "req-42")
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap();
        let request = Request::builder().uri("/v1/files").body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap();

        let entries = log.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first.
        assert!(!entries[0].success);
        assert_eq!(entries[0].error_code.as_deref(), Some("403"));
        assert_eq!(entries[1].request_id, "req-42");
        assert_eq!(entries[1].user_id.as_deref(), Some("user-1"));
        assert_eq!(entries[1].endpoint, "/v1/secrets/:unit_id");
        assert_eq!(entries[1].action, "GET /v1/secrets/:unit_id");
        assert_eq!(entries[1].resource_id.as_deref(), Some("weather-api"));
    }
}
