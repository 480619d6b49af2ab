//! Router-level tests for the gateway
//!
//! Each test drives the assembled router (CORS, tracing, auth, audit and
//! the handlers) in-process, with memory stores and a scripted unit in
//! place of the downstream platform.

use axum::http::StatusCode;
use prefab_test_utils::deployment_payload;
use serde_json::{json, Value};

#[path = "support/app.rs"]
mod test_app_support;
use test_app_support::TestApp;

const PUBLISHER: &[&str] = &["spec:write"];
const ADMIN: &[&str] = &["admin"];

async fn publish(app: &TestApp, unit_id: &str, version: &str, document: Value) {
    let token = app.token("publisher", PUBLISHER);
    let uri = format!("/v1/prefabs/{}/{}/spec", unit_id, version);
    let (status, body) = app.post_json(&uri, &token, &document).await;
    assert_eq!(status, StatusCode::CREATED, "publish failed: {}", body);
}

fn weather_json() -> Value {
    serde_json::to_value(prefab_test_utils::weather_document()).unwrap()
}

fn renderer_json() -> Value {
    serde_json::to_value(prefab_test_utils::renderer_document()).unwrap()
}

fn forecast_call(version: &str) -> Value {
    json!({
        "unit_id": "weather-api",
        "version": version,
        "function_name": "get_forecast",
        "inputs": {"city": "Bergen", "days": 3}
    })
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_stored_api_key_reaches_the_unit() {
    let app = TestApp::new();
    publish(&app, "weather-api", "1.0.0", weather_json()).await;
    let alice = app.token("alice", &[]);

    let (status, _) = app
        .post_json(
            "/v1/secrets",
            &alice,
            &json!({
                "unit_id": "weather-api",
                "secret_name": "API_KEY",
                "secret_value": "wx-live-4242"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .post_json("/v1/run", &alice, &json!({"calls": [forecast_call("1.0.0")]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["results"][0]["status"], "SUCCESS");
    assert_eq!(body["results"][0]["output"]["summary"], "get_forecast ok");
    assert!(!body.to_string().contains("wx-live-4242"));

    let seen = app.unit.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].unit_id, "weather-api");
    assert_eq!(seen[0].secrets.get("API_KEY").map(String::as_str), Some("wx-live-4242"));
}

#[tokio::test]
async fn test_missing_secret_fails_only_that_call() {
    let app = TestApp::new();
    publish(&app, "weather-api", "1.0.0", weather_json()).await;
    let bob = app.token("bob", &[]);

    let (status, body) = app
        .post_json("/v1/run", &bob, &json!({"calls": [forecast_call("1.0.0")]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PARTIAL_SUCCESS");
    assert_eq!(body["results"][0]["error"]["code"], "CONFIGURATION_ERROR");
    assert!(app.unit.seen().is_empty());
}

#[tokio::test]
async fn test_unpublished_unit_yields_partial_success() {
    let app = TestApp::new();
    publish(&app, "weather-api", "1.0.0", weather_json()).await;
    let alice = app.token("alice", &[]);
    app.post_json(
        "/v1/secrets",
        &alice,
        &json!({"unit_id": "weather-api", "secret_name": "API_KEY", "secret_value": "k"}),
    )
    .await;

    let batch = json!({"calls": [forecast_call("1.0.0"), forecast_call("9.9.9")]});
    let (status, body) = app.post_json("/v1/run", &alice, &batch).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PARTIAL_SUCCESS");
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["status"], "SUCCESS");
    assert_eq!(results[1]["status"], "FAILED");
    assert_eq!(results[1]["error"]["code"], "NOT_FOUND");
    assert!(body["job_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn test_unavailable_unit_is_reported_per_call() {
    let app = TestApp::new();
    publish(&app, "weather-api", "1.0.0", weather_json()).await;
    let alice = app.token("alice", &[]);
    app.post_json(
        "/v1/secrets",
        &alice,
        &json!({"unit_id": "weather-api", "secret_name": "API_KEY", "secret_value": "k"}),
    )
    .await;
    app.unit.take_down("weather-api");

    let (status, body) = app
        .post_json("/v1/run", &alice, &json!({"calls": [forecast_call("1.0.0")]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["error"]["code"], "UNAVAILABLE");
}

#[tokio::test]
async fn test_duplicate_deployment_success_is_idempotent() {
    let app = TestApp::new();
    publish(&app, "weather-api", "1.0.0", weather_json()).await;
    let payload = deployment_payload(
        "evt-100",
        "deployment.success",
        "weather-api",
        "1.0.0",
        Some("http://weather-api.default.svc.cluster.local"),
    );

    let (status, first) = app.deliver_webhook(&payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "processed");
    assert_eq!(first["outcome"]["transition"], "applied");
    assert_eq!(first["outcome"]["deployment_status"], "DEPLOYED");

    let (status, second) = app.deliver_webhook(&payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "already_processed");
    assert_eq!(second["outcome"], first["outcome"]);

    let admin = app.token("ops", ADMIN);
    let (status, listing) = app.get("/v1/admin/prefabs?status=DEPLOYED", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    assert_eq!(
        listing["prefabs"][0]["endpoint_url"],
        "http://weather-api.default.svc.cluster.local"
    );

    let reader = app.token("alice", &[]);
    let (status, event) = app.get("/webhooks/events/evt-100", Some(&reader)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["processed"], true);
    assert_eq!(event["retry_count"], 0);
}

#[tokio::test]
async fn test_denied_input_file_never_reaches_the_unit() {
    let app = TestApp::new();
    publish(&app, "chart-renderer", "2.0.0", renderer_json()).await;
    let mallory = app.token("mallory", &[]);

    let batch = json!({"calls": [{
        "unit_id": "chart-renderer",
        "version": "2.0.0",
        "function_name": "render",
        "inputs": {"data": "s3://outputs/alice/sales.csv"}
    }]});
    let (status, body) = app.post_json("/v1/run", &mallory, &batch).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PARTIAL_SUCCESS");
    assert_eq!(body["results"][0]["error"]["code"], "PERMISSION_DENIED");
    assert!(app.unit.seen().is_empty());
}

// ============================================================================
// REQUEST-LEVEL ERRORS
// ============================================================================

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let app = TestApp::new();
    let token = app.token("alice", &[]);
    let (status, body) = app.post_json("/v1/run", &token, &json!({"calls": []})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_v1_requires_bearer_token() {
    let app = TestApp::new();
    let (status, body) = app.get("/v1/secrets", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTHENTICATION_ERROR");

    let (status, _) = app.get("/v1/secrets", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/webhooks/events/evt-1", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_require_admin_scope() {
    let app = TestApp::new();
    let user = app.token("alice", &["spec:write"]);
    let (status, body) = app.get("/v1/admin/prefabs", Some(&user)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "PERMISSION_DENIED");

    let admin = app.token("ops", ADMIN);
    let (status, body) = app.get("/v1/admin/prefabs", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, _) = app.get("/v1/admin/prefabs?status=SHIPPED", Some(&admin)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_publish_requires_spec_write_scope() {
    let app = TestApp::new();
    let token = app.token("alice", &[]);
    let (status, _) = app
        .post_json("/v1/prefabs/weather-api/1.0.0/spec", &token, &weather_json())
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/v1/prefabs/weather-api/1.0.0/spec", Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_published_spec_is_readable() {
    let app = TestApp::new();
    publish(&app, "weather-api", "1.0.0", weather_json()).await;
    let token = app.token("alice", &[]);

    let (status, body) = app.get("/v1/prefabs/weather-api/1.0.0/spec", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unit_id"], "weather-api");
    assert_eq!(body["functions"][0]["name"], "get_forecast");
    assert!(body.get("deployment_status").is_none());
}

#[tokio::test]
async fn test_unsigned_webhook_is_rejected() {
    let app = TestApp::new();
    let payload = deployment_payload("evt-7", "deployment.success", "weather-api", "1.0.0", None);
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/webhooks/factory")
        .header("content-type", "application/json")
        .header("x-webhook-signature", "00ff")
        .body(axum::body::Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTHENTICATION_ERROR");

    let admin = app.token("ops", ADMIN);
    let (status, _) = app.get("/webhooks/events/evt-7", Some(&admin)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// SECRETS, GRANTS, AUDIT
// ============================================================================

#[tokio::test]
async fn test_secret_listing_never_exposes_values() {
    let app = TestApp::new();
    let alice = app.token("alice", &[]);
    for (unit, name, value) in [
        ("weather-api", "API_KEY", "first-value"),
        ("weather-api", "API_KEY", "second-value"),
        ("chart-renderer", "LICENSE", "third-value"),
    ] {
        let (status, _) = app
            .post_json(
                "/v1/secrets",
                &alice,
                &json!({"unit_id": unit, "secret_name": name, "secret_value": value}),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, all) = app.get("/v1/secrets", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["total"], 2);
    let text = all.to_string();
    assert!(!text.contains("value"), "listing leaked a value: {}", text);

    let (_, weather) = app.get("/v1/secrets/weather-api", Some(&alice)).await;
    assert_eq!(weather["total"], 1);
    assert_eq!(weather["secrets"][0]["secret_name"], "API_KEY");

    let (_, filtered) = app.get("/v1/secrets?unit_id=chart-renderer", Some(&alice)).await;
    assert_eq!(filtered["total"], 1);

    let bob = app.token("bob", &[]);
    let (_, others) = app.get("/v1/secrets", Some(&bob)).await;
    assert_eq!(others["total"], 0);

    let request = axum::http::Request::builder()
        .method("DELETE")
        .uri("/v1/secrets/weather-api/API_KEY")
        .header("authorization", format!("Bearer {}", alice))
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, weather) = app.get("/v1/secrets/weather-api", Some(&alice)).await;
    assert_eq!(weather["total"], 0);
}

#[tokio::test]
async fn test_admin_grant_lifecycle() {
    let app = TestApp::new();
    let admin = app.token("ops", ADMIN);
    let alice = app.token("alice", &[]);
    let grant = json!({"user_id": "alice", "resource_uri": "s3://outputs/shared/report.pdf"});

    let (status, _) = app.post_json("/v1/admin/grants", &admin, &grant).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, files) = app.get("/v1/files", Some(&alice)).await;
    assert_eq!(files["total"], 1);
    assert_eq!(files["files"][0]["resource_uri"], "s3://outputs/shared/report.pdf");

    let (status, _) = app.send_json("DELETE", "/v1/admin/grants", &admin, &grant).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.send_json("DELETE", "/v1/admin/grants", &admin, &grant).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, files) = app.get("/v1/files", Some(&alice)).await;
    assert_eq!(files["total"], 0);
}

#[tokio::test]
async fn test_authenticated_requests_are_audited() {
    let app = TestApp::new();
    let alice = app.token("alice", &[]);
    app.get("/v1/files", Some(&alice)).await;
    app.get("/v1/prefabs/missing/1.0.0/spec", Some(&alice)).await;

    let admin = app.token("ops", ADMIN);
    let (status, body) = app.get("/v1/admin/audit?user_id=alice", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries[0]["success"], false);
    assert_eq!(entries[0]["error_code"], "404");
    assert_eq!(entries[1]["endpoint"], "/v1/files");
    assert_eq!(entries[1]["success"], true);
}

#[tokio::test]
async fn test_vault_reencrypt_reports_current_key() {
    let app = TestApp::new();
    let admin = app.token("ops", ADMIN);
    let (status, body) = app
        .post_json("/v1/admin/vault/reencrypt", &admin, &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rewritten"], 0);
    assert_eq!(body["key_id"], app.state.vault.current_key_id());
}

// ============================================================================
// PUBLIC ROUTES
// ============================================================================

#[tokio::test]
async fn test_public_routes_need_no_token() {
    let app = TestApp::new();

    let (status, body) = app.get("/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "prefab-gateway");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["workspace_mode"], "staging");

    let (status, body) = app.get("/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.get("/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["details"]["spec_cache"]["backend"], "local");
    assert!(body["details"]["database"].is_null());

    let (status, _) = app.get("/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}
