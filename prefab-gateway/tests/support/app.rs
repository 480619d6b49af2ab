//! In-process gateway for router-level tests.
//!
//! Memory stores, a local object store and a scripted unit in place of the
//! downstream platform. Requests go through the full middleware stack via
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use prefab_core::{GatewayError, PrefabResult};
use prefab_gateway::{
    create_api_router, generate_jwt_token, AppState, AuthConfig, Claims, Collaborators,
    GatewayConfig, LocalObjectStore, ResolvedSecrets, Stores, UnitInvoker, WorkspaceConfig,
};
use prefab_storage::LocalFastCache;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "router-test-secret-with-enough-length-0123456789";
pub const WEBHOOK_SECRET: &str = "whsec-router-test";

/// One downstream invocation as the unit received it.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub unit_id: String,
    pub function_name: String,
    pub inputs: Map<String, Value>,
    pub secrets: BTreeMap<String, String>,
}

/// Unit double that echoes its inputs and records every invocation.
#[derive(Default)]
pub struct ScriptedUnit {
    seen: Mutex<Vec<Invocation>>,
    unavailable: Mutex<Vec<String>>,
}

impl ScriptedUnit {
    pub fn seen(&self) -> Vec<Invocation> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Make every call to `unit_id` fail as if the unit were down.
    pub fn take_down(&self, unit_id: &str) {
        if let Ok(mut down) = self.unavailable.lock() {
            down.push(unit_id.to_string());
        }
    }
}

#[async_trait]
impl UnitInvoker for ScriptedUnit {
    async fn invoke(
        &self,
        unit_id: &str,
        function_name: &str,
        inputs: &Map<String, Value>,
        secrets: &ResolvedSecrets,
    ) -> PrefabResult<Value> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(Invocation {
                unit_id: unit_id.to_string(),
                function_name: function_name.to_string(),
                inputs: inputs.clone(),
                secrets: secrets
                    .iter()
                    .map(|(k, v)| (k.clone(), v.expose_secret().to_string()))
                    .collect(),
            });
        }
        let down = self
            .unavailable
            .lock()
            .map(|d| d.iter().any(|u| u == unit_id))
            .unwrap_or(false);
        if down {
            return Err(GatewayError::Unavailable(format!("{} is not responding", unit_id)));
        }
        Ok(json!({"summary": format!("{} ok", function_name), "echo": inputs}))
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub unit: Arc<ScriptedUnit>,
    pub auth: AuthConfig,
    pub dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let auth = AuthConfig::default().with_secret(JWT_SECRET);
        let config = GatewayConfig {
            webhook_secret: Some(SecretString::from(WEBHOOK_SECRET)),
            encryption_key: SecretString::from("router-test-encryption-key"),
            workspace: WorkspaceConfig {
                root: Some(dir.path().join("jobs")),
                ..WorkspaceConfig::default()
            },
            ..GatewayConfig::default()
        };
        let unit = Arc::new(ScriptedUnit::default());
        let collaborators = Collaborators {
            fast_cache: Arc::new(LocalFastCache::new()),
            object_store: Arc::new(LocalObjectStore::new(dir.path().join("objects"), "outputs")),
            invoker: unit.clone(),
        };
        let state = AppState::new(config, auth.clone(), Stores::memory(), collaborators);
        let router = create_api_router(state.clone()).unwrap();
        Self {
            router,
            state,
            unit,
            auth,
            dir,
        }
    }

    pub fn token(&self, user_id: &str, scopes: &[&str]) -> String {
        let claims = Claims::new(user_id, &self.auth).with_scopes(scopes.iter().copied());
        generate_jwt_token(&self.auth, &claims).unwrap()
    }

    /// Send a request and return the status and the JSON body (`Null` when
    /// the body is empty).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, token: &str, body: &Value) -> (StatusCode, Value) {
        self.send_json("POST", uri, token, body).await
    }

    pub async fn send_json(
        &self,
        method: &str,
        uri: &str,
        token: &str,
        body: &Value,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Deliver a signed factory webhook.
    pub async fn deliver_webhook(&self, payload: &Value) -> (StatusCode, Value) {
        let body = payload.to_string();
        let signature = prefab_gateway::sign_body(WEBHOOK_SECRET, body.as_bytes()).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/factory")
            .header("content-type", "application/json")
            .header("x-webhook-signature", signature)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }
}
