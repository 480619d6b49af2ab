//! Prefab Test Utilities
//!
//! Shared test infrastructure for the prefab workspace:
//! - Fixtures for the specs and webhook payloads the tests revolve around
//! - Fast-tier doubles for failure-path tests
//! - Proptest generators for core types

pub use prefab_core::{
    DeploymentEventType, DeploymentStatus, ErrorKind, FunctionDescriptor, GatewayError, Identity,
    ParamType, PrefabResult, SecretKey, SpecDocument, SpecKey, Timestamp, UnitSpec,
};
pub use prefab_storage::{
    CacheStats, FastCache, LocalFastCache, MemoryAuditLog, MemoryEventStore, MemoryGrantStore,
    MemorySecretStore, MemorySpecStore, StorageError, StorageResult,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::time::Duration;

// ============================================================================
// FIXTURES
// ============================================================================

/// `weather-api`: one function, `get_forecast(city, days?)`, needing the
/// caller's `API_KEY`.
pub fn weather_document() -> SpecDocument {
    from_json(json!({
        "name": "weather-api",
        "description": "Forecasts by city",
        "functions": [{
            "name": "get_forecast",
            "description": "Forecast for a city",
            "parameters": [
                {"name": "city", "type": "string"},
                {"name": "days", "type": "integer", "required": false}
            ],
            "returns": {"properties": {
                "summary": {"type": "string"}
            }},
            "secrets": [{"name": "API_KEY", "description": "Upstream weather API key"}]
        }]
    }))
}

/// `chart-renderer`: takes an `InputFile` and produces an `OutputFile`.
pub fn renderer_document() -> SpecDocument {
    from_json(json!({
        "name": "chart-renderer",
        "functions": [{
            "name": "render",
            "parameters": [
                {"name": "data", "type": "InputFile"},
                {"name": "title", "type": "string", "required": false}
            ],
            "returns": {"properties": {
                "chart": {"type": "OutputFile"},
                "title": {"type": "string"}
            }}
        }]
    }))
}

/// Body of a factory webhook delivery.
pub fn deployment_payload(
    event_id: &str,
    event_type: &str,
    unit_id: &str,
    version: &str,
    endpoint_url: Option<&str>,
) -> Value {
    let mut body = json!({
        "event_id": event_id,
        "event_type": event_type,
        "unit_id": unit_id,
        "version": version,
    });
    if let Some(url) = endpoint_url {
        body["endpoint_url"] = json!(url);
    }
    body
}

/// 2024-01-01T00:00:00Z.
pub fn fixed_time() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> T {
    match serde_json::from_value(value) {
        Ok(v) => v,
        Err(e) => panic!("fixture does not deserialize: {}", e),
    }
}

// ============================================================================
// FAST-TIER DOUBLES
// ============================================================================

/// Fast tier whose every operation fails, for fall-through tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingFastCache;

#[async_trait]
impl FastCache for FailingFastCache {
    async fn get(&self, _key: &str) -> StorageResult<Option<Vec<u8>>> {
        Err(StorageError::Unavailable("fast tier offline".to_string()))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> StorageResult<()> {
        Err(StorageError::Unavailable("fast tier offline".to_string()))
    }

    async fn delete(&self, _key: &str) -> StorageResult<bool> {
        Err(StorageError::Unavailable("fast tier offline".to_string()))
    }

    async fn stats(&self) -> StorageResult<CacheStats> {
        Err(StorageError::Unavailable("fast tier offline".to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for core prefab types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_deployment_status() -> impl Strategy<Value = DeploymentStatus> {
        prop_oneof![
            Just(DeploymentStatus::Pending),
            Just(DeploymentStatus::Building),
            Just(DeploymentStatus::Deploying),
            Just(DeploymentStatus::Deployed),
            Just(DeploymentStatus::Failed),
        ]
    }

    /// Factory event types, including ones the gateway does not act on.
    pub fn arb_event_type() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("build.started".to_string()),
            Just("deployment.started".to_string()),
            Just("deployment.success".to_string()),
            Just("deployment.failed".to_string()),
            "[a-z]{3,8}\\.[a-z]{3,8}",
        ]
    }

    /// Unit ids and user ids: lowercase, dash separated.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,10}(-[a-z0-9]{1,6}){0,2}"
    }

    pub fn arb_version() -> impl Strategy<Value = String> {
        (0u32..10, 0u32..20, 0u32..50).prop_map(|(a, b, c)| format!("{}.{}.{}", a, b, c))
    }

    pub fn arb_spec_key() -> impl Strategy<Value = SpecKey> {
        (arb_identifier(), arb_version()).prop_map(|(unit, version)| SpecKey::new(unit, version))
    }

    pub fn arb_secret_key() -> impl Strategy<Value = SecretKey> {
        (arb_identifier(), arb_identifier(), "[A-Z][A-Z0-9_]{0,15}")
            .prop_map(|(user, unit, name)| SecretKey::new(user, unit, name))
    }

    /// `s3://bucket/key` references.
    pub fn arb_object_uri() -> impl Strategy<Value = String> {
        (
            "[a-z][a-z0-9-]{2,10}",
            prop::collection::vec("[a-z0-9_]{1,8}", 1..4),
            prop_oneof![Just(""), Just(".png"), Just(".csv"), Just(".svg")],
        )
            .prop_map(|(bucket, parts, ext)| format!("s3://{}/{}{}", bucket, parts.join("/"), ext))
    }

    /// A declared parameter type with a value it accepts.
    pub fn arb_typed_value() -> impl Strategy<Value = (ParamType, Value)> {
        prop_oneof![
            ".{0,12}".prop_map(|s| (ParamType::String, json!(s))),
            any::<i64>().prop_map(|n| (ParamType::Integer, json!(n))),
            any::<i32>().prop_map(|n| (ParamType::Number, json!(f64::from(n) / 4.0))),
            any::<bool>().prop_map(|b| (ParamType::Boolean, json!(b))),
            prop::collection::vec(any::<u8>(), 0..4).prop_map(|v| (ParamType::Array, json!(v))),
            Just((ParamType::Object, json!({"k": 1}))),
            arb_object_uri().prop_map(|u| (ParamType::InputFile, json!(u))),
        ]
    }
}
