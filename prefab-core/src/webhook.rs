//! Deployment webhook payloads and the persisted event ledger.

use crate::error::{GatewayError, PrefabResult};
use crate::spec::SpecKey;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source tag recorded for events from the build/deploy pipeline.
pub const FACTORY_SOURCE: &str = "factory";

/// Raw inbound payload. Every field is optional so that structural checks
/// produce a validation error instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WebhookPayload {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    #[serde(alias = "prefab_id")]
    pub unit_id: Option<String>,
    pub version: Option<String>,
    #[serde(alias = "knative_service_url")]
    pub endpoint_url: Option<String>,
    pub deployment_status: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub timestamp: Option<Value>,
}

/// Payload that passed structural validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentEvent {
    pub event_id: String,
    pub event_type: String,
    pub unit_id: String,
    pub version: String,
    pub endpoint_url: Option<String>,
    pub deployment_status: Option<String>,
}

fn required(field: &'static str, value: Option<String>) -> PrefabResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(GatewayError::Validation(format!(
            "webhook payload missing '{}'",
            field
        ))),
    }
}

impl WebhookPayload {
    pub fn validate(self) -> PrefabResult<DeploymentEvent> {
        Ok(DeploymentEvent {
            event_id: required("event_id", self.event_id)?,
            event_type: required("event_type", self.event_type)?,
            unit_id: required("unit_id", self.unit_id)?,
            version: required("version", self.version)?,
            endpoint_url: self.endpoint_url.filter(|u| !u.is_empty()),
            deployment_status: self.deployment_status,
        })
    }
}

impl DeploymentEvent {
    pub fn spec_key(&self) -> SpecKey {
        SpecKey::new(&self.unit_id, &self.version)
    }
}

/// Ledger row for one received event. Rows are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WebhookEvent {
    pub event_id: String,
    pub source: String,
    pub event_type: String,
    pub unit_id: String,
    pub version: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: Value,
    pub processed: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub processed_at: Option<Timestamp>,
    pub retry_count: i32,
    pub processing_error: Option<String>,
    pub signature: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub received_at: Timestamp,
    /// Response recorded at first successful processing.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub outcome: Option<Value>,
}

impl WebhookEvent {
    pub fn received(
        event: &DeploymentEvent,
        payload: Value,
        signature: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            event_id: event.event_id.clone(),
            source: FACTORY_SOURCE.to_string(),
            event_type: event.event_type.clone(),
            unit_id: event.unit_id.clone(),
            version: event.version.clone(),
            payload,
            processed: false,
            processed_at: None,
            retry_count: 0,
            processing_error: None,
            signature,
            received_at: now,
            outcome: None,
        }
    }
}
