//! Deployment webhook processing.
//!
//! The build pipeline reports lifecycle changes for `(unit_id, version)`.
//! Each event is authenticated, validated, recorded in the event ledger and
//! applied to the spec's deployment status exactly once: a redelivered
//! event that was already processed returns the outcome stored the first
//! time.

use chrono::Utc;
use hmac::{Hmac, Mac};
use prefab_core::{
    DeploymentEvent, DeploymentEventType, GatewayError, PrefabResult, TransitionOutcome,
    WebhookEvent, WebhookPayload,
};
use prefab_storage::EventStore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::spec_cache::SpecCache;
use crate::telemetry::metrics;

type HmacSha256 = Hmac<Sha256>;

/// Body returned to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WebhookAck {
    /// `processed` or `already_processed`
    pub status: String,
    pub event_id: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub outcome: Value,
}

impl WebhookAck {
    fn processed(event_id: &str, outcome: Value) -> Self {
        Self {
            status: "processed".to_string(),
            event_id: event_id.to_string(),
            outcome,
        }
    }

    fn already_processed(event: &WebhookEvent) -> Self {
        Self {
            status: "already_processed".to_string(),
            event_id: event.event_id.clone(),
            outcome: event.outcome.clone().unwrap_or(Value::Null),
        }
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> PrefabResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| GatewayError::Internal("Failed to initialize HMAC".to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub struct WebhookProcessor {
    events: Arc<dyn EventStore>,
    specs: Arc<SpecCache>,
    secret: Option<SecretString>,
    /// One lock per event id with a delivery in flight in this process.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WebhookProcessor {
    /// `secret: None` accepts unsigned deliveries.
    pub fn new(
        events: Arc<dyn EventStore>,
        specs: Arc<SpecCache>,
        secret: Option<SecretString>,
    ) -> Self {
        Self {
            events,
            specs,
            secret,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Constant-time check of the hex signature over the raw body.
    pub fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> PrefabResult<()> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Authentication("missing webhook signature".to_string()))?;
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected = hex::decode(signature).map_err(|_| {
            GatewayError::Authentication("invalid webhook signature encoding".to_string())
        })?;

        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|_| GatewayError::Internal("Failed to initialize HMAC".to_string()))?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| GatewayError::Authentication("invalid webhook signature".to_string()))
    }

    /// Authenticate, parse and process one raw delivery.
    pub async fn ingest(&self, body: &[u8], signature: Option<&str>) -> PrefabResult<WebhookAck> {
        self.verify_signature(body, signature)?;

        let raw: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::Validation(format!("malformed webhook body: {}", e)))?;
        let payload: WebhookPayload = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Validation(format!("malformed webhook body: {}", e)))?;
        let event = payload.validate()?;

        self.process(event, raw, signature.map(str::to_string)).await
    }

    /// Record and apply a validated event.
    ///
    /// Concurrent deliveries of one event id are serialized within the
    /// process. Across replicas the conditional `mark_processed` picks a
    /// single winner and every other delivery reports its outcome.
    pub async fn process(
        &self,
        event: DeploymentEvent,
        raw: Value,
        signature: Option<String>,
    ) -> PrefabResult<WebhookAck> {
        let event_id = event.event_id.clone();
        let lock = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.entry(event_id.clone()).or_default().clone()
        };
        let result = {
            let _guard = lock.lock().await;
            self.process_exclusive(event, raw, signature).await
        };

        let mut in_flight = self.in_flight.lock().await;
        // The map and `lock` are the only holders once nobody else waits.
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(&event_id);
        }
        result
    }

    async fn process_exclusive(
        &self,
        event: DeploymentEvent,
        raw: Value,
        signature: Option<String>,
    ) -> PrefabResult<WebhookAck> {
        if let Some(existing) = self.events.get(&event.event_id).await? {
            if existing.processed {
                tracing::info!(event_id = %event.event_id, "Duplicate webhook event");
                record_outcome("duplicate");
                return Ok(WebhookAck::already_processed(&existing));
            }
        }

        let stored = self
            .events
            .insert_if_absent(&WebhookEvent::received(&event, raw, signature, Utc::now()))
            .await?;
        if stored.processed {
            record_outcome("duplicate");
            return Ok(WebhookAck::already_processed(&stored));
        }

        match self.apply(&event).await {
            Ok(outcome) => {
                let won = self
                    .events
                    .mark_processed(&event.event_id, Utc::now(), &outcome)
                    .await?;
                if won {
                    return Ok(WebhookAck::processed(&event.event_id, outcome));
                }
                tracing::info!(event_id = %event.event_id, "Webhook event processed concurrently elsewhere");
                record_outcome("duplicate");
                let stored = self.events.get(&event.event_id).await?.ok_or_else(|| {
                    GatewayError::Internal(format!(
                        "webhook event {} vanished after processing",
                        event.event_id
                    ))
                })?;
                Ok(WebhookAck::already_processed(&stored))
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook processing failed"
                );
                if let Err(record_err) = self
                    .events
                    .record_failure(&event.event_id, e.detail())
                    .await
                {
                    tracing::error!(
                        event_id = %event.event_id,
                        error = %record_err,
                        "Failed to record webhook failure"
                    );
                }
                record_outcome("failed");
                Err(e)
            }
        }
    }

    async fn apply(&self, event: &DeploymentEvent) -> PrefabResult<Value> {
        let event_type = DeploymentEventType::parse(&event.event_type);
        let Some(target) = event_type.target_status() else {
            tracing::info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Ignoring unrecognized webhook event type"
            );
            record_outcome("ignored");
            return Ok(json!({
                "transition": "none",
                "reason": "unrecognized event type",
                "event_type": event.event_type,
            }));
        };

        let key = event.spec_key();
        let (outcome, spec) = self
            .specs
            .apply_transition(&key, target, event.endpoint_url.as_deref(), Utc::now())
            .await?;

        let mut value = match outcome {
            TransitionOutcome::Applied { from, to } => {
                tracing::info!(spec = %key, %from, %to, event_id = %event.event_id, "Deployment status changed");
                record_outcome("applied");
                json!({"transition": "applied", "from": from, "to": to})
            }
            TransitionOutcome::Unchanged(status) => {
                record_outcome("unchanged");
                json!({"transition": "unchanged", "status": status})
            }
            TransitionOutcome::Rejected { from, to } => {
                tracing::warn!(
                    spec = %key,
                    %from,
                    %to,
                    event_id = %event.event_id,
                    "Rejected invalid deployment transition"
                );
                record_outcome("rejected");
                json!({"transition": "rejected", "from": from, "to": to})
            }
        };

        if let Value::Object(map) = &mut value {
            map.insert("unit_id".to_string(), json!(spec.unit_id));
            map.insert("version".to_string(), json!(spec.version));
            map.insert("deployment_status".to_string(), json!(spec.deployment_status));
            if let Some(url) = &spec.endpoint_url {
                map.insert("endpoint_url".to_string(), json!(url));
            }
        }
        Ok(value)
    }

    pub async fn get_event(&self, event_id: &str) -> PrefabResult<Option<WebhookEvent>> {
        Ok(self.events.get(event_id).await?)
    }
}

fn record_outcome(outcome: &str) {
    if let Some(m) = metrics() {
        m.record_webhook_event(outcome);
    }
}
