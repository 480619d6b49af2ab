//! Batch call envelope and per-call results.

use crate::error::{ErrorKind, GatewayError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One call in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CallRequest {
    pub unit_id: String,
    pub version: String,
    pub function_name: String,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub inputs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RunRequest {
    pub calls: Vec<CallRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CallError {
    pub code: ErrorKind,
    pub message: String,
}

/// Outcome of one call. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CallResult {
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
}

impl CallResult {
    pub fn success(output: Value) -> Self {
        Self {
            status: CallStatus::Success,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(err: &GatewayError) -> Self {
        Self {
            status: CallStatus::Failed,
            output: None,
            error: Some(CallError {
                code: err.kind(),
                message: err.detail().to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Completed,
    PartialSuccess,
}

impl BatchStatus {
    /// `COMPLETED` only when every call succeeded. There is no
    /// all-failed status.
    pub fn from_results(results: &[CallResult]) -> Self {
        if results.iter().all(CallResult::is_success) {
            BatchStatus::Completed
        } else {
            BatchStatus::PartialSuccess
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RunResponse {
    pub job_id: String,
    pub status: BatchStatus,
    pub results: Vec<CallResult>,
}
