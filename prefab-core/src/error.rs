//! Error taxonomy for gateway operations

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable classification of a failure.
///
/// The serialized form is the wire code surfaced to callers, both in
/// top-level error responses and inside failed call results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ErrorKind {
    #[serde(rename = "AUTHENTICATION_ERROR")]
    Authentication,
    #[serde(rename = "PERMISSION_DENIED")]
    Authorization,
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "CONFIGURATION_ERROR")]
    Configuration,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    #[serde(rename = "INTEGRITY_ERROR")]
    Integrity,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorKind {
    /// Wire code for this kind.
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Authorization => "PERMISSION_DENIED",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Integrity => "INTEGRITY_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Master error type for gateway operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Authorization(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Ciphertext or stored data failed verification. Never swallowed.
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Authentication(_) => ErrorKind::Authentication,
            GatewayError::Authorization(_) => ErrorKind::Authorization,
            GatewayError::Validation(_) => ErrorKind::Validation,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::Configuration(_) => ErrorKind::Configuration,
            GatewayError::Unavailable(_) => ErrorKind::Unavailable,
            GatewayError::Integrity(_) => ErrorKind::Integrity,
            GatewayError::Storage(_) | GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The detail text without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            GatewayError::Authentication(m)
            | GatewayError::Authorization(m)
            | GatewayError::Validation(m)
            | GatewayError::NotFound(m)
            | GatewayError::Configuration(m)
            | GatewayError::Unavailable(m)
            | GatewayError::Integrity(m)
            | GatewayError::Storage(m)
            | GatewayError::Internal(m) => m,
        }
    }
}

/// Result type alias for gateway operations.
pub type PrefabResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_codes() {
        let json = serde_json::to_string(&ErrorKind::Authorization).unwrap();
        assert_eq!(json, "\"PERMISSION_DENIED\"");

        let kind: ErrorKind = serde_json::from_str("\"CONFIGURATION_ERROR\"").unwrap();
        assert_eq!(kind, ErrorKind::Configuration);
        assert_eq!(ErrorKind::NotFound.to_string(), "NOT_FOUND");
    }

    #[test]
    fn test_storage_errors_classify_as_internal() {
        let err = GatewayError::Storage("pool closed".to_string());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.detail(), "pool closed");
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::NotFound("spec weather-api@1.0.0".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Not found"));
        assert!(msg.contains("weather-api"));
    }
}
