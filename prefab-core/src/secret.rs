//! Secret vault records.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretStatus {
    #[default]
    Active,
    Disabled,
    Expired,
}

impl SecretStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SecretStatus::Active => "ACTIVE",
            SecretStatus::Disabled => "DISABLED",
            SecretStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, SecretStatusParseError> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(SecretStatus::Active),
            "DISABLED" => Ok(SecretStatus::Disabled),
            "EXPIRED" => Ok(SecretStatus::Expired),
            _ => Err(SecretStatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for SecretStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for SecretStatus {
    type Err = SecretStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid secret status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretStatusParseError(pub String);

impl fmt::Display for SecretStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid secret status: {}", self.0)
    }
}

impl std::error::Error for SecretStatusParseError {}

/// Unique address of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretKey {
    pub user_id: String,
    pub unit_id: String,
    pub secret_name: String,
}

impl SecretKey {
    pub fn new(
        user_id: impl Into<String>,
        unit_id: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            unit_id: unit_id.into(),
            secret_name: secret_name.into(),
        }
    }
}

/// Persisted secret. `encrypted_value` is an opaque envelope; the
/// plaintext never reaches this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub user_id: String,
    pub unit_id: String,
    pub secret_name: String,
    pub encrypted_value: String,
    pub encryption_key_id: String,
    pub description: Option<String>,
    pub status: SecretStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_used_at: Option<Timestamp>,
}

impl SecretRecord {
    pub fn key(&self) -> SecretKey {
        SecretKey::new(&self.user_id, &self.unit_id, &self.secret_name)
    }

    pub fn summary(&self) -> SecretSummary {
        SecretSummary {
            unit_id: self.unit_id.clone(),
            secret_name: self.secret_name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// Listing shape. Carries no ciphertext and no plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SecretSummary {
    pub unit_id: String,
    pub secret_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_used_at: Option<Timestamp>,
}
