//! Deployment lifecycle of a unit.
//!
//! Status only moves through [`DeploymentStatus::can_transition_to`]; the
//! webhook pipeline is the single writer. The lifecycle is
//! `PENDING -> BUILDING -> DEPLOYING -> {DEPLOYED | FAILED}`, and a new
//! deployment moves a settled unit back to `DEPLOYING`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment status of a `(unit_id, version)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Building,
    Deploying,
    Deployed,
    Failed,
}

impl DeploymentStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Building => "BUILDING",
            DeploymentStatus::Deploying => "DEPLOYING",
            DeploymentStatus::Deployed => "DEPLOYED",
            DeploymentStatus::Failed => "FAILED",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, DeploymentStatusParseError> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DeploymentStatus::Pending),
            "BUILDING" => Ok(DeploymentStatus::Building),
            "DEPLOYING" => Ok(DeploymentStatus::Deploying),
            "DEPLOYED" => Ok(DeploymentStatus::Deployed),
            "FAILED" => Ok(DeploymentStatus::Failed),
            _ => Err(DeploymentStatusParseError(s.to_string())),
        }
    }

    /// Settled states only leave through a new deployment.
    pub fn is_settled(&self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }

    /// Whether `self -> next` is a legal move.
    ///
    /// Staying in the current state is always legal; callers treat it as a
    /// no-op. Skipping forward is allowed since the pipeline may not emit
    /// every intermediate event.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        if *self == next {
            return true;
        }
        match (self, next) {
            (Pending, Building | Deploying | Deployed | Failed) => true,
            (Building, Deploying | Deployed | Failed) => true,
            (Deploying, Deployed | Failed) => true,
            (Deployed | Failed, Deploying) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = DeploymentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid deployment status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatusParseError(pub String);

impl fmt::Display for DeploymentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid deployment status: {}", self.0)
    }
}

impl std::error::Error for DeploymentStatusParseError {}

/// Lifecycle event types emitted by the build/deploy pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeploymentEventType {
    BuildStarted,
    DeploymentStarted,
    DeploymentSucceeded,
    DeploymentFailed,
    /// Recorded for the audit trail but never drives a transition.
    Unrecognized(String),
}

impl DeploymentEventType {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "build.started" => DeploymentEventType::BuildStarted,
            "deployment.started" => DeploymentEventType::DeploymentStarted,
            "deployment.success" => DeploymentEventType::DeploymentSucceeded,
            "deployment.failed" => DeploymentEventType::DeploymentFailed,
            other => DeploymentEventType::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeploymentEventType::BuildStarted => "build.started",
            DeploymentEventType::DeploymentStarted => "deployment.started",
            DeploymentEventType::DeploymentSucceeded => "deployment.success",
            DeploymentEventType::DeploymentFailed => "deployment.failed",
            DeploymentEventType::Unrecognized(s) => s,
        }
    }

    /// Target status this event drives, if any.
    pub fn target_status(&self) -> Option<DeploymentStatus> {
        match self {
            DeploymentEventType::BuildStarted => Some(DeploymentStatus::Building),
            DeploymentEventType::DeploymentStarted => Some(DeploymentStatus::Deploying),
            DeploymentEventType::DeploymentSucceeded => Some(DeploymentStatus::Deployed),
            DeploymentEventType::DeploymentFailed => Some(DeploymentStatus::Failed),
            DeploymentEventType::Unrecognized(_) => None,
        }
    }
}

impl fmt::Display for DeploymentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
