//! Prefab Core - Data Model
//!
//! Plain data types shared by the storage layer and the gateway: unit
//! specs and their deployment lifecycle, vault records, access grants,
//! webhook events, batch call envelopes, and the error taxonomy.
//! Nothing in this crate performs I/O.

use chrono::{DateTime, Utc};

pub mod audit;
pub mod call;
pub mod deployment;
pub mod error;
pub mod grant;
pub mod identity;
pub mod secret;
pub mod spec;
pub mod webhook;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use audit::{AuditEntry, AuditQuery};
pub use call::{BatchStatus, CallError, CallRequest, CallResult, CallStatus, RunRequest, RunResponse};
pub use deployment::{DeploymentEventType, DeploymentStatus, DeploymentStatusParseError};
pub use error::{ErrorKind, GatewayError, PrefabResult};
pub use grant::AccessGrant;
pub use identity::{Identity, ADMIN_SCOPE};
pub use secret::{SecretKey, SecretRecord, SecretStatus, SecretStatusParseError, SecretSummary};
pub use spec::{
    FunctionDescriptor, ParamDescriptor, ParamType, ReturnProperty, ReturnShape, SecretDescriptor,
    SpecDocument, SpecKey, SpecView, TransitionOutcome, UnitSpec, OUTPUT_FILE_TYPE,
};
pub use webhook::{DeploymentEvent, WebhookEvent, WebhookPayload, FACTORY_SOURCE};
