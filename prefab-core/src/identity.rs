//! Caller identity derived from a verified bearer token.

use crate::error::{GatewayError, PrefabResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scope that satisfies every scope check.
pub const ADMIN_SCOPE: &str = "admin";

/// Per-request identity. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: Option<String>,
    pub scopes: BTreeSet<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn is_admin(&self) -> bool {
        self.scopes.contains(ADMIN_SCOPE)
    }

    /// True when the identity holds `scope` or the admin override.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.is_admin() || self.scopes.contains(scope)
    }

    pub fn require_scope(&self, scope: &str) -> PrefabResult<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(GatewayError::Authorization(format!(
                "scope '{}' required",
                scope
            )))
        }
    }
}
