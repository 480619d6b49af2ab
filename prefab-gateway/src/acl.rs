//! Resource access control.
//!
//! Grants are exact `(user, resource_uri)` memberships. Ownership is
//! granted when the gateway uploads an output file on a user's behalf, or by
//! an administrator.

use chrono::Utc;
use prefab_core::{AccessGrant, GatewayError, PrefabResult};
use prefab_storage::GrantStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct Acl {
    store: Arc<dyn GrantStore>,
}

impl Acl {
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self { store }
    }

    pub async fn can_read(&self, user_id: &str, resource_uri: &str) -> PrefabResult<bool> {
        Ok(self.store.contains(user_id, resource_uri).await?)
    }

    /// Write access is not modelled separately from read access.
    pub async fn can_write(&self, user_id: &str, resource_uri: &str) -> PrefabResult<bool> {
        self.can_read(user_id, resource_uri).await
    }

    /// Fails with a permission error unless `user_id` may read `resource_uri`.
    pub async fn require_read(&self, user_id: &str, resource_uri: &str) -> PrefabResult<()> {
        if self.can_read(user_id, resource_uri).await? {
            Ok(())
        } else {
            tracing::warn!(user_id, resource_uri, "Denied file access");
            Err(GatewayError::Authorization(format!(
                "no access to {}",
                resource_uri
            )))
        }
    }

    /// Idempotent.
    pub async fn grant_ownership(&self, user_id: &str, resource_uri: &str) -> PrefabResult<()> {
        if resource_uri.trim().is_empty() {
            return Err(GatewayError::Validation(
                "resource_uri must not be empty".to_string(),
            ));
        }
        if self.store.grant(user_id, resource_uri, Utc::now()).await? {
            tracing::debug!(user_id, resource_uri, "Granted ownership");
        }
        Ok(())
    }

    /// Returns whether a grant existed.
    pub async fn revoke(&self, user_id: &str, resource_uri: &str) -> PrefabResult<bool> {
        Ok(self.store.revoke(user_id, resource_uri).await?)
    }

    pub async fn list(&self, user_id: &str) -> PrefabResult<Vec<AccessGrant>> {
        Ok(self.store.list(user_id).await?)
    }
}
