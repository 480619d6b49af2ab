//! Per-user secret vault.
//!
//! Values are encrypted by the [`KeyRing`] before they reach the
//! [`SecretStore`]; nothing here persists or logs plaintext.

use crate::crypto::KeyRing;
use chrono::Utc;
use prefab_core::{
    GatewayError, PrefabResult, SecretKey, SecretRecord, SecretStatus, SecretSummary,
};
use prefab_storage::SecretStore;
use secrecy::SecretString;
use std::sync::Arc;

pub struct Vault {
    store: Arc<dyn SecretStore>,
    keys: KeyRing,
}

impl Vault {
    pub fn new(store: Arc<dyn SecretStore>, keys: KeyRing) -> Self {
        Self { store, keys }
    }

    pub fn current_key_id(&self) -> &str {
        self.keys.current_key_id()
    }

    /// Encrypt and upsert. The row is always left ACTIVE.
    pub async fn store(
        &self,
        key: &SecretKey,
        value: &str,
        description: Option<String>,
    ) -> PrefabResult<()> {
        validate_key(key)?;
        let now = Utc::now();
        let record = SecretRecord {
            user_id: key.user_id.clone(),
            unit_id: key.unit_id.clone(),
            secret_name: key.secret_name.clone(),
            encrypted_value: self.keys.encrypt(value)?,
            encryption_key_id: self.keys.current_key_id().to_string(),
            description,
            status: SecretStatus::Active,
            created_at: now,
            updated_at: now,
            last_used_at: None,
        };
        self.store.upsert(record).await?;
        tracing::info!(
            user_id = %key.user_id,
            unit_id = %key.unit_id,
            secret_name = %key.secret_name,
            "Stored secret"
        );
        Ok(())
    }

    /// Decrypt an active secret. Absence is `None`; a value that cannot be
    /// decrypted is an integrity error.
    pub async fn get(&self, key: &SecretKey) -> PrefabResult<Option<SecretString>> {
        let Some(record) = self.store.get_active(key).await? else {
            return Ok(None);
        };
        let value = self.keys.decrypt(&record.encrypted_value).inspect_err(|e| {
            tracing::error!(
                user_id = %key.user_id,
                unit_id = %key.unit_id,
                secret_name = %key.secret_name,
                error = %e,
                "Stored secret failed decryption"
            );
        })?;

        if let Err(e) = self.store.touch(key, Utc::now()).await {
            tracing::warn!(secret_name = %key.secret_name, error = %e, "Failed to record secret use");
        }
        Ok(Some(value))
    }

    /// Soft delete. Deleting an absent or already disabled secret succeeds.
    pub async fn delete(&self, key: &SecretKey) -> PrefabResult<()> {
        if self.store.disable(key, Utc::now()).await? {
            tracing::info!(
                user_id = %key.user_id,
                unit_id = %key.unit_id,
                secret_name = %key.secret_name,
                "Disabled secret"
            );
        }
        Ok(())
    }

    /// Metadata of the caller's active secrets. Never decrypts.
    pub async fn list(
        &self,
        user_id: &str,
        unit_id: Option<&str>,
    ) -> PrefabResult<Vec<SecretSummary>> {
        let records = self.store.list_active(user_id, unit_id).await?;
        Ok(records.iter().map(SecretRecord::summary).collect())
    }

    /// Re-encrypt every record not under the current key. Returns the
    /// number of rows rewritten.
    pub async fn reencrypt_all(&self) -> PrefabResult<usize> {
        let current = self.keys.current_key_id().to_string();
        let stale = self.store.list_not_under_key(&current).await?;
        let mut rewritten = 0;
        for record in stale {
            let plaintext = self.keys.decrypt(&record.encrypted_value)?;
            let envelope = self
                .keys
                .current()
                .encrypt(secrecy::ExposeSecret::expose_secret(&plaintext))?;
            let replaced = self
                .store
                .replace_ciphertext(
                    &record.key(),
                    &record.encrypted_value,
                    &envelope,
                    &current,
                    Utc::now(),
                )
                .await?;
            if replaced {
                rewritten += 1;
            } else {
                tracing::debug!(
                    user_id = %record.user_id,
                    unit_id = %record.unit_id,
                    secret_name = %record.secret_name,
                    "Secret changed during re-encryption; left as written"
                );
            }
        }
        tracing::info!(rewritten, key_id = %current, "Re-encrypted vault");
        Ok(rewritten)
    }
}

fn validate_key(key: &SecretKey) -> PrefabResult<()> {
    for (field, value) in [
        ("user_id", &key.user_id),
        ("unit_id", &key.unit_id),
        ("secret_name", &key.secret_name),
    ] {
        if value.trim().is_empty() {
            return Err(GatewayError::Validation(format!("{} must not be empty", field)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::envelope_key_id;
    use prefab_core::ErrorKind;
    use prefab_storage::MemorySecretStore;
    use secrecy::ExposeSecret;

    fn vault_with(store: Arc<MemorySecretStore>, current: &str, previous: Option<&str>) -> Vault {
        let current = SecretString::from(current);
        let previous = previous.map(SecretString::from);
        Vault::new(store, KeyRing::new(&current, previous.as_ref()))
    }

    fn key() -> SecretKey {
        SecretKey::new("user-1", "weather-api", "API_KEY")
    }

    #[tokio::test]
    async fn test_store_get_roundtrip_without_plaintext_at_rest() {
        let store = Arc::new(MemorySecretStore::new());
        let vault = vault_with(store.clone(), "material", None);

        vault.store(&key(), "sk-123", Some("forecast key".into())).await.unwrap();
        let raw = store.raw(&key()).await.unwrap();
        assert!(!raw.encrypted_value.contains("sk-123"));

        let value = vault.get(&key()).await.unwrap().unwrap();
        assert_eq!(value.expose_secret(), "sk-123");
        assert!(store.raw(&key()).await.unwrap().last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_list_exposes_names_only() {
        let vault = vault_with(Arc::new(MemorySecretStore::new()), "material", None);
        vault.store(&key(), "sk-123", None).await.unwrap();
        vault
            .store(&SecretKey::new("user-1", "maps-api", "TOKEN"), "t", None)
            .await
            .unwrap();

        let all = vault.list("user-1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        let json = serde_json::to_string(&all).unwrap();
        assert!(!json.contains("sk-123"));

        let scoped = vault.list("user-1", Some("weather-api")).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].secret_name, "API_KEY");
    }

    #[tokio::test]
    async fn test_delete_is_soft_and_idempotent() {
        let store = Arc::new(MemorySecretStore::new());
        let vault = vault_with(store.clone(), "material", None);
        vault.store(&key(), "sk-123", None).await.unwrap();

        vault.delete(&key()).await.unwrap();
        vault.delete(&key()).await.unwrap();
        assert!(vault.get(&key()).await.unwrap().is_none());
        assert_eq!(
            store.raw(&key()).await.unwrap().status,
            SecretStatus::Disabled
        );

        vault.store(&key(), "sk-456", None).await.unwrap();
        assert_eq!(
            vault.get(&key()).await.unwrap().unwrap().expose_secret(),
            "sk-456"
        );
    }

    #[tokio::test]
    async fn test_absent_secret_is_none() {
        let vault = vault_with(Arc::new(MemorySecretStore::new()), "material", None);
        assert!(vault.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_ciphertext_is_integrity_error() {
        let store = Arc::new(MemorySecretStore::new());
        vault_with(store.clone(), "material", None)
            .store(&key(), "sk-123", None)
            .await
            .unwrap();

        let other = vault_with(store, "different-material", None);
        let err = other.get(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[tokio::test]
    async fn test_rotation_and_reencrypt_all() {
        let store = Arc::new(MemorySecretStore::new());
        vault_with(store.clone(), "old", None)
            .store(&key(), "sk-123", None)
            .await
            .unwrap();

        let rotated = vault_with(store.clone(), "new", Some("old"));
        assert_eq!(
            rotated.get(&key()).await.unwrap().unwrap().expose_secret(),
            "sk-123"
        );

        assert_eq!(rotated.reencrypt_all().await.unwrap(), 1);
        assert_eq!(rotated.reencrypt_all().await.unwrap(), 0);

        let raw = store.raw(&key()).await.unwrap();
        assert_eq!(raw.encryption_key_id, rotated.current_key_id());
        assert_eq!(
            envelope_key_id(&raw.encrypted_value),
            Some(rotated.current_key_id())
        );

        let new_only = vault_with(store, "new", None);
        assert_eq!(
            new_only.get(&key()).await.unwrap().unwrap().expose_secret(),
            "sk-123"
        );
    }

    /// Lets a `store` commit between the stale-row scan and the rewrite.
    struct StoreDuringScan {
        inner: Arc<MemorySecretStore>,
        concurrent: std::sync::Mutex<Option<SecretRecord>>,
    }

    #[async_trait::async_trait]
    impl SecretStore for StoreDuringScan {
        async fn upsert(&self, record: SecretRecord) -> prefab_storage::StorageResult<()> {
            self.inner.upsert(record).await
        }

        async fn get_active(
            &self,
            key: &SecretKey,
        ) -> prefab_storage::StorageResult<Option<SecretRecord>> {
            self.inner.get_active(key).await
        }

        async fn touch(
            &self,
            key: &SecretKey,
            at: prefab_core::Timestamp,
        ) -> prefab_storage::StorageResult<()> {
            self.inner.touch(key, at).await
        }

        async fn disable(
            &self,
            key: &SecretKey,
            at: prefab_core::Timestamp,
        ) -> prefab_storage::StorageResult<bool> {
            self.inner.disable(key, at).await
        }

        async fn list_active(
            &self,
            user_id: &str,
            unit_id: Option<&str>,
        ) -> prefab_storage::StorageResult<Vec<SecretRecord>> {
            self.inner.list_active(user_id, unit_id).await
        }

        async fn list_not_under_key(
            &self,
            key_id: &str,
        ) -> prefab_storage::StorageResult<Vec<SecretRecord>> {
            let stale = self.inner.list_not_under_key(key_id).await?;
            let pending = self.concurrent.lock().unwrap().take();
            if let Some(record) = pending {
                self.inner.upsert(record).await?;
            }
            Ok(stale)
        }

        async fn replace_ciphertext(
            &self,
            key: &SecretKey,
            previous: &str,
            encrypted_value: &str,
            key_id: &str,
            at: prefab_core::Timestamp,
        ) -> prefab_storage::StorageResult<bool> {
            self.inner
                .replace_ciphertext(key, previous, encrypted_value, key_id, at)
                .await
        }
    }

    #[tokio::test]
    async fn test_reencrypt_keeps_value_stored_during_scan() {
        let inner = Arc::new(MemorySecretStore::new());
        vault_with(inner.clone(), "old", None)
            .store(&key(), "sk-old", None)
            .await
            .unwrap();

        let scratch = Arc::new(MemorySecretStore::new());
        vault_with(scratch.clone(), "new", None)
            .store(&key(), "sk-new", None)
            .await
            .unwrap();
        let concurrent = scratch.raw(&key()).await.unwrap();

        let store = Arc::new(StoreDuringScan {
            inner: inner.clone(),
            concurrent: std::sync::Mutex::new(Some(concurrent)),
        });
        let rotated = Vault::new(
            store,
            KeyRing::new(&SecretString::from("new"), Some(&SecretString::from("old"))),
        );

        assert_eq!(rotated.reencrypt_all().await.unwrap(), 0);
        assert_eq!(
            rotated.get(&key()).await.unwrap().unwrap().expose_secret(),
            "sk-new"
        );
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let vault = vault_with(Arc::new(MemorySecretStore::new()), "material", None);
        let err = vault
            .store(&SecretKey::new("user-1", "weather-api", " "), "v", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
