//! # Identity Store
//!
//! Provisions and loads the device's durable identity: a stable UUID plus a
//! long-lived Ed25519 key pair held in secure storage. The identity key
//! authenticates *who is asking* during bootstrap; it is distinct from the
//! gateway key that ends up certified for mutual TLS.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::{debug, info};

use shared::{
    error::{AgentError, AgentResult},
    types::DeviceIdentity,
};

use crate::keystore::SecureKeyStore;

/// Stores and loads the device identity
pub struct IdentityStore {
    keystore: Arc<dyn SecureKeyStore>,
}

impl IdentityStore {
    /// Create an identity store backed by `keystore`
    pub fn new(keystore: Arc<dyn SecureKeyStore>) -> Self {
        Self { keystore }
    }

    /// Load the device identity, generating and persisting a fresh one on
    /// first run. Idempotent: repeated calls return the same record.
    ///
    /// No network access; the first call writes to secure storage, later
    /// calls are read-only.
    pub async fn get_or_create_identity(&self) -> AgentResult<DeviceIdentity> {
        if let Some(record) = self.keystore.load_device_record().await? {
            // The key must be loadable too, otherwise the record is unusable.
            let key_hex = self.keystore.load_identity_key().await?.ok_or_else(|| {
                AgentError::StorageUnavailable(
                    "device record present but identity key missing".into(),
                )
            })?;
            Self::parse_signing_key(&key_hex)?;

            debug!(device_id = %record.device_id, "Loaded existing device identity");
            return Ok(record);
        }

        // First run: generate the identity key pair and the device record,
        // persisting the key before the record so a crash in between leaves
        // no half-usable identity behind.
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key_hex = hex::encode(signing_key.verifying_key().as_bytes());
        let private_key_hex = hex::encode(signing_key.to_bytes());

        self.keystore.store_identity_key(&private_key_hex).await?;

        let record = DeviceIdentity::new(public_key_hex);
        self.keystore.store_device_record(&record).await?;

        info!(device_id = %record.device_id, "Generated new device identity");
        Ok(record)
    }

    /// Load the identity signing key from storage
    pub async fn signing_key(&self) -> AgentResult<SigningKey> {
        let key_hex = self.keystore.load_identity_key().await?.ok_or_else(|| {
            AgentError::StorageUnavailable("no identity key in storage".into())
        })?;

        Self::parse_signing_key(&key_hex)
    }

    fn parse_signing_key(key_hex: &str) -> AgentResult<SigningKey> {
        let key_bytes = hex::decode(key_hex)
            .map_err(|e| AgentError::KeyGenerationFailed(e.to_string()))?;
        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| AgentError::KeyGenerationFailed("invalid identity key length".into()))?;

        Ok(SigningKey::from_bytes(&key_array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::FileKeyStore;
    use shared::config::StorageConfig;
    use tempfile::tempdir;

    async fn test_store(dir: &std::path::Path) -> IdentityStore {
        let config = StorageConfig {
            data_path: dir.to_path_buf(),
        };
        let keystore = FileKeyStore::open(&config).await.unwrap();
        IdentityStore::new(Arc::new(keystore))
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        let first = store.get_or_create_identity().await.unwrap();
        let second = store.get_or_create_identity().await.unwrap();

        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first.public_key_hex, second.public_key_hex);
    }

    #[tokio::test]
    async fn test_identity_survives_reopen() {
        let dir = tempdir().unwrap();

        let created = {
            let store = test_store(dir.path()).await;
            store.get_or_create_identity().await.unwrap()
        };

        let store = test_store(dir.path()).await;
        let reloaded = store.get_or_create_identity().await.unwrap();

        assert_eq!(created, reloaded);
    }

    #[tokio::test]
    async fn test_signing_key_matches_public_record() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        let record = store.get_or_create_identity().await.unwrap();
        let key = store.signing_key().await.unwrap();

        assert_eq!(
            hex::encode(key.verifying_key().as_bytes()),
            record.public_key_hex
        );
    }

    #[tokio::test]
    async fn test_missing_key_for_record_is_storage_error() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path()).await;

        store.get_or_create_identity().await.unwrap();
        std::fs::remove_file(dir.path().join(shared::constants::IDENTITY_KEY_FILE)).unwrap();

        let err = store.get_or_create_identity().await.unwrap_err();
        assert!(matches!(err, AgentError::StorageUnavailable(_)));
    }
}
