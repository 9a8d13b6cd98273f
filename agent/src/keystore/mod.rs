//! # Secure Key Storage
//!
//! Capability interface over platform key storage plus a file-backed
//! implementation. The rest of the agent only ever talks to the
//! [`SecureKeyStore`] trait; swapping in an HSM or OS keystore is a matter
//! of implementing it.
//!
//! The file-backed store keeps:
//! - the device record (`device.json`)
//! - the identity private key (`identity_key.hex`, owner-only permissions)
//! - one credential file per alias (`credential-{alias}.json`), holding the
//!   private key and certificate chain as a single document so a reload can
//!   never observe a torn pair

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use shared::{
    config::StorageConfig,
    constants::{credential_file_name, DEVICE_RECORD_FILE, IDENTITY_KEY_FILE},
    error::{AgentError, AgentResult},
    types::{DeviceIdentity, SignedCredential},
};

/// Capability interface for secure key storage
#[async_trait]
pub trait SecureKeyStore: Send + Sync {
    /// Persist the device record
    async fn store_device_record(&self, record: &DeviceIdentity) -> AgentResult<()>;

    /// Load the device record, if one exists
    async fn load_device_record(&self) -> AgentResult<Option<DeviceIdentity>>;

    /// Persist the identity private key (hex encoded)
    async fn store_identity_key(&self, key_hex: &str) -> AgentResult<()>;

    /// Load the identity private key, if one exists
    async fn load_identity_key(&self) -> AgentResult<Option<String>>;

    /// Install a credential under its alias, replacing any prior entry.
    /// The write must be observable only as a whole.
    async fn install_credential(&self, credential: &SignedCredential) -> AgentResult<()>;

    /// Load the credential stored under `alias`, if any
    async fn load_credential(&self, alias: &str) -> AgentResult<Option<SignedCredential>>;
}

/// File-backed keystore for environments without a platform key vault
pub struct FileKeyStore {
    /// Path to the storage directory
    storage_path: PathBuf,
}

impl FileKeyStore {
    /// Open (and create if needed) the storage directory
    pub async fn open(config: &StorageConfig) -> AgentResult<Self> {
        info!(path = ?config.data_path, "Opening file keystore");

        tokio::fs::create_dir_all(&config.data_path)
            .await
            .map_err(|e| AgentError::StorageUnavailable(e.to_string()))?;

        Ok(Self {
            storage_path: config.data_path.clone(),
        })
    }

    /// Write `contents` to `name`, creating a fresh file each time
    async fn write_file(&self, name: &str, contents: &[u8]) -> AgentResult<PathBuf> {
        let path = self.storage_path.join(name);

        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| AgentError::StorageUnavailable(e.to_string()))?;

        Ok(path)
    }

    /// Read `name` if it exists
    async fn read_file(&self, name: &str) -> AgentResult<Option<Vec<u8>>> {
        let path = self.storage_path.join(name);

        if !path.exists() {
            return Ok(None);
        }

        let contents = tokio::fs::read(&path)
            .await
            .map_err(|e| AgentError::StorageUnavailable(e.to_string()))?;

        Ok(Some(contents))
    }

    /// Restrict a key file to owner-only read/write (Unix)
    fn restrict_permissions(path: &PathBuf) -> AgentResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)
                .map_err(|e| AgentError::StorageUnavailable(e.to_string()))?;
        }
        #[cfg(not(unix))]
        {
            let _ = path;
        }
        Ok(())
    }
}

#[async_trait]
impl SecureKeyStore for FileKeyStore {
    async fn store_device_record(&self, record: &DeviceIdentity) -> AgentResult<()> {
        let json = serde_json::to_string_pretty(record)?;
        let path = self.write_file(DEVICE_RECORD_FILE, json.as_bytes()).await?;

        debug!(path = ?path, "Device record stored");
        Ok(())
    }

    async fn load_device_record(&self) -> AgentResult<Option<DeviceIdentity>> {
        let Some(contents) = self.read_file(DEVICE_RECORD_FILE).await? else {
            return Ok(None);
        };

        let record: DeviceIdentity = serde_json::from_slice(&contents)?;
        Ok(Some(record))
    }

    async fn store_identity_key(&self, key_hex: &str) -> AgentResult<()> {
        let path = self.write_file(IDENTITY_KEY_FILE, key_hex.as_bytes()).await?;
        Self::restrict_permissions(&path)?;

        debug!(path = ?path, "Identity key stored");
        Ok(())
    }

    async fn load_identity_key(&self) -> AgentResult<Option<String>> {
        let Some(contents) = self.read_file(IDENTITY_KEY_FILE).await? else {
            return Ok(None);
        };

        let key = String::from_utf8(contents)
            .map_err(|e| AgentError::StorageUnavailable(e.to_string()))?;

        Ok(Some(key.trim().to_string()))
    }

    async fn install_credential(&self, credential: &SignedCredential) -> AgentResult<()> {
        let json = serde_json::to_string_pretty(credential)
            .map_err(|e| AgentError::InstallationError(e.to_string()))?;

        // One document per alias: the key and its chain land in a single
        // write, so a reload never sees a certificate without its key.
        let name = credential_file_name(&credential.alias);
        let path = self
            .write_file(&name, json.as_bytes())
            .await
            .map_err(|e| AgentError::InstallationError(e.to_string()))?;
        Self::restrict_permissions(&path)
            .map_err(|e| AgentError::InstallationError(e.to_string()))?;

        info!(alias = %credential.alias, path = ?path, "Credential installed");
        Ok(())
    }

    async fn load_credential(&self, alias: &str) -> AgentResult<Option<SignedCredential>> {
        let Some(contents) = self.read_file(&credential_file_name(alias)).await? else {
            return Ok(None);
        };

        let credential: SignedCredential = serde_json::from_slice(&contents)?;
        Ok(Some(credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> StorageConfig {
        StorageConfig {
            data_path: dir.to_path_buf(),
        }
    }

    fn test_credential() -> SignedCredential {
        SignedCredential::new("gw_key".into(), vec![vec![1, 2, 3]], vec![4, 5, 6])
    }

    #[tokio::test]
    async fn test_device_record_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::open(&test_config(dir.path())).await.unwrap();

        let record = DeviceIdentity::new("ab".repeat(32));
        store.store_device_record(&record).await.unwrap();

        let loaded = store.load_device_record().await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_identity_key_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::open(&test_config(dir.path())).await.unwrap();

        let key = "cd".repeat(32);
        store.store_identity_key(&key).await.unwrap();

        let loaded = store.load_identity_key().await.unwrap().unwrap();
        assert_eq!(loaded, key);
    }

    #[tokio::test]
    async fn test_credential_install_and_reload() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::open(&test_config(dir.path())).await.unwrap();

        let credential = test_credential();
        store.install_credential(&credential).await.unwrap();

        let loaded = store.load_credential("gw_key").await.unwrap().unwrap();
        assert_eq!(loaded, credential);
    }

    #[tokio::test]
    async fn test_credential_replacement_is_wholesale() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::open(&test_config(dir.path())).await.unwrap();

        store.install_credential(&test_credential()).await.unwrap();

        let replacement =
            SignedCredential::new("gw_key".into(), vec![vec![7, 7, 7]], vec![8, 8, 8]);
        store.install_credential(&replacement).await.unwrap();

        let loaded = store.load_credential("gw_key").await.unwrap().unwrap();
        assert_eq!(loaded.certificate_chain, replacement.certificate_chain);
        assert_eq!(loaded.private_key_der, replacement.private_key_der);
    }

    #[tokio::test]
    async fn test_empty_store_returns_none() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::open(&test_config(dir.path())).await.unwrap();

        assert!(store.load_device_record().await.unwrap().is_none());
        assert!(store.load_identity_key().await.unwrap().is_none());
        assert!(store.load_credential("gw_key").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_key_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileKeyStore::open(&test_config(dir.path())).await.unwrap();

        store.store_identity_key(&"ef".repeat(32)).await.unwrap();

        let mode = std::fs::metadata(dir.path().join(IDENTITY_KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
