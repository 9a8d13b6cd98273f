//! # Credential Store
//!
//! Holds the bootstrapped client credential behind a single atomic swap.
//! Readers (the metrics dispatcher) always observe either the previous
//! complete credential or the new complete one, never a certificate paired
//! with the wrong key. Only a successful bootstrap run calls `install`.

use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use shared::{
    error::{AgentError, AgentResult},
    types::SignedCredential,
};

use crate::keystore::SecureKeyStore;

/// Atomic holder for the installed client credential
pub struct CredentialStore {
    keystore: Arc<dyn SecureKeyStore>,
    alias: String,
    current: RwLock<Option<Arc<SignedCredential>>>,
}

impl CredentialStore {
    /// Create a store for the credential slot named `alias`
    pub fn new(keystore: Arc<dyn SecureKeyStore>, alias: impl Into<String>) -> Self {
        Self {
            keystore,
            alias: alias.into(),
            current: RwLock::new(None),
        }
    }

    /// Load a previously persisted credential into memory, if one exists.
    /// Returns whether a credential was found.
    pub async fn load_persisted(&self) -> AgentResult<bool> {
        let Some(credential) = self.keystore.load_credential(&self.alias).await? else {
            debug!(alias = %self.alias, "No persisted credential");
            return Ok(false);
        };

        let mut guard = self
            .current
            .write()
            .map_err(|_| AgentError::InstallationError("credential lock poisoned".into()))?;
        *guard = Some(Arc::new(credential));

        info!(alias = %self.alias, "Loaded persisted credential");
        Ok(true)
    }

    /// The currently installed credential, if any
    pub fn current(&self) -> Option<Arc<SignedCredential>> {
        self.current.read().ok()?.clone()
    }

    /// Install a new credential, replacing any prior one wholesale.
    ///
    /// Persists through the keystore first, then swaps the in-memory pointer
    /// in one write; a failure before the swap leaves the old credential
    /// fully intact.
    pub async fn install(&self, credential: SignedCredential) -> AgentResult<()> {
        if credential.certificate_chain.is_empty() {
            return Err(AgentError::InstallationError(
                "refusing to install credential with empty certificate chain".into(),
            ));
        }

        self.keystore.install_credential(&credential).await?;

        let mut guard = self
            .current
            .write()
            .map_err(|_| AgentError::InstallationError("credential lock poisoned".into()))?;
        *guard = Some(Arc::new(credential));

        info!(alias = %self.alias, "Credential swapped in");
        Ok(())
    }
}
