//! # Bootstrap Protocol
//!
//! The challenge/response certificate-signing exchange that turns a device
//! identity into a mutual-TLS credential. One call is one attempt: exactly
//! three round trips over a single pinned-root TLS channel, ending in either
//! `Provisioned` or a terminal `Failed` state. Retries belong to the caller.
//!
//! ## Protocol Flow
//!
//! ```text
//! Agent                                   Controller
//!   |                                         |
//!   |-------- get_challenge(device_id) ------>|
//!   |<------- Challenge { token, r, s } ------|
//!   |                                         |
//!   |  (fresh gateway key, CSR, echo r/s)     |
//!   |                                         |
//!   |-------- request_sign(response) -------->|
//!   |<------- SignedCertificate --------------|
//!   |                                         |
//!   |  (verify, install atomically)           |
//! ```

use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, PublicKeyData};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use x509_parser::prelude::*;

use shared::{
    error::{AgentError, AgentResult},
    types::{ChallengeResponse, DeviceIdentity, SignedCertificate, SignedCredential},
};

use crate::credential::CredentialStore;
use crate::transport::ChannelOpener;

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Why a bootstrap attempt ended in failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapFailure {
    /// Connection, TLS, or verification failure
    Transport,
    /// The caller closed the transport mid-attempt
    Cancelled,
    /// The controller rejected the challenge response
    ChallengeRejected,
    /// The gateway key pair or CSR could not be produced
    KeyGeneration,
    /// The signed certificate could not be verified or installed
    Installation,
    /// The controller broke the protocol sequence
    Protocol,
}

/// Observable state of the bootstrap protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// No attempt has started
    Idle,
    /// A challenge has been requested
    AwaitingChallenge,
    /// The controller's challenge is in hand
    ChallengeReceived,
    /// The CSR has been submitted for signing
    CsrSubmitted,
    /// Terminal: a credential is installed
    Provisioned,
    /// Terminal: the attempt failed
    Failed(BootstrapFailure),
}

fn failure_for(err: &AgentError) -> BootstrapFailure {
    match err {
        AgentError::TransportError { .. } | AgentError::ConnectionTimeout { .. } => {
            BootstrapFailure::Transport
        }
        AgentError::Cancelled(_) => BootstrapFailure::Cancelled,
        AgentError::ChallengeRejected(_) => BootstrapFailure::ChallengeRejected,
        AgentError::KeyGenerationFailed(_) => BootstrapFailure::KeyGeneration,
        AgentError::InstallationError(_)
        | AgentError::MalformedCertificate(_)
        | AgentError::StorageUnavailable(_) => BootstrapFailure::Installation,
        _ => BootstrapFailure::Protocol,
    }
}

// =============================================================================
// PROTOCOL DRIVER
// =============================================================================

/// Drives the bootstrap exchange for one device identity
pub struct BootstrapProtocol {
    identity: DeviceIdentity,
    opener: Arc<dyn ChannelOpener>,
    credentials: Arc<CredentialStore>,
    gateway_alias: String,
    state: Mutex<BootstrapState>,
    // The gateway key alias is shared mutable state; protocol steps are not
    // reentrant, so at most one attempt may be in flight.
    in_flight: AtomicBool,
}

impl BootstrapProtocol {
    pub fn new(
        identity: DeviceIdentity,
        opener: Arc<dyn ChannelOpener>,
        credentials: Arc<CredentialStore>,
        gateway_alias: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            opener,
            credentials,
            gateway_alias: gateway_alias.into(),
            state: Mutex::new(BootstrapState::Idle),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Current protocol state
    pub fn state(&self) -> BootstrapState {
        *self.state.lock().expect("bootstrap state lock poisoned")
    }

    fn set_state(&self, state: BootstrapState) {
        *self.state.lock().expect("bootstrap state lock poisoned") = state;
        debug!(state = ?state, "Bootstrap state transition");
    }

    /// Run one bootstrap attempt.
    ///
    /// On success the returned credential is already installed in the
    /// credential store. On failure the state machine lands in a terminal
    /// `Failed` state and no partial credential is observable. A second call
    /// while one is in flight fails fast with `BootstrapInProgress`.
    pub async fn bootstrap(&self) -> AgentResult<SignedCredential> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AgentError::BootstrapInProgress);
        }

        info!(device_id = %self.identity.device_id, "Starting bootstrap");
        let result = self.run_attempt().await;

        match &result {
            Ok(_) => {
                self.set_state(BootstrapState::Provisioned);
                info!(device_id = %self.identity.device_id, "Bootstrap successful");
            }
            Err(err) => {
                self.set_state(BootstrapState::Failed(failure_for(err)));
                warn!(device_id = %self.identity.device_id, error = %err, "Bootstrap failed");
            }
        }

        self.in_flight.store(false, Ordering::Release);
        result
    }

    async fn run_attempt(&self) -> AgentResult<SignedCredential> {
        // Round trip 1: challenge request. A channel that cannot be opened
        // or verified is a hard TLS stop, never a plaintext downgrade.
        self.set_state(BootstrapState::AwaitingChallenge);
        let mut channel = self.opener.open(None).await?;

        let challenge = channel.get_challenge(self.identity.device_id).await?;
        self.set_state(BootstrapState::ChallengeReceived);
        debug!(token_len = challenge.token.len(), "Challenge received");

        // Round trip 2: fresh gateway key, CSR, nonce echo. The gateway key
        // is distinct from the identity key; only the gateway key gets
        // certified for ongoing mutual TLS.
        let gateway_key = KeyPair::generate()
            .map_err(|e| AgentError::KeyGenerationFailed(e.to_string()))?;
        let csr_der = self.build_csr(&gateway_key)?;

        let response =
            ChallengeResponse::new(self.identity.device_id, challenge, csr_der);
        self.set_state(BootstrapState::CsrSubmitted);

        let certificate = channel.request_sign(&response).await?;

        // Round trip 3 aftermath: verify the signed certificate against the
        // CSR's key and install key + chain as one unit.
        let credential = self.verify_and_assemble(&gateway_key, &certificate)?;
        self.credentials
            .install(credential.clone())
            .await
            .map_err(|e| match e {
                e @ AgentError::InstallationError(_) => e,
                other => AgentError::InstallationError(other.to_string()),
            })?;

        Ok(credential)
    }

    /// Build a CSR naming this device, to be signed for the gateway key
    fn build_csr(&self, gateway_key: &KeyPair) -> AgentResult<Vec<u8>> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(self.identity.device_id.to_string()),
        );
        params.distinguished_name = dn;

        let csr = params
            .serialize_request(gateway_key)
            .map_err(|e| AgentError::KeyGenerationFailed(format!("CSR build failed: {}", e)))?;

        Ok(csr.der().as_ref().to_vec())
    }

    /// Check that the returned certificate names this device and certifies
    /// the gateway key, then pair it with the key as a credential.
    fn verify_and_assemble(
        &self,
        gateway_key: &KeyPair,
        certificate: &SignedCertificate,
    ) -> AgentResult<SignedCredential> {
        let (_, cert) = X509Certificate::from_der(&certificate.cert_der).map_err(|e| {
            AgentError::InstallationError(format!("unparseable signed certificate: {}", e))
        })?;

        let device_name = self.identity.device_id.to_string();
        let named_correctly = cert
            .subject()
            .iter_common_name()
            .any(|cn| cn.as_str().map(|s| s == device_name).unwrap_or(false));
        if !named_correctly {
            return Err(AgentError::InstallationError(
                "signed certificate does not name this device".into(),
            ));
        }

        if cert.public_key().raw != gateway_key.subject_public_key_info() {
            return Err(AgentError::InstallationError(
                "signed certificate does not match the gateway key".into(),
            ));
        }

        Ok(SignedCredential::new(
            self.gateway_alias.clone(),
            vec![certificate.cert_der.clone()],
            gateway_key.serialize_der(),
        ))
    }
}
