//! # Trust Anchor
//!
//! Builds the TLS verification context for talking to the controller. The
//! trust model is deliberately asymmetric: the agent pins exactly one
//! operator-supplied root certificate and never consults the system trust
//! store, so the bootstrap channel does not depend on public PKI.

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use shared::{
    error::{AgentError, AgentResult},
    types::SignedCredential,
};

/// A verifier pinned to a single operator root
#[derive(Clone, Debug)]
pub struct TrustAnchor {
    roots: RootCertStore,
}

impl TrustAnchor {
    /// Parse exactly one PEM-encoded X.509 root certificate and build a
    /// verifier that trusts only it.
    pub fn from_pem(root_cert_pem: &[u8]) -> AgentResult<Self> {
        let mut reader = std::io::Cursor::new(root_cert_pem);
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
            .collect::<Result<_, _>>()
            .map_err(|e| AgentError::MalformedCertificate(e.to_string()))?;

        let [root] = certs.as_slice() else {
            return Err(AgentError::MalformedCertificate(format!(
                "expected exactly one root certificate, found {}",
                certs.len()
            )));
        };

        let mut roots = RootCertStore::empty();
        roots
            .add(root.clone())
            .map_err(|e| AgentError::MalformedCertificate(e.to_string()))?;

        debug!("Trust anchor built from operator root");
        Ok(Self { roots })
    }

    /// Build a TLS client configuration verified against the pinned root.
    ///
    /// With `client_credential` the configuration presents the installed
    /// gateway certificate for mutual TLS (metrics push); without it the
    /// connection is server-authenticated only (bootstrap handshake).
    pub fn client_config(
        &self,
        client_credential: Option<&SignedCredential>,
    ) -> AgentResult<ClientConfig> {
        let builder = ClientConfig::builder().with_root_certificates(self.roots.clone());

        let config = match client_credential {
            Some(credential) => {
                let chain: Vec<CertificateDer<'static>> = credential
                    .certificate_chain
                    .iter()
                    .map(|der| CertificateDer::from(der.clone()))
                    .collect();
                let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                    credential.private_key_der.clone(),
                ));

                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| AgentError::MalformedCertificate(e.to_string()))?
            }
            None => builder.with_no_client_auth(),
        };

        Ok(config)
    }
}
