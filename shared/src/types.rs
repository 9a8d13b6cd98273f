//! # Shared Data Types for the Telemetry Agent
//!
//! This module defines the data model of the bootstrap protocol and the
//! metrics pipeline, plus the tagged request/response frames exchanged with
//! the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CSR_VALIDITY_WINDOW_DURATION, CSR_VALIDITY_WINDOW_START};

// =============================================================================
// SERDE HELPERS
// =============================================================================

/// Base64 (standard alphabet) encoding for byte fields in JSON frames
mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Base64 encoding for lists of byte blobs (certificate chains)
mod b64_list {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        chain: &[Vec<u8>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = chain.iter().map(|der| STANDARD.encode(der)).collect();
        serde::Serialize::serialize(&encoded, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

// =============================================================================
// DEVICE IDENTITY
// =============================================================================

/// The device's durable identity record.
///
/// Created once on first run and immutable thereafter; deletion is an
/// external administrative action, never performed by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Stable device identifier, generated once
    pub device_id: Uuid,

    /// Identity public key in hex format (Ed25519, 64 hex chars).
    /// The private half never leaves secure storage.
    pub public_key_hex: String,

    /// When the record was first created
    pub created_at: DateTime<Utc>,
}

impl DeviceIdentity {
    /// Create a fresh identity record with a new UUID
    pub fn new(public_key_hex: String) -> Self {
        Self {
            device_id: Uuid::new_v4(),
            public_key_hex,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// BOOTSTRAP PROTOCOL
// =============================================================================

/// A challenge issued by the controller, scoped to one bootstrap attempt.
///
/// Consumed exactly once, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Challenge {
    /// Opaque challenge token
    #[serde(with = "b64")]
    pub token: Vec<u8>,

    /// First nonce component
    #[serde(with = "b64")]
    pub r: Vec<u8>,

    /// Second nonce component
    #[serde(with = "b64")]
    pub s: Vec<u8>,
}

impl Challenge {
    /// Extract the `(r, s)` nonce pair for the challenge response.
    ///
    /// The returned bytes must be echoed back byte-identical; the controller
    /// rejects any response with mismatched or reused nonces.
    pub fn nonces(&self) -> (Vec<u8>, Vec<u8>) {
        (self.r.clone(), self.s.clone())
    }
}

/// The device's answer to a [`Challenge`], carrying the CSR to sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// The device asking to be provisioned
    pub device_id: Uuid,

    /// The challenge being answered
    pub challenge: Challenge,

    /// Start offset of the validity window
    pub window_start: u64,

    /// Duration of the validity window, in controller time units
    pub window_duration: u64,

    /// DER-encoded certificate signing request for the gateway key
    #[serde(with = "b64")]
    pub csr_der: Vec<u8>,

    /// Echo of the challenge's first nonce
    #[serde(with = "b64")]
    pub r: Vec<u8>,

    /// Echo of the challenge's second nonce
    #[serde(with = "b64")]
    pub s: Vec<u8>,
}

impl ChallengeResponse {
    /// Assemble a response for `challenge`, echoing its nonces and applying
    /// the default validity window.
    pub fn new(device_id: Uuid, challenge: Challenge, csr_der: Vec<u8>) -> Self {
        let (r, s) = challenge.nonces();
        Self {
            device_id,
            challenge,
            window_start: CSR_VALIDITY_WINDOW_START,
            window_duration: CSR_VALIDITY_WINDOW_DURATION,
            csr_der,
            r,
            s,
        }
    }
}

/// A certificate signed by the controller in answer to a CSR
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedCertificate {
    /// DER-encoded X.509 certificate
    #[serde(with = "b64")]
    pub cert_der: Vec<u8>,
}

/// The installed client credential: the signed certificate chain plus the
/// gateway private key, stored under one alias.
///
/// Only ever installed atomically; readers see either the previous complete
/// credential or the new complete one, never a mix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedCredential {
    /// The keystore alias holding this credential
    pub alias: String,

    /// DER-encoded certificate chain, leaf first
    #[serde(with = "b64_list")]
    pub certificate_chain: Vec<Vec<u8>>,

    /// DER-encoded PKCS#8 private key for the leaf certificate
    #[serde(with = "b64")]
    pub private_key_der: Vec<u8>,

    /// When the credential was installed
    pub installed_at: DateTime<Utc>,
}

impl SignedCredential {
    /// Create a credential pairing `chain` with `private_key_der` under `alias`
    pub fn new(alias: String, certificate_chain: Vec<Vec<u8>>, private_key_der: Vec<u8>) -> Self {
        Self {
            alias,
            certificate_chain,
            private_key_der,
            installed_at: Utc::now(),
        }
    }

    /// The leaf (end-entity) certificate, if any
    pub fn leaf(&self) -> Option<&[u8]> {
        self.certificate_chain.first().map(|der| der.as_slice())
    }
}

// =============================================================================
// METRICS
// =============================================================================

/// A single label name/value pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

impl LabelPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A named group of label/value pairs captured at one point in time.
///
/// Immutable once enqueued; destroyed on successful transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricBatch {
    /// The device that captured the batch
    pub device_id: Uuid,

    /// Root name for the group of collected metrics
    pub family_name: String,

    /// Collected label/value pairs
    pub labels: Vec<LabelPair>,

    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
}

/// Acknowledgement for a metrics push
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushAck {
    /// Number of batches the controller accepted
    pub accepted: u32,
}

// =============================================================================
// WIRE FRAMES
// =============================================================================

/// Requests the agent sends to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerRequest {
    /// Ask for a fresh challenge
    GetChallenge { device_id: Uuid },

    /// Submit a challenge response carrying a CSR
    RequestSign(ChallengeResponse),

    /// Push a drained set of metric batches
    PushMetrics { batches: Vec<MetricBatch> },
}

/// Error codes the controller may report
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerErrorCode {
    /// Nonce mismatch, reuse, or window expiry
    ChallengeRejected,
    /// Any other controller-side failure
    Internal,
}

/// Responses the controller sends back
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerResponse {
    Challenge(Challenge),
    Signed(SignedCertificate),
    Ack(PushAck),
    Error {
        code: ControllerErrorCode,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_challenge() -> Challenge {
        Challenge {
            token: vec![1, 2, 3, 4],
            r: vec![0xAA; 16],
            s: vec![0xBB; 16],
        }
    }

    #[test]
    fn test_challenge_response_echoes_nonces_exactly() {
        let challenge = sample_challenge();
        let response = ChallengeResponse::new(Uuid::new_v4(), challenge.clone(), vec![9, 9]);

        assert_eq!(response.r, challenge.r);
        assert_eq!(response.s, challenge.s);
        assert_eq!(response.window_start, CSR_VALIDITY_WINDOW_START);
        assert_eq!(response.window_duration, CSR_VALIDITY_WINDOW_DURATION);
    }

    #[test]
    fn test_challenge_frame_roundtrip() {
        let frame = ControllerResponse::Challenge(sample_challenge());
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: ControllerResponse = serde_json::from_str(&json).unwrap();

        match parsed {
            ControllerResponse::Challenge(c) => assert_eq!(c, sample_challenge()),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_request_frame_tagging() {
        let frame = ControllerRequest::GetChallenge {
            device_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"get_challenge\""));
    }

    #[test]
    fn test_credential_roundtrip_preserves_pairing() {
        let credential = SignedCredential::new(
            "gw_key".into(),
            vec![vec![1, 2, 3], vec![4, 5, 6]],
            vec![7, 8, 9],
        );

        let json = serde_json::to_string(&credential).unwrap();
        let parsed: SignedCredential = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, credential);
        assert_eq!(parsed.leaf(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_device_identity_ids_are_unique() {
        let a = DeviceIdentity::new("aa".repeat(32));
        let b = DeviceIdentity::new("aa".repeat(32));
        assert_ne!(a.device_id, b.device_id);
    }
}
