//! # Error Types for the Telemetry Agent
//!
//! This module defines all error types used throughout the agent,
//! providing detailed error information for debugging and logging.

use thiserror::Error;

/// Main error type for the entire agent
#[derive(Error, Debug)]
pub enum AgentError {
    // =========================================================================
    // STORAGE ERRORS
    // =========================================================================

    /// Secure storage could not be opened or accessed
    #[error("Secure storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Serialization/deserialization of stored or wire data failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // =========================================================================
    // CRYPTOGRAPHY ERRORS
    // =========================================================================

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// An X.509 certificate could not be parsed
    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),

    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================

    /// Connection or TLS failure (includes server verification failure)
    #[error("Transport error talking to '{endpoint}': {reason}")]
    TransportError { endpoint: String, reason: String },

    /// Connection timed out
    #[error("Connection timeout after {timeout_secs} seconds")]
    ConnectionTimeout { timeout_secs: u64 },

    /// The transport was closed mid-exchange (caller-initiated cancellation)
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // =========================================================================
    // BOOTSTRAP PROTOCOL ERRORS
    // =========================================================================

    /// The controller rejected the challenge response (nonce mismatch, expiry)
    #[error("Controller rejected challenge response: {0}")]
    ChallengeRejected(String),

    /// The signed credential could not be installed after a successful exchange
    #[error("Credential installation failed: {0}")]
    InstallationError(String),

    /// A bootstrap attempt is already in flight for this identity
    #[error("A bootstrap attempt is already in progress")]
    BootstrapInProgress,

    /// The controller sent a response the protocol did not expect
    #[error("Unexpected controller response: {0}")]
    UnexpectedResponse(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Missing required environment variable
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Result type alias using AgentError
pub type AgentResult<T> = Result<T, AgentError>;

// =============================================================================
// ERROR CONVERSIONS
// =============================================================================

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::StorageUnavailable(err.to_string())
    }
}

impl From<hex::FromHexError> for AgentError {
    fn from(err: hex::FromHexError) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for AgentError {
    fn from(err: base64::DecodeError) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}

// =============================================================================
// ERROR CATEGORIES (for metrics and logging)
// =============================================================================

impl AgentError {
    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::StorageUnavailable(_)
            | AgentError::SerializationError(_) => "storage",

            AgentError::KeyGenerationFailed(_)
            | AgentError::MalformedCertificate(_) => "crypto",

            AgentError::TransportError { .. }
            | AgentError::ConnectionTimeout { .. }
            | AgentError::Cancelled(_) => "transport",

            AgentError::ChallengeRejected(_)
            | AgentError::InstallationError(_)
            | AgentError::BootstrapInProgress
            | AgentError::UnexpectedResponse(_) => "bootstrap",

            AgentError::ConfigurationError(_)
            | AgentError::MissingEnvVar(_) => "config",
        }
    }

    /// Check if the error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::TransportError { .. }
                | AgentError::ConnectionTimeout { .. }
                | AgentError::ChallengeRejected(_)
        )
    }
}
