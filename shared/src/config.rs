//! # Configuration for the Telemetry Agent
//!
//! This module handles configuration loading and validation,
//! supporting both environment variables and programmatic construction.

use crate::constants::*;
use crate::error::{AgentError, AgentResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

// =============================================================================
// CONTROLLER CONFIGURATION
// =============================================================================

/// Controller endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller host name or address
    pub address: String,

    /// Controller port
    pub port: u16,

    /// Path to the operator-supplied root certificate (PEM).
    /// The bootstrap handshake trusts only this root, never the system store.
    pub root_cert_path: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".into(),
            port: DEFAULT_CONTROLLER_PORT,
            root_cert_path: PathBuf::from("./root.pem"),
        }
    }
}

impl ControllerConfig {
    /// Get the endpoint as "address:port"
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// =============================================================================
// STORAGE CONFIGURATION
// =============================================================================

/// Storage configuration for the file-backed keystore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path for agent data storage
    pub data_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_AGENT_STORAGE_PATH),
        }
    }
}

// =============================================================================
// DISPATCH CONFIGURATION
// =============================================================================

/// Metrics dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Period between dispatch cycles in seconds
    pub period_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            period_secs: DEFAULT_DISPATCH_PERIOD_SECS,
        }
    }
}

// =============================================================================
// TLS CONFIGURATION
// =============================================================================

/// TLS configuration for controller communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// TLS handshake timeout in seconds
    pub handshake_timeout_secs: u64,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: TLS_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// AGENT CONFIGURATION
// =============================================================================

/// Top-level configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Controller endpoint
    pub controller: ControllerConfig,

    /// Local storage
    pub storage: StorageConfig,

    /// Metrics dispatch
    pub dispatch: DispatchConfig,

    /// TLS settings
    pub tls: TlsConfig,
}

impl AgentConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> AgentResult<Self> {
        let mut config = Self::default();

        if let Ok(address) = env::var(ENV_CONTROLLER_ADDRESS) {
            config.controller.address = address;
        }

        if let Ok(port) = env::var(ENV_CONTROLLER_PORT) {
            config.controller.port = port.parse().map_err(|_| {
                AgentError::ConfigurationError(format!("invalid controller port: {}", port))
            })?;
        }

        if let Ok(path) = env::var(ENV_ROOT_CERT_PATH) {
            config.controller.root_cert_path = PathBuf::from(path);
        }

        if let Ok(period) = env::var(ENV_DISPATCH_PERIOD_SECS) {
            config.dispatch.period_secs = period.parse().map_err(|_| {
                AgentError::ConfigurationError(format!("invalid dispatch period: {}", period))
            })?;
        }

        if let Ok(path) = env::var(ENV_STORAGE_PATH) {
            config.storage.data_path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AgentResult<()> {
        if self.controller.address.is_empty() {
            return Err(AgentError::ConfigurationError(
                "controller address must not be empty".into(),
            ));
        }

        if self.dispatch.period_secs == 0 {
            return Err(AgentError::ConfigurationError(
                "dispatch period must be greater than zero".into(),
            ));
        }

        if self.tls.handshake_timeout_secs == 0 {
            return Err(AgentError::ConfigurationError(
                "handshake timeout must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
