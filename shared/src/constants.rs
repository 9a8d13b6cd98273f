//! # Constants for the Telemetry Agent
//!
//! This module contains all constants used throughout the agent.

// =============================================================================
// KEY ALIASES
// =============================================================================
// Two separate key pairs: the identity key authenticates *who is asking*
// during bootstrap; the gateway key is the one certified for ongoing mutual
// TLS. A single compromised key must not break both.

/// Alias under which the long-lived identity key pair is stored
pub const IDENTITY_KEY_ALIAS: &str = "identity_key";

/// Alias under which the gateway (session) key pair and its certificate
/// chain are stored
pub const GATEWAY_KEY_ALIAS: &str = "gw_key";

// =============================================================================
// CONTROLLER / TRANSPORT
// =============================================================================

/// Default controller port
pub const DEFAULT_CONTROLLER_PORT: u16 = 443;

/// TLS handshake timeout (seconds)
pub const TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Maximum size of a single wire frame (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

// =============================================================================
// BOOTSTRAP PROTOCOL
// =============================================================================

/// Start offset of the challenge-response validity window
pub const CSR_VALIDITY_WINDOW_START: u64 = 0;

/// Duration of the challenge-response validity window, in controller time
/// units. The controller owns the interpretation of these offsets.
pub const CSR_VALIDITY_WINDOW_DURATION: u64 = 10_000;

// =============================================================================
// METRICS DISPATCH
// =============================================================================

/// Default period between dispatch cycles (15 minutes)
pub const DEFAULT_DISPATCH_PERIOD_SECS: u64 = 900;

/// Implicit label carrying the owning device id on every batch
pub const LABEL_DEVICE_UUID: &str = "uuid";

/// Implicit label carrying the capture timestamp on every batch
pub const LABEL_TIMESTAMP: &str = "timestamp";

// =============================================================================
// STORAGE PATHS AND FILE NAMES
// =============================================================================

/// Default path for agent storage
pub const DEFAULT_AGENT_STORAGE_PATH: &str = "./agent_storage";

/// File holding the device record (UUID, identity public key)
pub const DEVICE_RECORD_FILE: &str = "device.json";

/// File holding the identity private key (hex encoded)
pub const IDENTITY_KEY_FILE: &str = "identity_key.hex";

/// Prefix for per-alias credential files ("credential-{alias}.json")
pub const CREDENTIAL_FILE_PREFIX: &str = "credential-";

// =============================================================================
// ENVIRONMENT VARIABLE NAMES
// =============================================================================

/// Environment variable for the controller address
pub const ENV_CONTROLLER_ADDRESS: &str = "AGENT_CONTROLLER_ADDRESS";

/// Environment variable for the controller port
pub const ENV_CONTROLLER_PORT: &str = "AGENT_CONTROLLER_PORT";

/// Environment variable for the operator root certificate path
pub const ENV_ROOT_CERT_PATH: &str = "AGENT_ROOT_CERT_PATH";

/// Environment variable for the dispatch period (seconds)
pub const ENV_DISPATCH_PERIOD_SECS: &str = "AGENT_DISPATCH_PERIOD_SECS";

/// Environment variable for the storage path
pub const ENV_STORAGE_PATH: &str = "AGENT_STORAGE_PATH";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Build the credential file name for a key alias
pub fn credential_file_name(alias: &str) -> String {
    format!("{}{}.json", CREDENTIAL_FILE_PREFIX, alias)
}
