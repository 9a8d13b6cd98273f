//! # Shared Module for the Telemetry Agent
//!
//! This crate provides common types, errors, and configuration used across
//! the agent library and its binary.
//!
//! ## Architecture
//!
//! The agent provisions a durable device identity, exchanges it for a signed
//! mutual-TLS credential through a challenge/response bootstrap against an
//! operator-run controller, and then batches telemetry over that channel:
//!
//! - **Identity**: a stable UUID plus a long-lived identity key pair
//! - **Bootstrap**: challenge → CSR → signed certificate, pinned to one
//!   operator-supplied root (never the system trust store)
//! - **Metrics**: an in-memory FIFO drained periodically by a dispatcher
//!   that authenticates with the bootstrapped credential

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::*;
pub use constants::*;
pub use error::*;
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
