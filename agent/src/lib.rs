//! # Telemetry Agent
//!
//! This crate provides the device-side agent:
//! - Persistent device identity (UUID + Ed25519 keypair)
//! - Challenge/response bootstrap against the controller
//! - Client certificate installation and storage
//! - Metrics collection, queueing, and periodic dispatch over mutual TLS
//!
//! ## Bootstrap
//!
//! The agent authenticates to the controller over a TLS channel pinned to a
//! single root certificate. A successful bootstrap produces a signed client
//! certificate for a freshly generated gateway key; the identity key never
//! leaves the device and is never the certified key.

pub mod bootstrap;
pub mod credential;
pub mod identity;
pub mod keystore;
pub mod metrics;
pub mod transport;
pub mod trust;

// Re-export commonly used types
pub use bootstrap::{BootstrapProtocol, BootstrapState};
pub use credential::CredentialStore;
pub use identity::IdentityStore;
pub use keystore::{FileKeyStore, SecureKeyStore};
pub use metrics::{MetricsDispatcher, MetricsManager, MetricsQueue};
pub use transport::{ChannelOpener, ControllerChannel, TlsChannelOpener};
pub use trust::TrustAnchor;
