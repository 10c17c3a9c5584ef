//! Certificate trust module
//!
//! Trust-on-first-use pinning for TLS upstreams: the pure decision function, the persisted
//! certificate table and the store service the proxy consults before it declares itself
//! started.

/// TOFU decision and the pinned certificate record
pub mod decision;
/// Certificate table persistence
pub mod repository;
/// Lookup, verification and approval service
pub mod store;

pub use decision::{ServerCertificateRecord, TrustDecision, normalize_fingerprint, verify};
pub use store::{TrustError, TrustStore};
