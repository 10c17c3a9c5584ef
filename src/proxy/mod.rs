//! Caching multiplexing proxy module
//!
//! Presents one loopback endpoint to any number of local Electrum clients while keeping a
//! single verified upstream connection, a request router and the persistent transaction
//! cache behind it.

/// Request id rewriting and response routing
mod router;
/// The proxy itself and its library API
mod server;
/// Local client sessions
mod session;
/// Error and stream types
pub mod types;
/// Upstream dialing, TLS and certificate verification
pub mod upstream;

pub use server::CachingProxy;
pub use types::{ProxyError, TrustViolation, VerifiedUpstream};
pub use upstream::{establish_upstream, verify_upstream};
