//! Persistent cache module
//!
//! Durable local storage for verbose transaction blobs and script-hash status snapshots.
//! Cache failures never surface to callers; they degrade to misses.

/// File-backed repositories for transactions and snapshots
pub mod repository;
/// Cache service with the confirmed/unconfirmed rules
mod service;
/// Cache entry type
mod types;

pub use service::PersistentCache;
pub use types::CacheEntry;
