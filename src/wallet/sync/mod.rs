//! Wallet Synchronization Module
//!
//! Decides when and how aggressively a wallet is resynchronized through the caching proxy:
//!
//! - `coordinator`: single-flight quick and full syncs, bootstrap of live subscriptions and
//!   the script-hash status cache.
//! - `listener`: debounces the proxy's notification stream into triggered quick syncs.
//! - `batch`: the adaptive batch size.
//! - `precheck`: cheap snapshot comparisons that let a sync be skipped.
//! - `ledger`: the per-transaction view refreshed after each sync.
//! - `repositories`: sync metadata persistence.

/// Adaptive batch size for revealed-address syncs
mod batch;
/// Single-flight sync coordinator
mod coordinator;
/// Incrementally refreshed transaction ledger
mod ledger;
/// Notification debounce
mod listener;
/// Snapshot comparison helpers
mod precheck;
/// Sync metadata persistence
pub mod repositories;
#[cfg(test)]
mod test_support;

pub use batch::AdaptiveBatchSize;
pub use coordinator::SyncCoordinator;
pub use ledger::{LedgerRefresh, TransactionLedger};
pub use listener::NotificationListener;
pub use precheck::{revealed_script_hashes, sampled_script_hashes, snapshot_unchanged};
