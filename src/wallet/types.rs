use crate::proxy::ProxyError;
use crate::utils::PersistError;
use crate::wallet::engine::EngineError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Change events produced by the wallet engine after it applies a sync result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
	TxConfirmed { txid: String },
	TxUnconfirmed { txid: String },
	/// `txid` was replaced by the `conflicts`
	TxReplaced { txid: String, conflicts: Vec<String> },
	TxDropped { txid: String },
	ChainTipChanged,
}

impl WalletEvent {
	/// Transactions whose local view must be recomputed
	pub fn affected_txids(&self) -> Vec<&str> {
		match self {
			WalletEvent::TxConfirmed { txid }
			| WalletEvent::TxUnconfirmed { txid }
			| WalletEvent::TxDropped { txid } => vec![txid.as_str()],
			WalletEvent::TxReplaced { txid, conflicts } => std::iter::once(txid.as_str())
				.chain(conflicts.iter().map(String::as_str))
				.collect(),
			WalletEvent::ChainTipChanged => Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keychain {
	External,
	Internal,
}

impl Keychain {
	pub const ALL: [Keychain; 2] = [Keychain::External, Keychain::Internal];
}

/// Per-transaction view derived from the wallet engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxDetails {
	pub txid: String,
	/// Received minus sent, in satoshis
	pub net_value: i64,
	pub fee: Option<u64>,
	pub confirmation_height: Option<u32>,
}

impl TxDetails {
	pub fn is_confirmed(&self) -> bool {
		self.confirmation_height.is_some()
	}
}

/// Result of a sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
	/// The engine ran and applied an update
	Synced { events: Vec<WalletEvent> },
	/// The pre-check found nothing to do
	NoChanges,
	/// Another quick sync held the lock; nothing was done
	AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
	Idle,
	QuickSyncing,
	FullSyncing,
}

/// Snapshot of coordinator state for display
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
	pub phase: SyncPhase,
	pub batch_size: usize,
	pub needs_full_sync: bool,
	pub last_known_block_height: Option<u32>,
	pub last_full_sync_at: Option<DateTime<Utc>>,
	pub subscribed_script_hashes: usize,
}

/// Error types for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Backend error: {0}")]
	Backend(#[from] ProxyError),

	#[error("Wallet engine error: {0}")]
	Engine(#[from] EngineError),

	#[error("Quick sync timed out, batch size reduced to {batch_size}")]
	Timeout { batch_size: usize },

	#[error("Full scan failed: {0}")]
	FullScanFailed(#[source] EngineError),

	#[error("Sync metadata error: {0}")]
	Persistence(#[from] PersistError),
}

impl SyncError {
	/// Whether retrying the same operation later may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			SyncError::Timeout { .. } => true,
			SyncError::Backend(e) => e.is_transport(),
			SyncError::Engine(e) | SyncError::FullScanFailed(e) => e.is_transport(),
			SyncError::Persistence(_) => false,
		}
	}
}
