//! Wallet engine boundary.
//!
//! The engine owns keys, addresses, UTXOs and balances. The coordinator only decides when
//! and how aggressively to call it, so it sees the engine as an opaque capability set.

use crate::proxy::ProxyError;
use crate::wallet::types::{Keychain, TxDetails, WalletEvent};

/// Errors reported by a wallet engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
	/// The engine's own Electrum client failed, usually while talking to the local proxy
	#[error("Electrum client error: {0}")]
	Backend(#[from] ProxyError),

	#[error("{0}")]
	Other(String),
}

impl EngineError {
	pub fn is_transport(&self) -> bool {
		matches!(self, EngineError::Backend(e) if e.is_transport())
	}
}

/// Wallet bookkeeping engine driven by the sync coordinator.
///
/// Sync calls return an opaque update that is applied separately, so a timed-out sync never
/// leaves half-applied state behind.
#[async_trait::async_trait]
pub trait WalletEngine: Send + Sync {
	type Update: Send + 'static;

	/// Sync every revealed script pubkey, `batch_size` scripts per request batch.
	async fn start_sync_with_revealed_spks(
		&self,
		batch_size: usize,
	) -> Result<Self::Update, EngineError>;

	/// Gap-limit discovery scan over both keychains.
	async fn start_full_scan(
		&self,
		stop_gap: usize,
		batch_size: usize,
	) -> Result<Self::Update, EngineError>;

	/// Apply an update and report what changed.
	async fn apply_update_events(
		&self,
		update: Self::Update,
	) -> Result<Vec<WalletEvent>, EngineError>;

	/// Revealed script pubkeys of a keychain, in derivation order.
	fn revealed_script_pubkeys(&self, keychain: Keychain) -> Vec<Vec<u8>>;

	/// Height of the latest block the engine has incorporated; zero for a fresh wallet.
	fn latest_checkpoint_height(&self) -> u32;

	fn transaction(&self, txid: &str) -> Option<TxDetails>;

	fn transactions(&self) -> Vec<TxDetails>;
}
