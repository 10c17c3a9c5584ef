//! Sync coordinator.
//!
//! This module provides the `SyncCoordinator`, which decides when and how aggressively one
//! wallet is resynchronized through the caching proxy. It owns the adaptive batch size,
//! the in-memory script-hash status cache and the single-flight lock shared by quick and
//! full syncs.
//!
//! The status cache only ever holds statuses observed *before* an engine sync that has
//! since succeeded. Committing fresher statuses would make the next pre-check report "no
//! change" for history the engine never saw.

use crate::cache::PersistentCache;
use crate::config::SyncConfig;
use crate::electrum::{ElectrumNotification, StatusMap};
use crate::wallet::backend::ElectrumBackend;
use crate::wallet::engine::WalletEngine;
use crate::wallet::sync::batch::AdaptiveBatchSize;
use crate::wallet::sync::ledger::{LedgerRefresh, TransactionLedger};
use crate::wallet::sync::precheck::{
	Precheck, revealed_script_hashes, sampled_script_hashes, snapshot_unchanged,
};
use crate::wallet::sync::repositories::{
	FileSyncMetadataRepository, SyncMetadata, SyncMetadataRepository,
};
use crate::wallet::types::{
	SyncError, SyncOutcome, SyncPhase, SyncStatus, TxDetails, WalletEvent,
};

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Coordinator-owned state. Only the batch size and the full-sync flags are persisted.
struct SyncState {
	phase: SyncPhase,
	batch: AdaptiveBatchSize,
	needs_full_sync: bool,
	last_full_sync_at: Option<DateTime<Utc>>,
	last_known_block_height: Option<u32>,
	status_cache: StatusMap,
	subscribed: BTreeSet<String>,
	/// Live subscriptions are active, so the full snapshot is available locally.
	live: bool,
}

impl SyncState {
	fn metadata(&self) -> SyncMetadata {
		SyncMetadata {
			batch_size: Some(self.batch.current()),
			needs_full_sync: self.needs_full_sync,
			last_full_sync_at: self.last_full_sync_at,
		}
	}
}

/// Drives one wallet's synchronization lifecycle.
pub struct SyncCoordinator<E: WalletEngine> {
	engine: Arc<E>,
	backend: Arc<dyn ElectrumBackend>,
	cache: Arc<PersistentCache>,
	metadata_repo: Box<dyn SyncMetadataRepository + Send + Sync>,
	config: SyncConfig,
	state: Mutex<SyncState>,
	ledger: Mutex<TransactionLedger>,
	/// Quick sync try-locks it, full sync waits on it.
	sync_lock: tokio::sync::Mutex<()>,
	tip: watch::Sender<Option<u32>>,
}

impl<E: WalletEngine> SyncCoordinator<E> {
	/// Create a coordinator persisting its metadata in `data_dir`.
	pub async fn new(
		engine: Arc<E>,
		backend: Arc<dyn ElectrumBackend>,
		cache: Arc<PersistentCache>,
		config: SyncConfig,
		data_dir: PathBuf,
	) -> Self {
		Self::with_repository(
			engine,
			backend,
			cache,
			config,
			Box::new(FileSyncMetadataRepository::new(data_dir)),
		)
		.await
	}

	pub async fn with_repository(
		engine: Arc<E>,
		backend: Arc<dyn ElectrumBackend>,
		cache: Arc<PersistentCache>,
		config: SyncConfig,
		metadata_repo: Box<dyn SyncMetadataRepository + Send + Sync>,
	) -> Self {
		let checkpoint = engine.latest_checkpoint_height();
		let metadata = match metadata_repo.load().await {
			Ok(metadata) => metadata,
			Err(e) => {
				warn!("Sync metadata unreadable, starting fresh: {}", e);
				None
			}
		};
		// Without metadata, only a wallet that never synced needs discovery.
		let metadata = metadata.unwrap_or(SyncMetadata {
			batch_size: None,
			needs_full_sync: checkpoint == 0,
			last_full_sync_at: None,
		});

		let last_known_block_height = (checkpoint > 0).then_some(checkpoint);
		let mut ledger = TransactionLedger::default();
		ledger.rebuild(engine.transactions());

		let state = SyncState {
			phase: SyncPhase::Idle,
			batch: AdaptiveBatchSize::new(&config, metadata.batch_size),
			needs_full_sync: metadata.needs_full_sync,
			last_full_sync_at: metadata.last_full_sync_at,
			last_known_block_height,
			status_cache: StatusMap::new(),
			subscribed: BTreeSet::new(),
			live: false,
		};
		let (tip, _) = watch::channel(backend.tip_height().or(last_known_block_height));

		Self {
			engine,
			backend,
			cache,
			metadata_repo,
			config,
			state: Mutex::new(state),
			ledger: Mutex::new(ledger),
			sync_lock: tokio::sync::Mutex::new(()),
			tip,
		}
	}

	pub fn config(&self) -> &SyncConfig {
		&self.config
	}

	/// Sync revealed addresses, skipping the engine when the pre-check finds no change.
	///
	/// Returns `AlreadyRunning` without doing anything if another sync holds the lock, a
	/// running full sync included. Runs a full sync instead while the wallet still needs
	/// discovery.
	pub async fn quick_sync(&self) -> Result<SyncOutcome, SyncError> {
		let Ok(_guard) = self.sync_lock.try_lock() else {
			debug!("Sync already in progress, skipping quick sync");
			return Ok(SyncOutcome::AlreadyRunning);
		};

		// Checked under the lock so a full sync that just finished is not repeated.
		if self.needs_full_sync() {
			info!("Wallet needs a full sync, running it instead of a quick sync");
			return self.run_full_sync().await;
		}

		self.set_phase(SyncPhase::QuickSyncing);
		let result = self.quick_sync_locked().await;
		self.set_phase(SyncPhase::Idle);
		result
	}

	async fn quick_sync_locked(&self) -> Result<SyncOutcome, SyncError> {
		self.backend.ping().await?;
		let tip_before = self.backend.tip_height();

		let snapshot = match self.precheck(tip_before).await? {
			Precheck::Unchanged => {
				debug!("No changes since the last sync, skipping engine sync");
				return Ok(SyncOutcome::NoChanges);
			}
			Precheck::Changed { snapshot } => snapshot,
		};

		let batch_size = self.state().batch.current();
		debug!("Quick sync with batch size {}", batch_size);

		let sync = self.engine.start_sync_with_revealed_spks(batch_size);
		let update = match timeout(self.config.quick_sync_timeout, sync).await {
			Ok(update) => update?,
			Err(_) => {
				let batch_size = self.state().batch.on_timeout();
				warn!(
					"Quick sync timed out after {:?}, batch size reduced to {}",
					self.config.quick_sync_timeout, batch_size
				);
				self.save_metadata_logged().await;
				return Err(SyncError::Timeout { batch_size });
			}
		};
		let events = self.engine.apply_update_events(update).await?;

		let batch_reset = self.state().batch.on_success();
		if batch_reset {
			self.save_metadata_logged().await;
		}

		self.finish_sync(&events, tip_before, snapshot, false).await;
		info!("Quick sync applied {} wallet events", events.len());
		Ok(SyncOutcome::Synced { events })
	}

	async fn precheck(&self, tip: Option<u32>) -> Result<Precheck, SyncError> {
		let (last_height, live) = {
			let state = self.state();
			(state.last_known_block_height, state.live)
		};

		let new_block = match (tip, last_height) {
			(Some(tip), Some(last)) => tip > last,
			(Some(_), None) => true,
			_ => false,
		};
		if new_block {
			debug!("New block {:?} since last sync at {:?}", tip, last_height);
			let snapshot = live.then(|| self.backend.live_statuses());
			return Ok(Precheck::Changed { snapshot });
		}

		let fresh = if live {
			self.backend.live_statuses()
		} else {
			let sample = sampled_script_hashes(self.engine.as_ref(), self.config.sample_size);
			self.backend.fetch_statuses(&sample).await?
		};

		let unchanged = snapshot_unchanged(&self.state().status_cache, &fresh);
		if unchanged {
			Ok(Precheck::Unchanged)
		} else {
			Ok(Precheck::Changed {
				snapshot: Some(fresh),
			})
		}
	}

	/// Gap-limit discovery scan. Waits for any in-flight sync instead of skipping.
	///
	/// On failure nothing is persisted and the wallet keeps needing a full sync.
	pub async fn full_sync(&self) -> Result<SyncOutcome, SyncError> {
		let _guard = self.sync_lock.lock().await;
		self.run_full_sync().await
	}

	/// Caller holds `sync_lock`.
	async fn run_full_sync(&self) -> Result<SyncOutcome, SyncError> {
		self.set_phase(SyncPhase::FullSyncing);
		let result = self.full_sync_locked().await;
		self.set_phase(SyncPhase::Idle);
		result
	}

	async fn full_sync_locked(&self) -> Result<SyncOutcome, SyncError> {
		info!(
			"Starting full sync (stop gap {}, batch size {})",
			self.config.stop_gap, self.config.full_scan_batch_size
		);
		self.prewarm_cache().await;
		// The engine's own fetches are only answered locally for confirmed entries.
		self.promote_confirmed().await;

		let tip_before = self.backend.tip_height();
		let snapshot = self.pre_scan_snapshot().await;

		let scan = self
			.engine
			.start_full_scan(self.config.stop_gap, self.config.full_scan_batch_size);
		let update = match scan.await {
			Ok(update) => update,
			Err(e) => {
				error!("Full scan failed: {}", e);
				return Err(SyncError::FullScanFailed(e));
			}
		};
		let events = match self.engine.apply_update_events(update).await {
			Ok(events) => events,
			Err(e) => {
				error!("Applying full scan failed: {}", e);
				return Err(SyncError::FullScanFailed(e));
			}
		};

		let metadata = {
			let mut state = self.state();
			state.needs_full_sync = false;
			state.last_full_sync_at = Some(Utc::now());
			state.batch.on_success();
			state.metadata()
		};

		self.finish_sync(&events, tip_before, snapshot, true).await;
		self.promote_confirmed().await;
		self.metadata_repo.save(&metadata).await?;

		info!(
			"Full sync completed with {} wallet events, {} transactions",
			events.len(),
			self.ledger().len()
		);
		Ok(SyncOutcome::Synced { events })
	}

	/// Fetch every transaction the engine already knows so its own serial fetches hit the
	/// cache.
	async fn prewarm_cache(&self) {
		let txids: Vec<String> = self
			.engine
			.transactions()
			.into_iter()
			.map(|tx| tx.txid)
			.collect();
		if txids.is_empty() {
			return;
		}

		match self.backend.pipeline_fetch_transactions(&txids).await {
			Ok(fetched) => debug!(
				"Prewarmed cache with {} of {} known transactions",
				fetched,
				txids.len()
			),
			Err(e) => warn!("Cache prewarm failed: {}", e),
		}
	}

	async fn pre_scan_snapshot(&self) -> Option<StatusMap> {
		if self.is_live() {
			return Some(self.backend.live_statuses());
		}
		let sample = sampled_script_hashes(self.engine.as_ref(), self.config.sample_size);
		if sample.is_empty() {
			return None;
		}
		match self.backend.fetch_statuses(&sample).await {
			Ok(statuses) => Some(statuses),
			Err(e) => {
				warn!("Could not snapshot script hash statuses: {}", e);
				None
			}
		}
	}

	async fn promote_confirmed(&self) {
		let confirmed: Vec<String> = self
			.engine
			.transactions()
			.into_iter()
			.filter(TxDetails::is_confirmed)
			.map(|tx| tx.txid)
			.collect();
		let promoted = self.cache.mark_confirmed_many(&confirmed).await;
		if promoted > 0 {
			debug!("Marked {} cached transactions confirmed", promoted);
		}
	}

	/// Post-sync bookkeeping shared by quick and full syncs.
	async fn finish_sync(
		&self,
		events: &[WalletEvent],
		tip_before: Option<u32>,
		snapshot: Option<StatusMap>,
		rebuild: bool,
	) {
		self.apply_cache_effects(events).await;

		let refresh = {
			let mut ledger = self.ledger();
			if rebuild {
				LedgerRefresh::Rebuilt(ledger.rebuild(self.engine.transactions()))
			} else {
				ledger.refresh(
					events,
					self.config.incremental_threshold,
					|txid| self.engine.transaction(txid),
					|| self.engine.transactions(),
				)
			}
		};
		debug!("Ledger refreshed: {:?}", refresh);

		let height = tip_before
			.unwrap_or(0)
			.max(self.engine.latest_checkpoint_height());
		if height > 0 {
			self.state().last_known_block_height = Some(height);
			self.observe_tip(height);
		}

		self.commit_snapshot(snapshot).await;
	}

	async fn apply_cache_effects(&self, events: &[WalletEvent]) {
		for event in events {
			match event {
				WalletEvent::TxConfirmed { txid } => {
					self.cache.mark_confirmed(txid).await;
				}
				WalletEvent::TxDropped { txid } | WalletEvent::TxReplaced { txid, .. } => {
					self.cache.evict_unconfirmed(txid).await;
				}
				WalletEvent::TxUnconfirmed { .. } | WalletEvent::ChainTipChanged => {}
			}
		}
	}

	/// Merge a pre-sync snapshot into the status cache and persist it.
	async fn commit_snapshot(&self, snapshot: Option<StatusMap>) {
		let Some(snapshot) = snapshot else {
			return;
		};
		let merged = {
			let mut state = self.state();
			state.status_cache.extend(snapshot);
			state.status_cache.clone()
		};
		self.cache.save_script_hash_statuses(&merged).await;
	}

	/// Subscribe every revealed script hash and bring the wallet up to date.
	///
	/// Runs a full sync first if the wallet still needs one. Otherwise the fresh statuses
	/// are compared with the snapshot persisted by the previous session and the engine is
	/// only invoked when they differ.
	pub async fn start_live_subscriptions(&self) -> Result<SyncOutcome, SyncError> {
		let script_hashes = revealed_script_hashes(self.engine.as_ref());
		let statuses = self.backend.start_subscriptions(&script_hashes).await?;
		{
			let mut state = self.state();
			state.subscribed.extend(script_hashes);
			state.live = true;
		}
		let tip = self.backend.tip_height();
		if let Some(tip) = tip {
			self.observe_tip(tip);
		}
		info!(
			"Live subscriptions active for {} script hashes",
			statuses.len()
		);

		let outcome = if self.needs_full_sync() {
			self.full_sync().await?
		} else {
			match self.cache.load_script_hash_statuses().await {
				Some(previous) if snapshot_unchanged(&previous, &statuses) => {
					info!("Script hash statuses unchanged since last session, skipping sync");
					if let Some(tip) = tip {
						self.state().last_known_block_height = Some(tip);
					}
					self.commit_snapshot(Some(statuses)).await;
					return Ok(SyncOutcome::NoChanges);
				}
				_ => self.quick_sync().await?,
			}
		};

		if matches!(outcome, SyncOutcome::Synced { .. }) {
			self.expand_subscriptions().await?;
		}
		Ok(outcome)
	}

	/// Run one quick sync for a debounced batch of notifications, then subscribe any
	/// addresses the sync revealed.
	pub async fn handle_notification_batch(
		&self,
		batch: &[ElectrumNotification],
	) -> Result<SyncOutcome, SyncError> {
		for notification in batch {
			if let ElectrumNotification::NewBlockHeader { height } = notification {
				self.observe_tip(*height);
			}
		}
		debug!("Syncing for {} notifications", batch.len());

		let outcome = self.quick_sync().await?;
		if matches!(outcome, SyncOutcome::Synced { .. }) && self.is_live() {
			self.expand_subscriptions().await?;
		}
		Ok(outcome)
	}

	/// Subscribe revealed script hashes that are not tracked yet (gap-limit expansion).
	///
	/// New statuses are not added to the status cache: the engine has not seen them, so
	/// the next pre-check must still report them as changed.
	pub async fn expand_subscriptions(&self) -> Result<usize, SyncError> {
		let fresh: Vec<String> = {
			let all = revealed_script_hashes(self.engine.as_ref());
			let state = self.state();
			all.into_iter()
				.filter(|sh| !state.subscribed.contains(sh))
				.collect()
		};
		if fresh.is_empty() {
			return Ok(0);
		}

		self.backend
			.subscribe_additional_script_hashes(&fresh)
			.await?;
		let added = fresh.len();
		self.state().subscribed.extend(fresh);

		info!("Subscribed to {} newly revealed script hashes", added);
		Ok(added)
	}

	/// Record a chain tip seen on the notification stream. Takes effect immediately.
	pub fn observe_tip(&self, height: u32) {
		self.tip.send_if_modified(|tip| {
			if *tip == Some(height) {
				return false;
			}
			*tip = Some(height);
			true
		});
	}

	/// Receiver for chain tip updates.
	pub fn chain_tip(&self) -> watch::Receiver<Option<u32>> {
		self.tip.subscribe()
	}

	pub fn status(&self) -> SyncStatus {
		let state = self.state();
		SyncStatus {
			phase: state.phase,
			batch_size: state.batch.current(),
			needs_full_sync: state.needs_full_sync,
			last_known_block_height: state.last_known_block_height,
			last_full_sync_at: state.last_full_sync_at,
			subscribed_script_hashes: state.subscribed.len(),
		}
	}

	pub fn transactions(&self) -> Vec<TxDetails> {
		self.ledger().transactions()
	}

	pub fn balance(&self) -> i64 {
		self.ledger().balance()
	}

	/// Forget the status cache and its persisted snapshot, e.g. on wallet switch.
	pub async fn reset_cached_statuses(&self) {
		self.state().status_cache.clear();
		self.cache.clear_script_hash_statuses().await;
		info!("Cleared cached script hash statuses");
	}

	/// Flag the wallet for discovery on its next sync.
	pub async fn request_full_sync(&self) -> Result<(), SyncError> {
		let metadata = {
			let mut state = self.state();
			state.needs_full_sync = true;
			state.metadata()
		};
		self.metadata_repo.save(&metadata).await?;
		Ok(())
	}

	async fn save_metadata_logged(&self) {
		let metadata = self.state().metadata();
		if let Err(e) = self.metadata_repo.save(&metadata).await {
			warn!("Failed to persist sync metadata: {}", e);
		}
	}

	fn needs_full_sync(&self) -> bool {
		self.state().needs_full_sync
	}

	fn is_live(&self) -> bool {
		self.state().live
	}

	fn set_phase(&self, phase: SyncPhase) {
		self.state().phase = phase;
	}

	fn state(&self) -> MutexGuard<'_, SyncState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn ledger(&self) -> MutexGuard<'_, TransactionLedger> {
		self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
