//! Persistent cache service.
//!
//! This module provides the `PersistentCache`, a durable local store for raw transaction
//! blobs and for the script-hash status snapshot used by the bootstrap comparison. The cache
//! is an optimization only: every I/O failure is logged and turned into a miss or a no-op,
//! so callers can always fall through to the network.
//!
//! Transaction mutations only touch memory. A write-behind task persists the table, and a
//! burst of mutations collapses into one or two file writes.

use crate::cache::repository::{
	FileStatusSnapshotRepository, FileTransactionCacheRepository, StatusSnapshotRepository,
	TransactionCacheRepository,
};
use crate::cache::types::CacheEntry;
use crate::electrum::StatusMap;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// The transaction table shared with the write-behind task.
struct TransactionTable {
	repo: Box<dyn TransactionCacheRepository + Send + Sync>,
	entries: Mutex<HashMap<String, CacheEntry>>,
	/// Held while the file is written so snapshots land in order.
	write_lock: Mutex<()>,
}

impl TransactionTable {
	async fn write_snapshot(&self) {
		let _writing = self.write_lock.lock().await;
		let snapshot = self.entries.lock().await.clone();
		if let Err(e) = self.repo.save(&snapshot).await {
			warn!("Failed to persist transaction cache: {}", e);
		}
	}
}

/// Persist the table whenever it is marked dirty. Exits once the cache is dropped.
async fn write_behind(table: Arc<TransactionTable>, mut dirty: mpsc::Receiver<()>) {
	while dirty.recv().await.is_some() {
		table.write_snapshot().await;
	}
}

/// Durable transaction and status-snapshot cache.
pub struct PersistentCache {
	table: Arc<TransactionTable>,
	status_repo: Box<dyn StatusSnapshotRepository + Send + Sync>,
	/// At most one queued signal; the write it triggers covers every earlier mutation.
	dirty: mpsc::Sender<()>,
}

impl PersistentCache {
	/// Open the cache stored in `data_dir`, starting empty if it cannot be read.
	pub async fn open(data_dir: PathBuf) -> Self {
		Self::with_repositories(
			Box::new(FileTransactionCacheRepository::new(data_dir.clone())),
			Box::new(FileStatusSnapshotRepository::new(data_dir)),
		)
		.await
	}

	pub async fn with_repositories(
		tx_repo: Box<dyn TransactionCacheRepository + Send + Sync>,
		status_repo: Box<dyn StatusSnapshotRepository + Send + Sync>,
	) -> Self {
		let entries = match tx_repo.load().await {
			Ok(entries) => entries,
			Err(e) => {
				warn!("Transaction cache unreadable, starting empty: {}", e);
				HashMap::new()
			}
		};

		let table = Arc::new(TransactionTable {
			repo: tx_repo,
			entries: Mutex::new(entries),
			write_lock: Mutex::new(()),
		});
		let (dirty, dirty_rx) = mpsc::channel(1);
		tokio::spawn(write_behind(table.clone(), dirty_rx));

		Self {
			table,
			status_repo,
			dirty,
		}
	}

	/// Raw hex for `txid`, if cached.
	pub async fn get(&self, txid: &str) -> Option<String> {
		self.get_entry(txid).await.map(|e| e.raw_hex)
	}

	/// Full cache entry for `txid`, refreshing its access time.
	pub async fn get_entry(&self, txid: &str) -> Option<CacheEntry> {
		let mut entries = self.table.entries.lock().await;
		let entry = entries.get_mut(txid)?;
		entry.last_accessed = Utc::now();
		Some(entry.clone())
	}

	pub async fn contains(&self, txid: &str) -> bool {
		self.table.entries.lock().await.contains_key(txid)
	}

	pub async fn len(&self) -> usize {
		self.table.entries.lock().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.table.entries.lock().await.is_empty()
	}

	/// Store a transaction.
	///
	/// A confirmed entry replaces an unconfirmed one but is never replaced itself. Returns
	/// whether the stored value changed.
	pub async fn put(&self, txid: &str, raw_hex: &str, confirmed: bool) -> bool {
		let now = Utc::now();
		let mut entries = self.table.entries.lock().await;

		match entries.get_mut(txid) {
			Some(existing) if existing.is_confirmed => {
				debug!("Ignoring write to confirmed cache entry {}", txid);
				return false;
			}
			Some(existing) if !confirmed => {
				existing.raw_hex = raw_hex.to_string();
				existing.last_accessed = now;
			}
			_ => {
				entries.insert(txid.to_string(), CacheEntry::new(txid, raw_hex, confirmed, now));
			}
		}

		self.mark_dirty();
		true
	}

	/// Promote an unconfirmed entry to confirmed, making it immutable.
	pub async fn mark_confirmed(&self, txid: &str) -> bool {
		self.mark_confirmed_many(std::slice::from_ref(&txid)).await == 1
	}

	/// Promote several entries at once. Returns how many were promoted.
	pub async fn mark_confirmed_many<S: AsRef<str>>(&self, txids: &[S]) -> usize {
		let mut entries = self.table.entries.lock().await;
		let mut promoted = 0;
		for txid in txids {
			let Some(entry) = entries.get_mut(txid.as_ref()) else {
				continue;
			};
			if entry.is_confirmed {
				continue;
			}
			entry.is_confirmed = true;
			entry.first_seen_unconfirmed_at = None;
			promoted += 1;
		}

		if promoted > 0 {
			debug!("Promoted {} cached transactions to confirmed", promoted);
			self.mark_dirty();
		}
		promoted
	}

	/// Remove an unconfirmed entry, e.g. after the transaction was dropped or replaced.
	pub async fn evict_unconfirmed(&self, txid: &str) -> bool {
		let mut entries = self.table.entries.lock().await;
		if !entries.get(txid).is_some_and(|e| !e.is_confirmed) {
			return false;
		}
		entries.remove(txid);

		self.mark_dirty();
		true
	}

	/// Remove unconfirmed entries first seen more than `max_age` ago.
	pub async fn prune_stale_unconfirmed(&self, max_age: Duration) -> usize {
		self.prune_stale_unconfirmed_at(Utc::now(), max_age).await
	}

	pub(crate) async fn prune_stale_unconfirmed_at(
		&self,
		now: DateTime<Utc>,
		max_age: Duration,
	) -> usize {
		let max_age = chrono::Duration::from_std(max_age)
			.unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

		let mut entries = self.table.entries.lock().await;
		let before = entries.len();
		entries.retain(|_, entry| !entry.is_stale(now, max_age));
		let pruned = before - entries.len();

		if pruned > 0 {
			info!("Pruned {} stale unconfirmed transactions from cache", pruned);
			self.mark_dirty();
		}
		pruned
	}

	/// Snapshot saved by the previous session, if any.
	pub async fn load_script_hash_statuses(&self) -> Option<StatusMap> {
		match self.status_repo.load().await {
			Ok(snapshot) => snapshot,
			Err(e) => {
				warn!("Script hash snapshot unreadable, treating as absent: {}", e);
				None
			}
		}
	}

	pub async fn save_script_hash_statuses(&self, statuses: &StatusMap) {
		if let Err(e) = self.status_repo.save(statuses).await {
			warn!("Failed to persist script hash snapshot: {}", e);
		} else {
			debug!("Persisted script hash snapshot with {} entries", statuses.len());
		}
	}

	pub async fn clear_script_hash_statuses(&self) {
		if let Err(e) = self.status_repo.clear().await {
			warn!("Failed to clear script hash snapshot: {}", e);
		}
	}

	/// Drop every cached transaction and the status snapshot.
	pub async fn clear_all(&self) {
		{
			let _writing = self.table.write_lock.lock().await;
			self.table.entries.lock().await.clear();
			if let Err(e) = self.table.repo.clear().await {
				warn!("Failed to clear transaction cache: {}", e);
			}
		}

		self.clear_script_hash_statuses().await;
		info!("Cleared transaction cache and script hash snapshot");
	}

	/// Write the transaction table now instead of waiting for the write-behind task.
	pub async fn flush(&self) {
		self.table.write_snapshot().await;
	}

	fn mark_dirty(&self) {
		// A full channel already holds a pending write.
		let _ = self.dirty.try_send(());
	}
}
