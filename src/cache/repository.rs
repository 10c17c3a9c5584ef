use crate::cache::types::CacheEntry;
use crate::electrum::StatusMap;
use crate::utils::{PersistError, read_json, remove_file_if_exists, write_json_atomic};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Repository for cached transaction blobs
#[async_trait::async_trait]
pub trait TransactionCacheRepository {
	async fn load(&self) -> Result<HashMap<String, CacheEntry>, PersistError>;
	async fn save(&self, entries: &HashMap<String, CacheEntry>) -> Result<(), PersistError>;
	async fn clear(&self) -> Result<(), PersistError>;
}

/// Repository for the script-hash status snapshot
#[async_trait::async_trait]
pub trait StatusSnapshotRepository {
	async fn load(&self) -> Result<Option<StatusMap>, PersistError>;
	async fn save(&self, statuses: &StatusMap) -> Result<(), PersistError>;
	async fn clear(&self) -> Result<(), PersistError>;
}

/// File-based implementation of TransactionCacheRepository
pub struct FileTransactionCacheRepository {
	data_dir: PathBuf,
}

impl FileTransactionCacheRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_cache_filename(&self) -> PathBuf {
		self.data_dir.join("transaction_cache.json")
	}
}

#[async_trait::async_trait]
impl TransactionCacheRepository for FileTransactionCacheRepository {
	async fn load(&self) -> Result<HashMap<String, CacheEntry>, PersistError> {
		let entries: HashMap<String, CacheEntry> = read_json(&self.get_cache_filename())
			.await?
			.unwrap_or_default();
		debug!("Loaded {} cached transactions", entries.len());
		Ok(entries)
	}

	async fn save(&self, entries: &HashMap<String, CacheEntry>) -> Result<(), PersistError> {
		write_json_atomic(&self.get_cache_filename(), entries).await
	}

	async fn clear(&self) -> Result<(), PersistError> {
		remove_file_if_exists(&self.get_cache_filename()).await
	}
}

/// File-based implementation of StatusSnapshotRepository
pub struct FileStatusSnapshotRepository {
	data_dir: PathBuf,
}

impl FileStatusSnapshotRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_snapshot_filename(&self) -> PathBuf {
		self.data_dir.join("scripthash_status.json")
	}
}

#[async_trait::async_trait]
impl StatusSnapshotRepository for FileStatusSnapshotRepository {
	async fn load(&self) -> Result<Option<StatusMap>, PersistError> {
		read_json(&self.get_snapshot_filename()).await
	}

	async fn save(&self, statuses: &StatusMap) -> Result<(), PersistError> {
		write_json_atomic(&self.get_snapshot_filename(), statuses).await
	}

	async fn clear(&self) -> Result<(), PersistError> {
		remove_file_if_exists(&self.get_snapshot_filename()).await
	}
}
