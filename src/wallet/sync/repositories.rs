use crate::utils::{PersistError, read_json, write_json_atomic};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Coordinator state that survives restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
	pub batch_size: Option<usize>,
	pub needs_full_sync: bool,
	pub last_full_sync_at: Option<DateTime<Utc>>,
}

/// Repository for sync metadata persistence
#[async_trait::async_trait]
pub trait SyncMetadataRepository {
	async fn load(&self) -> Result<Option<SyncMetadata>, PersistError>;
	async fn save(&self, metadata: &SyncMetadata) -> Result<(), PersistError>;
}

/// File-based implementation of SyncMetadataRepository
pub struct FileSyncMetadataRepository {
	data_dir: PathBuf,
}

impl FileSyncMetadataRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_metadata_filename(&self) -> PathBuf {
		self.data_dir.join("sync_metadata.json")
	}
}

#[async_trait::async_trait]
impl SyncMetadataRepository for FileSyncMetadataRepository {
	async fn load(&self) -> Result<Option<SyncMetadata>, PersistError> {
		read_json(&self.get_metadata_filename()).await
	}

	async fn save(&self, metadata: &SyncMetadata) -> Result<(), PersistError> {
		write_json_atomic(&self.get_metadata_filename(), metadata).await?;
		debug!(
			"Saved sync metadata (batch size {:?}, needs full sync {})",
			metadata.batch_size, metadata.needs_full_sync
		);
		Ok(())
	}
}
