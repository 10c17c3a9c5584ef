//! JSON file helpers shared by the file-backed repositories.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Errors raised while reading or writing a persisted JSON document.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Read and decode a JSON document, returning `None` when the file does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
	let content = match tokio::fs::read_to_string(path).await {
		Ok(content) => content,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e.into()),
	};

	Ok(Some(serde_json::from_str(&content)?))
}

/// Encode `value` as JSON and replace `path` with it.
///
/// The document is written to a sibling temporary file first and then renamed over the
/// target, so readers never observe a half-written file.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}

	let content = serde_json::to_vec_pretty(value)?;
	let tmp_path = path.with_extension("json.tmp");
	tokio::fs::write(&tmp_path, &content).await?;
	tokio::fs::rename(&tmp_path, path).await?;
	Ok(())
}

/// Remove a file, treating an already missing file as success.
pub async fn remove_file_if_exists(path: &Path) -> Result<(), PersistError> {
	match tokio::fs::remove_file(path).await {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(e.into()),
	}
}
