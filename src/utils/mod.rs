//!
//! Utility module shared by the cache, trust and sync repositories.
//!
//! Re-exports the JSON persistence helpers used by every file-backed store.
/// Atomic JSON document persistence
pub mod persist;

pub use persist::{PersistError, read_json, remove_file_if_exists, write_json_atomic};
