use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached raw transaction.
///
/// Confirmed entries are immutable. Unconfirmed entries may be replaced, promoted to
/// confirmed, or pruned once they have been unconfirmed for too long.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
	pub txid: String,
	pub raw_hex: String,
	pub is_confirmed: bool,
	pub last_accessed: DateTime<Utc>,
	/// When the entry was first stored while unconfirmed; `None` for entries stored
	/// confirmed from the start.
	pub first_seen_unconfirmed_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
	pub fn new(txid: &str, raw_hex: &str, confirmed: bool, now: DateTime<Utc>) -> Self {
		Self {
			txid: txid.to_string(),
			raw_hex: raw_hex.to_string(),
			is_confirmed: confirmed,
			last_accessed: now,
			first_seen_unconfirmed_at: if confirmed { None } else { Some(now) },
		}
	}

	/// Whether an unconfirmed entry has been waiting longer than `max_age` at `now`.
	pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
		match (self.is_confirmed, self.first_seen_unconfirmed_at) {
			(false, Some(seen)) => now - seen > max_age,
			_ => false,
		}
	}
}
