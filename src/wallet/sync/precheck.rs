//! Cheap "has anything changed" checks run before an engine sync.

use crate::electrum::{StatusMap, script_hash};
use crate::wallet::engine::WalletEngine;
use crate::wallet::types::Keychain;

/// Result of the pre-check.
#[derive(Debug, Clone, PartialEq)]
pub enum Precheck {
	/// Nothing changed since the last sync; the engine call can be skipped.
	Unchanged,
	/// A sync is needed. `snapshot` holds the statuses observed before the sync, to be
	/// committed once the engine has incorporated them.
	Changed { snapshot: Option<StatusMap> },
}

/// Whether every status in `fresh` matches the one in `cached`.
///
/// An empty `fresh` snapshot proves nothing and counts as changed, as does any script hash
/// missing from `cached`.
pub fn snapshot_unchanged(cached: &StatusMap, fresh: &StatusMap) -> bool {
	!fresh.is_empty()
		&& fresh
			.iter()
			.all(|(sh, status)| cached.get(sh).is_some_and(|c| c == status))
}

/// Script hashes of every revealed script pubkey on both keychains.
pub fn revealed_script_hashes<E: WalletEngine + ?Sized>(engine: &E) -> Vec<String> {
	Keychain::ALL
		.into_iter()
		.flat_map(|keychain| engine.revealed_script_pubkeys(keychain))
		.map(|spk| script_hash(&spk))
		.collect()
}

/// Script hashes of the `sample_size` most recently revealed script pubkeys per keychain.
pub fn sampled_script_hashes<E: WalletEngine + ?Sized>(engine: &E, sample_size: usize) -> Vec<String> {
	Keychain::ALL
		.into_iter()
		.flat_map(|keychain| {
			let spks = engine.revealed_script_pubkeys(keychain);
			let skip = spks.len().saturating_sub(sample_size);
			spks.into_iter().skip(skip)
		})
		.map(|spk| script_hash(&spk))
		.collect()
}
