use sha2::{Digest, Sha256};

/// Electrum script hash of an output script: SHA-256 of the script bytes, byte-reversed,
/// hex encoded.
pub fn script_hash(script_pubkey: &[u8]) -> String {
	let mut digest = Sha256::digest(script_pubkey).to_vec();
	digest.reverse();
	hex::encode(digest)
}

/// Whether `s` looks like a transaction id (64 hex characters).
pub fn is_txid(s: &str) -> bool {
	s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
