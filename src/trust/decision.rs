//! Trust-on-first-use decision for TLS upstreams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Pinned certificate for one `(host, port)` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerCertificateRecord {
	pub host: String,
	pub port: u16,
	/// Lowercase hex SHA-256 of the DER-encoded leaf certificate.
	pub sha256_fingerprint: String,
	pub first_seen_at: DateTime<Utc>,
}

/// Outcome of comparing an observed certificate against the pinned one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
	/// Matches the pinned fingerprint; proceed transparently.
	Trusted,
	/// Nothing pinned for this endpoint; needs explicit approval before use.
	FirstUse,
	/// Differs from the pinned fingerprint; possible interception.
	Mismatch,
}

impl TrustDecision {
	pub fn is_trusted(&self) -> bool {
		matches!(self, TrustDecision::Trusted)
	}
}

/// Normalize a fingerprint to lowercase hex without separators.
pub fn normalize_fingerprint(fingerprint: &str) -> String {
	fingerprint
		.chars()
		.filter(|c| *c != ':' && !c.is_whitespace())
		.collect::<String>()
		.to_ascii_lowercase()
}

/// Decide whether an observed certificate fingerprint can be trusted.
///
/// This is a pure decision; persisting an approval and closing sockets are the caller's
/// responsibility.
pub fn verify(host: &str, port: u16, observed: &str, stored: Option<&str>) -> TrustDecision {
	let observed = normalize_fingerprint(observed);
	match stored.map(normalize_fingerprint) {
		None => {
			debug!("No pinned certificate for {}:{}", host, port);
			TrustDecision::FirstUse
		}
		Some(stored) if stored == observed => TrustDecision::Trusted,
		Some(stored) => {
			warn!(
				"Certificate for {}:{} changed: pinned {} but server presented {}",
				host, port, stored, observed
			);
			TrustDecision::Mismatch
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_stored_fingerprint_is_first_use() {
		assert_eq!(
			verify("example.org", 50002, "aa", None),
			TrustDecision::FirstUse
		);
	}

	#[test]
	fn equal_fingerprints_are_trusted() {
		assert_eq!(
			verify("example.org", 50002, "AA:BB:cc", Some("aabbcc")),
			TrustDecision::Trusted
		);
	}

	#[test]
	fn different_fingerprint_is_mismatch() {
		let decision = verify("example.org", 50002, "aabbcc", Some("aabbcd"));
		assert_eq!(decision, TrustDecision::Mismatch);
		assert!(!decision.is_trusted());
	}
}
