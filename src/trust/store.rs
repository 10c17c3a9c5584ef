//! Trust store service.
//!
//! This module provides the `TrustStore`, which sits between the upstream connector and the
//! certificate repository. It looks up pinned fingerprints, runs the TOFU decision and
//! persists approvals. The store never approves anything on its own: a `FirstUse` or
//! `Mismatch` decision only changes the table through an explicit `approve` call.

use crate::trust::decision::{
	ServerCertificateRecord, TrustDecision, normalize_fingerprint, verify,
};
use crate::trust::repository::{CertificateRepository, FileCertificateRepository};
use crate::utils::PersistError;

use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::info;

/// Errors from the trust store. Unlike cache failures these are fatal for the connection
/// attempt, since an unreadable table cannot vouch for any server.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
	#[error("Certificate table error: {0}")]
	Persistence(#[from] PersistError),
}

/// Service for looking up, verifying and approving pinned server certificates.
pub struct TrustStore {
	repo: Box<dyn CertificateRepository + Send + Sync>,
	/// Serializes read-modify-write cycles on the table.
	write_lock: Mutex<()>,
}

impl TrustStore {
	/// Create a trust store backed by the JSON table in `data_dir`.
	pub fn new(data_dir: PathBuf) -> Self {
		Self::with_repository(Box::new(FileCertificateRepository::new(data_dir)))
	}

	pub fn with_repository(repo: Box<dyn CertificateRepository + Send + Sync>) -> Self {
		Self {
			repo,
			write_lock: Mutex::new(()),
		}
	}

	/// The pinned record for an endpoint, if any.
	pub async fn record(
		&self,
		host: &str,
		port: u16,
	) -> Result<Option<ServerCertificateRecord>, TrustError> {
		let records = self.repo.load_all().await?;
		Ok(records
			.into_iter()
			.find(|r| r.host.eq_ignore_ascii_case(host) && r.port == port))
	}

	/// Compare an observed fingerprint against the pinned one for this endpoint.
	///
	/// Returns the decision together with the stored fingerprint it was compared against.
	pub async fn evaluate(
		&self,
		host: &str,
		port: u16,
		observed: &str,
	) -> Result<(TrustDecision, Option<String>), TrustError> {
		let stored = self
			.record(host, port)
			.await?
			.map(|r| r.sha256_fingerprint);
		let decision = verify(host, port, observed, stored.as_deref());
		Ok((decision, stored))
	}

	/// Persist `fingerprint` as the pinned certificate for the endpoint.
	///
	/// Used for first-use approval and for explicit re-approval after a mismatch.
	pub async fn approve(&self, host: &str, port: u16, fingerprint: &str) -> Result<(), TrustError> {
		let _guard = self.write_lock.lock().await;

		let mut records = self.repo.load_all().await?;
		records.retain(|r| !(r.host.eq_ignore_ascii_case(host) && r.port == port));
		records.push(ServerCertificateRecord {
			host: host.to_string(),
			port,
			sha256_fingerprint: normalize_fingerprint(fingerprint),
			first_seen_at: chrono::Utc::now(),
		});
		self.repo.save_all(&records).await?;

		info!("Pinned certificate {} for {}:{}", fingerprint, host, port);
		Ok(())
	}

	/// Drop the pinned certificate for an endpoint.
	pub async fn forget(&self, host: &str, port: u16) -> Result<bool, TrustError> {
		let _guard = self.write_lock.lock().await;

		let mut records = self.repo.load_all().await?;
		let before = records.len();
		records.retain(|r| !(r.host.eq_ignore_ascii_case(host) && r.port == port));
		if records.len() == before {
			return Ok(false);
		}
		self.repo.save_all(&records).await?;
		Ok(true)
	}
}
