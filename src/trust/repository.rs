use crate::trust::decision::ServerCertificateRecord;
use crate::utils::{PersistError, read_json, write_json_atomic};
use std::path::PathBuf;
use tracing::info;

/// Repository for the pinned server certificate table
#[async_trait::async_trait]
pub trait CertificateRepository {
	async fn load_all(&self) -> Result<Vec<ServerCertificateRecord>, PersistError>;
	async fn save_all(&self, records: &[ServerCertificateRecord]) -> Result<(), PersistError>;
}

/// File-based implementation of CertificateRepository
pub struct FileCertificateRepository {
	data_dir: PathBuf,
}

impl FileCertificateRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_table_filename(&self) -> PathBuf {
		self.data_dir.join("server_certificates.json")
	}
}

#[async_trait::async_trait]
impl CertificateRepository for FileCertificateRepository {
	async fn load_all(&self) -> Result<Vec<ServerCertificateRecord>, PersistError> {
		Ok(read_json(&self.get_table_filename())
			.await?
			.unwrap_or_default())
	}

	async fn save_all(&self, records: &[ServerCertificateRecord]) -> Result<(), PersistError> {
		let filename = self.get_table_filename();
		write_json_atomic(&filename, &records).await?;
		info!("Saved {} pinned certificates to {:?}", records.len(), filename);
		Ok(())
	}
}
