use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::services::encryption::{ArtifactCipher, CipherError};

/// Local staging area for uploaded reports and their generated analyses.
///
/// Uploads are encrypted at rest and live only until their job reaches a
/// terminal state. Aggregate reports are written in plain text so they can be
/// downloaded directly.
pub struct ArtifactStorage {
    staging_dir: PathBuf,
    reports_dir: PathBuf,
    cipher: ArtifactCipher,
}

impl ArtifactStorage {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        reports_dir: impl Into<PathBuf>,
        cipher: ArtifactCipher,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            reports_dir: reports_dir.into(),
            cipher,
        }
    }

    /// Encrypt and stage an upload, returning its locator.
    pub async fn stage(&self, data: &[u8]) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let locator = format!("lab_report_{}.pdf.enc", Uuid::new_v4());
        let sealed = self.cipher.seal(&locator, data)?;
        tokio::fs::write(self.staging_path(&locator)?, sealed).await?;
        Ok(locator)
    }

    /// Read and decrypt a staged upload.
    pub async fn read(&self, locator: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.staging_path(locator)?;
        let sealed = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(locator.to_string()),
            _ => StorageError::Io(e),
        })?;
        Ok(self.cipher.open(locator, &sealed)?)
    }

    /// Remove a staged upload. Missing files are not an error.
    pub async fn remove(&self, locator: &str) -> Result<(), StorageError> {
        remove_if_present(&self.staging_path(locator)?).await
    }

    pub fn report_path(&self, job_id: Uuid) -> PathBuf {
        self.reports_dir
            .join(format!("analysis_report_{}.txt", job_id))
    }

    pub async fn write_report(&self, job_id: Uuid, content: &str) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(&self.reports_dir).await?;
        let path = self.report_path(job_id);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    pub async fn read_report(&self, job_id: Uuid) -> Result<String, StorageError> {
        tokio::fs::read_to_string(self.report_path(job_id))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::NotFound(format!("report for {}", job_id)),
                _ => StorageError::Io(e),
            })
    }

    pub async fn remove_report(&self, job_id: Uuid) -> Result<(), StorageError> {
        remove_if_present(&self.report_path(job_id)).await
    }

    /// Locators are bare file names; anything that could escape the staging
    /// directory is rejected.
    fn staging_path(&self, locator: &str) -> Result<PathBuf, StorageError> {
        let valid = !locator.is_empty()
            && Path::new(locator).file_name().and_then(|n| n.to_str()) == Some(locator)
            && locator != ".."
            && locator != ".";
        if !valid {
            return Err(StorageError::InvalidLocator(locator.to_string()));
        }
        Ok(self.staging_dir.join(locator))
    }
}

async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("staged artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact locator: {0}")]
    InvalidLocator(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("staged artifact unreadable: {0}")]
    Cipher(#[from] CipherError),
}
