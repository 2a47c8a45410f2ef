use std::path::Path;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

/// Prefix under which every processed output is written.
pub const PROCESSED_PREFIX: &str = "processed/";

/// Blob storage for processed outputs and uploaded sources. Implementations
/// are shared across worker tasks and must tolerate concurrent calls.
///
/// Every operation is a single attempt.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Store `data` under a fresh key derived from `filename` and return its
    /// public URL.
    async fn upload(&self, data: &[u8], filename: &str, content_type: &str) -> Result<String, StorageError>;
    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
    async fn health_check(&self) -> Result<(), StorageError>;
}

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Base for public object URLs. Falls back to the bucket URL.
    pub public_base_url: Option<String>,
}

/// Object storage client for any S3-compatible store (MinIO, R2, S3).
pub struct StorageGateway {
    bucket: Box<Bucket>,
    public_base_url: Option<String>,
}

impl StorageGateway {
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
        };

        let credentials = Credentials::new(
            Some(settings.access_key.as_str()),
            Some(settings.secret_key.as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            public_base_url: settings
                .public_base_url
                .as_deref()
                .map(|base| base.trim_end_matches('/').to_string())
                .filter(|base| !base.is_empty()),
        })
    }

    pub fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("{}/{key}", self.bucket.url()),
        }
    }
}

#[async_trait]
impl Uploader for StorageGateway {
    async fn upload(&self, data: &[u8], filename: &str, content_type: &str) -> Result<String, StorageError> {
        let key = storage_key(filename);

        let response = self
            .bucket
            .put_object_with_content_type(&key, data, content_type)
            .await?;
        check_status(&key, response.status_code())?;

        // A short write is reported by the stored length, not the PUT status.
        let (head, status) = self.bucket.head_object(&key).await?;
        check_status(&key, status)?;
        let stored = head.content_length.unwrap_or_default();
        if stored != data.len() as i64 {
            return Err(StorageError::Truncated {
                key,
                expected: data.len() as u64,
                actual: stored.max(0) as u64,
            });
        }

        tracing::debug!(key = %key, bytes = data.len(), "Uploaded object");
        Ok(self.public_url(&key))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let key = path.trim_start_matches('/');
        let response = self.bucket.get_object(key).await?;
        check_status(key, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let key = path.trim_start_matches('/');
        let response = self.bucket.delete_object(key).await?;
        check_status(key, response.status_code())?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let (_, status) = self
            .bucket
            .list_page(PROCESSED_PREFIX.to_string(), Some("/".to_string()), None, None, Some(1))
            .await?;
        check_status(PROCESSED_PREFIX, status)
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(StorageError::Status {
            key: key.to_string(),
            status,
        })
    }
}

/// Object key for an output: `processed/{stem}_{unix}_{random8}{.ext}`.
///
/// The stem is reduced to `[A-Za-z0-9_-]`; a missing stem becomes `image`.
pub fn storage_key(filename: &str) -> String {
    let path = Path::new(filename);

    let stem: String = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "image".to_string() } else { stem };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{PROCESSED_PREFIX}{stem}_{}_{}{ext}",
        chrono::Utc::now().timestamp(),
        &random[..8]
    )
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Storage returned status {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Partial upload of {key}: stored {actual} of {expected} bytes")]
    Truncated { key: String, expected: u64, actual: u64 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
