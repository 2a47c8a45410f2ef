use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::services::storage::{StorageError, Uploader};

/// Timeout for a whole source download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on source size (10 MiB).
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 10 * 1024 * 1024;

/// Resolves a job's source reference to its bytes.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches `http(s)://` sources over the network and treats anything else as
/// a path in blob storage.
pub struct HttpSourceFetcher {
    client: reqwest::Client,
    storage: Arc<dyn Uploader>,
    max_bytes: usize,
}

impl HttpSourceFetcher {
    pub fn new(storage: Arc<dyn Uploader>, max_bytes: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
        Ok(Self {
            client,
            storage,
            max_bytes,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
        }

        // Content-Length can lie or be absent; enforce the cap on the stream.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        let bytes = if is_remote(source) {
            self.download(source).await?
        } else {
            let bytes = self.storage.download(source).await?;
            if bytes.len() > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
            bytes
        };

        check_image_bytes(&bytes)?;
        tracing::debug!(source = %source, bytes = bytes.len(), "Fetched source image");
        Ok(bytes)
    }
}

pub fn is_remote(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Reject empty bodies and bodies without a recognizable image signature.
pub fn check_image_bytes(bytes: &[u8]) -> Result<(), FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::Empty);
    }
    image::guess_format(bytes).map_err(|_| FetchError::NotAnImage)?;
    Ok(())
}

/// File name for a source reference: the last path segment without query or
/// fragment.
pub fn source_filename(source: &str) -> &str {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    path.rsplit('/').find(|segment| !segment.is_empty()).unwrap_or("image")
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("download failed with status {0}")]
    Status(u16),

    #[error("source exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("source is empty")]
    Empty,

    #[error("source is not a supported image")]
    NotAnImage,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_sources_are_http_urls() {
        assert!(is_remote("https://example.com/a.png"));
        assert!(is_remote("HTTP://example.com/a.png"));
        assert!(!is_remote("uploads/a.png"));
        assert!(!is_remote("ftp://example.com/a.png"));
    }

    #[test]
    fn filename_comes_from_last_segment() {
        assert_eq!(source_filename("https://cdn.example.com/img/cat.jpg?w=1#x"), "cat.jpg");
        assert_eq!(source_filename("uploads/dog.png"), "dog.png");
        assert_eq!(source_filename("https://example.com/dir/"), "dir");
    }

    #[test]
    fn image_signature_is_required() {
        assert!(matches!(check_image_bytes(b""), Err(FetchError::Empty)));
        assert!(matches!(check_image_bytes(b"<html></html>"), Err(FetchError::NotAnImage)));
        assert!(check_image_bytes(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]).is_ok());
    }
}
