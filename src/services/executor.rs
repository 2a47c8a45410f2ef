use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::models::job::{ProcessedResult, ProcessingJob, ResolvedSize};
use crate::models::request::{AdvancedProcessingRequest, OutputFormat};
use crate::services::cache::{content_identity, CacheKeyring, CachedOutput};
use crate::services::fetch::{source_filename, FetchError, SourceFetcher};
use crate::services::pipeline::{TransformError, TransformOutput, Transformer};
use crate::services::single_flight::KeyedLocks;
use crate::services::storage::Uploader;

/// Where the source bytes come from.
enum SourceInput {
    /// Fetch lazily, only on a cache miss.
    Remote(String),
    /// Already in hand (multipart upload, batch slot).
    Bytes(Arc<Vec<u8>>),
}

/// The shared cache-check, transform, upload and cache-store sequence.
///
/// Used by worker pool consumers and by the synchronous handlers alike; every
/// collaborator is injected and shared.
pub struct JobExecutor {
    transformer: Arc<dyn Transformer>,
    keyring: CacheKeyring,
    uploader: Arc<dyn Uploader>,
    fetcher: Arc<dyn SourceFetcher>,
    locks: KeyedLocks,
}

impl JobExecutor {
    pub fn new(
        transformer: Arc<dyn Transformer>,
        keyring: CacheKeyring,
        uploader: Arc<dyn Uploader>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            transformer,
            keyring,
            uploader,
            fetcher,
            locks: KeyedLocks::new(),
        }
    }

    pub fn keyring(&self) -> &CacheKeyring {
        &self.keyring
    }

    /// Run a queued job. The cache identity of the source is its reference.
    pub async fn execute_job(&self, job: &ProcessingJob) -> Result<ProcessedResult, JobError> {
        self.run(
            &job.id,
            &job.image_url,
            source_filename(&job.image_url),
            &job.image_url,
            &job.request,
            SourceInput::Remote(job.image_url.clone()),
        )
        .await
    }

    /// Run a request against bytes already in hand. The cache identity is a
    /// digest of the content.
    pub async fn execute_upload(
        &self,
        id: &str,
        filename: &str,
        data: Arc<Vec<u8>>,
        request: &AdvancedProcessingRequest,
    ) -> Result<ProcessedResult, JobError> {
        let identity = content_identity(&data);
        self.run(id, filename, filename, &identity, request, SourceInput::Bytes(data))
            .await
    }

    async fn run(
        &self,
        id: &str,
        original_url: &str,
        filename: &str,
        identity: &str,
        request: &AdvancedProcessingRequest,
        input: SourceInput,
    ) -> Result<ProcessedResult, JobError> {
        request.check().map_err(TransformError::Validation)?;

        let key = self.keyring.key(identity, request);
        // An entry stored without a URL is repaired under the lock below.
        if let Some(hit) = self.keyring.lookup(&key).await.filter(CachedOutput::is_uploaded) {
            tracing::debug!(job_id = %id, cache_key = %key, "Cache hit");
            return Ok(from_cache(id, original_url, hit));
        }

        let _guard = self.locks.lock(&key).await;
        // Another caller may have filled the entry while we waited.
        if let Some(hit) = self.keyring.lookup(&key).await {
            tracing::debug!(job_id = %id, cache_key = %key, "Cache hit under lock");
            let hit = self.reupload(id, filename, &key, hit).await;
            return Ok(from_cache(id, original_url, hit));
        }

        let source = match input {
            SourceInput::Remote(url) => Arc::new(self.fetcher.fetch(&url).await?),
            SourceInput::Bytes(bytes) => bytes,
        };

        let output = self.transform(source, request.clone()).await?;

        let url = self
            .upload(id, &output.bytes, &output_filename(filename, output.format), output.format)
            .await;

        let processed_at = Utc::now();
        let entry = CachedOutput {
            format: output.format,
            width: output.width,
            height: output.height,
            quality: output.quality,
            url: url.clone(),
            file_size: output.bytes.len() as u64,
            data: CachedOutput::encode_bytes(&output.bytes),
            processed_at,
        };
        self.keyring.store(&key, &entry).await;

        Ok(ProcessedResult {
            id: id.to_string(),
            original_url: original_url.to_string(),
            url,
            file_size: output.bytes.len() as u64,
            processed_at,
            size: ResolvedSize {
                width: output.width,
                height: output.height,
                quality: output.quality,
                format: output.format,
            },
        })
    }

    /// Persist encoded output. Failure is logged and yields an empty URL.
    async fn upload(&self, id: &str, bytes: &[u8], name: &str, format: OutputFormat) -> String {
        match self.uploader.upload(bytes, name, format.content_type()).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Upload failed, completing without a URL");
                metrics::counter!("image_uploads_failed_total").increment(1);
                String::new()
            }
        }
    }

    /// Upload the bytes of a cached entry that has no URL yet and store the
    /// entry again with the URL it got.
    async fn reupload(&self, id: &str, filename: &str, key: &str, mut hit: CachedOutput) -> CachedOutput {
        if hit.is_uploaded() {
            return hit;
        }
        let bytes = match hit.bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(job_id = %id, cache_key = %key, error = %e, "Cached output unreadable, not re-uploading");
                return hit;
            }
        };

        let url = self
            .upload(id, &bytes, &output_filename(filename, hit.format), hit.format)
            .await;
        if !url.is_empty() {
            tracing::info!(job_id = %id, cache_key = %key, "Uploaded cached output");
            hit.url = url;
            self.keyring.store(key, &hit).await;
        }
        hit
    }

    /// Decode, transform and encode on the blocking pool.
    async fn transform(
        &self,
        source: Arc<Vec<u8>>,
        request: AdvancedProcessingRequest,
    ) -> Result<TransformOutput, JobError> {
        let transformer = self.transformer.clone();
        let output = tokio::task::spawn_blocking(move || transformer.process(&source, &request))
            .await
            .map_err(|e| JobError::Aborted(e.to_string()))??;
        Ok(output)
    }
}

fn from_cache(id: &str, original_url: &str, hit: CachedOutput) -> ProcessedResult {
    ProcessedResult {
        id: id.to_string(),
        original_url: original_url.to_string(),
        url: hit.url,
        file_size: hit.file_size,
        processed_at: Utc::now(),
        size: ResolvedSize {
            width: hit.width,
            height: hit.height,
            quality: hit.quality,
            format: hit.format,
        },
    }
}

/// The source stem with the output format's extension.
fn output_filename(source: &str, format: OutputFormat) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("{stem}.{}", format.extension())
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("processing aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_takes_the_output_extension() {
        assert_eq!(output_filename("cat.jpeg", OutputFormat::Webp), "cat.webp");
        assert_eq!(output_filename("", OutputFormat::Webp), "image.webp");
    }
}
