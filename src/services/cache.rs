use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::request::{AdvancedProcessingRequest, OutputFormat};
use crate::services::pipeline::encode::resolve_quality;
use crate::services::pipeline::watermark;

/// Namespace prefix for every result entry.
pub const CACHE_PREFIX: &str = "img_cache:";

/// Default time-to-live for cached results (24h).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Byte-level key/value cache with expiry. Implementations are shared across
/// every worker task and must tolerate concurrent calls.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// `Ok(None)` is a miss, not an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;
    /// Number of live keys starting with `prefix`.
    async fn count(&self, prefix: &str) -> Result<u64, CacheError>;
    async fn health_check(&self) -> Result<(), CacheError>;
}

/// Redis-backed result cache.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl Cacher for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn count(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        let mut total = 0;
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            total += keys.len() as u64;
            if next == 0 {
                return Ok(total);
            }
            cursor = next;
        }
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// What the cache remembers about one processed output: its metadata plus
/// the encoded bytes themselves, so a hit whose upload failed can still be
/// persisted later without re-running the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedOutput {
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    pub url: String,
    pub file_size: u64,
    /// Base64 of the encoded output.
    pub data: String,
    pub processed_at: DateTime<Utc>,
}

impl CachedOutput {
    /// False when the output was computed but never reached storage.
    pub fn is_uploaded(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn bytes(&self) -> Result<Vec<u8>, CacheError> {
        BASE64
            .decode(&self.data)
            .map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    pub fn encode_bytes(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }
}

/// Derives deterministic cache keys and wraps a [`Cacher`] with the
/// best-effort semantics the job path needs: read failures are misses and
/// write failures are logged.
#[derive(Clone)]
pub struct CacheKeyring {
    cache: Arc<dyn Cacher>,
    ttl: Duration,
}

impl CacheKeyring {
    pub fn new(cache: Arc<dyn Cacher>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `img_cache:` followed by the SHA-256 hex digest of the source identity
    /// and the canonical request.
    pub fn key(&self, source_identity: &str, request: &AdvancedProcessingRequest) -> String {
        cache_key(source_identity, request)
    }

    /// Raw read. Not-found is `Ok(None)`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.cache.get(key).await
    }

    /// Raw write with the configured TTL. Failure is logged, never returned.
    pub async fn set(&self, key: &str, value: &[u8]) {
        if let Err(e) = self.cache.set(key, value, self.ttl).await {
            tracing::warn!(cache_key = %key, error = %e, "Cache write failed");
            metrics::counter!("image_cache_writes_failed_total").increment(1);
        }
    }

    /// Read and decode a cached output. Anything other than a clean hit,
    /// including backend errors and undecodable entries, is a miss.
    pub async fn lookup(&self, key: &str) -> Option<CachedOutput> {
        let raw = match self.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::counter!("image_cache_lookups_total", "result" => "miss").increment(1);
                return None;
            }
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Cache read failed, treating as miss");
                metrics::counter!("image_cache_lookups_total", "result" => "error").increment(1);
                return None;
            }
        };

        match serde_json::from_slice::<CachedOutput>(&raw) {
            Ok(entry) => {
                metrics::counter!("image_cache_lookups_total", "result" => "hit").increment(1);
                Some(entry)
            }
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Discarding undecodable cache entry");
                metrics::counter!("image_cache_lookups_total", "result" => "error").increment(1);
                None
            }
        }
    }

    pub async fn store(&self, key: &str, entry: &CachedOutput) {
        match serde_json::to_vec(entry) {
            Ok(raw) => self.set(key, &raw).await,
            Err(e) => tracing::warn!(cache_key = %key, error = %e, "Could not serialize cache entry"),
        }
    }

    /// Number of cached results.
    pub async fn entries(&self) -> Result<u64, CacheError> {
        self.cache.count(CACHE_PREFIX).await
    }

    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.cache.health_check().await
    }
}

/// Identity of an uploaded blob that has no URL: a digest of its content.
pub fn content_identity(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

pub fn cache_key(source_identity: &str, request: &AdvancedProcessingRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_identity.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_request(request).as_bytes());
    format!("{CACHE_PREFIX}{:x}", hasher.finalize())
}

/// Stable textual form of a request.
///
/// Defaults are resolved first so that requests producing identical output
/// share a form: a missing quality equals 85 and format names are normalized.
/// Opacity enters as the alpha byte the watermark is drawn with. A watermark
/// with no text is the same as no watermark.
pub fn canonical_request(request: &AdvancedProcessingRequest) -> String {
    let mut out = String::from("v1");

    match &request.resize {
        Some(resize) => {
            let format = match resize.format.as_deref().map(str::trim) {
                None | Some("") => "source",
                Some(name) => OutputFormat::parse(name).unwrap_or(OutputFormat::Png).extension(),
            };
            let _ = write!(
                out,
                "|resize:{}x{}:q{}:{}",
                resize.width,
                resize.height,
                resolve_quality(resize.quality),
                format
            );
        }
        None => out.push_str("|resize:-"),
    }

    match &request.crop {
        Some(crop) => {
            let _ = write!(out, "|crop:{},{},{},{}", crop.x, crop.y, crop.width, crop.height);
        }
        None => out.push_str("|crop:-"),
    }

    match request.watermark.as_ref().filter(|w| !w.text.is_empty()) {
        Some(mark) => {
            // Length-prefixed so arbitrary text cannot forge a separator.
            let _ = write!(
                out,
                "|wm:{}:{}:{}:a{}",
                mark.text.len(),
                mark.text,
                mark.position,
                watermark::alpha(mark.opacity)
            );
        }
        None => out.push_str("|wm:-"),
    }

    let _ = write!(out, "|compress:{}", u8::from(request.compress));
    out
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}
