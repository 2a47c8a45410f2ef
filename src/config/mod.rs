use std::time::Duration;

use serde::Deserialize;

use crate::services::storage::StorageSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the result cache
    pub redis_url: String,

    /// Redis connection string for the job queue. Defaults to `redis_url`.
    #[serde(default)]
    pub broker_url: Option<String>,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Bucket for processed outputs
    pub s3_bucket: String,

    /// S3-compatible endpoint URL (MinIO, R2, AWS)
    pub s3_endpoint: String,

    #[serde(default = "default_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Base for public object URLs; the bucket URL when unset
    #[serde(default)]
    pub public_base_url: Option<String>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,

    #[serde(default = "default_max_batch_inputs")]
    pub max_batch_inputs: usize,

    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Readable prefix for this worker process's consumer names. Each pool
    /// run adds its own random suffix, so processes may share a prefix.
    #[serde(default = "default_worker_name")]
    pub worker_name: String,

    /// Consumer liveness lease. Deliveries of a worker that stops renewing
    /// are requeued after this long.
    #[serde(default = "default_worker_lease_secs")]
    pub worker_lease_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_queue_name() -> String {
    crate::services::queue::DEFAULT_QUEUE_NAME.to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_worker_concurrency() -> usize {
    crate::services::worker::DEFAULT_CONCURRENCY
}

fn default_max_source_bytes() -> usize {
    crate::services::fetch::DEFAULT_MAX_SOURCE_BYTES
}

fn default_max_batch_inputs() -> usize {
    crate::services::batch::DEFAULT_MAX_INPUTS
}

fn default_poll_timeout_secs() -> u64 {
    1
}

fn default_worker_name() -> String {
    "worker".to_string()
}

fn default_worker_lease_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn broker_url(&self) -> &str {
        self.broker_url.as_deref().unwrap_or(&self.redis_url)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }

    pub fn worker_lease(&self) -> Duration {
        Duration::from_secs(self.worker_lease_secs.max(1))
    }

    pub fn storage(&self) -> StorageSettings {
        StorageSettings {
            bucket: self.s3_bucket.clone(),
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
            public_base_url: self.public_base_url.clone(),
        }
    }
}
