use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::{
    batch::BatchCoordinator,
    cache::{CacheError, CacheKeyring, Cacher, RedisCache},
    executor::JobExecutor,
    fetch::{FetchError, HttpSourceFetcher, SourceFetcher},
    health::HealthProbe,
    pipeline::{TransformationPipeline, Transformer},
    queue::{Broker, JobQueue, QueueError, RedisBroker},
    storage::{StorageError, StorageGateway, Uploader},
};

/// Client handles for every external service. Each one is shared by all
/// request handlers and worker tasks.
#[derive(Clone)]
pub struct Backends {
    pub broker: Arc<dyn Broker>,
    pub cache: Arc<dyn Cacher>,
    pub storage: Arc<dyn Uploader>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub transformer: Arc<dyn Transformer>,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub cache_ttl: Duration,
    /// Largest accepted source image, downloaded or uploaded.
    pub max_source_bytes: usize,
    pub max_batch_inputs: usize,
}

impl Limits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl(),
            max_source_bytes: config.max_source_bytes,
            max_batch_inputs: config.max_batch_inputs,
        }
    }

    /// Largest request body: a full batch plus room for form fields.
    pub fn body_limit(&self) -> usize {
        self.max_source_bytes
            .saturating_mul(self.max_batch_inputs.max(1))
            .saturating_add(64 * 1024)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cache_ttl: crate::services::cache::DEFAULT_TTL,
            max_source_bytes: crate::services::fetch::DEFAULT_MAX_SOURCE_BYTES,
            max_batch_inputs: crate::services::batch::DEFAULT_MAX_INPUTS,
        }
    }
}

/// Shared application state passed to all route handlers and the worker pool.
#[derive(Clone)]
pub struct AppState {
    pub queue: JobQueue,
    pub executor: Arc<JobExecutor>,
    pub batch: Arc<BatchCoordinator>,
    pub health: HealthProbe,
    pub limits: Limits,
}

impl AppState {
    pub fn new(backends: Backends, limits: Limits) -> Self {
        let queue = JobQueue::new(backends.broker);
        let keyring = CacheKeyring::new(backends.cache, limits.cache_ttl);
        let executor = Arc::new(JobExecutor::new(
            backends.transformer,
            keyring.clone(),
            backends.storage.clone(),
            backends.fetcher,
        ));

        Self {
            batch: Arc::new(BatchCoordinator::new(executor.clone(), limits.max_batch_inputs)),
            health: HealthProbe::new(queue.clone(), keyring, backends.storage),
            queue,
            executor,
            limits,
        }
    }

    /// Build clients for the configured Redis and S3 endpoints. No network
    /// traffic happens here; unreachable services show up in health checks.
    pub fn connect(config: &AppConfig) -> Result<Self, StartupError> {
        tracing::info!(queue = %config.queue_name, "Initializing Redis job queue");
        let broker = RedisBroker::new(config.broker_url(), config.queue_name.clone())?;

        tracing::info!("Initializing Redis result cache");
        let cache = RedisCache::new(&config.redis_url)?;

        tracing::info!(bucket = %config.s3_bucket, "Initializing object storage client");
        let storage: Arc<dyn Uploader> = Arc::new(StorageGateway::new(&config.storage())?);
        let fetcher = HttpSourceFetcher::new(storage.clone(), config.max_source_bytes)?;

        let backends = Backends {
            broker: Arc::new(broker),
            cache: Arc::new(cache),
            storage,
            fetcher: Arc::new(fetcher),
            transformer: Arc::new(TransformationPipeline::new()),
        };
        Ok(Self::new(backends, Limits::from_config(config)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),

    #[error("Queue initialization failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Cache initialization failed: {0}")]
    Cache(#[from] CacheError),

    #[error("Storage initialization failed: {0}")]
    Storage(#[from] StorageError),

    #[error("HTTP client initialization failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Metrics recorder installation failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}
