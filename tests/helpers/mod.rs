//! In-memory harness shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image_jobs::app_state::{AppState, Backends, Limits};
use image_jobs::models::job::ProcessingJob;
use image_jobs::models::request::AdvancedProcessingRequest;
use image_jobs::services::memory::{MemoryBroker, MemoryCache, MemorySources, MemoryStorage};
use image_jobs::services::pipeline::{TransformError, TransformOutput, TransformationPipeline, Transformer};
use image_jobs::services::worker::{WorkerPool, WorkerPoolConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The real pipeline, instrumented with call counting, peak concurrency
/// tracking and an optional artificial delay.
#[derive(Default)]
pub struct CountingTransformer {
    inner: TransformationPipeline,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay_ms: AtomicUsize,
}

impl CountingTransformer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

impl Transformer for CountingTransformer {
    fn process(
        &self,
        source: &[u8],
        request: &AdvancedProcessingRequest,
    ) -> Result<TransformOutput, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }
        let result = self.inner.process(source, request);

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct Harness {
    pub broker: Arc<MemoryBroker>,
    pub cache: Arc<MemoryCache>,
    pub storage: Arc<MemoryStorage>,
    pub sources: Arc<MemorySources>,
    pub transformer: Arc<CountingTransformer>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        let broker = Arc::new(MemoryBroker::new());
        let cache = Arc::new(MemoryCache::new());
        let storage = Arc::new(MemoryStorage::new());
        let sources = Arc::new(MemorySources::new());
        let transformer = Arc::new(CountingTransformer::default());

        let state = AppState::new(
            Backends {
                broker: broker.clone(),
                cache: cache.clone(),
                storage: storage.clone(),
                fetcher: sources.clone(),
                transformer: transformer.clone(),
            },
            Limits::default(),
        );

        Self {
            broker,
            cache,
            storage,
            sources,
            transformer,
            state,
        }
    }

    pub fn pool_config(concurrency: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency,
            poll_timeout: Duration::from_millis(50),
            error_delay: Duration::from_millis(10),
            consumer_prefix: "worker".to_string(),
            lease: Duration::from_millis(300),
        }
    }

    /// Start a worker pool; terminal jobs arrive on the returned receiver.
    pub fn spawn_pool(&self, concurrency: usize) -> RunningPool {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(
            self.state.queue.clone(),
            self.state.executor.clone(),
            Self::pool_config(concurrency),
        )
        .with_reporter(tx);
        let handle = tokio::spawn(pool.run(cancel.clone()));
        RunningPool { cancel, handle, rx }
    }

    pub async fn submit(&self, image_url: &str, request: AdvancedProcessingRequest) -> ProcessingJob {
        self.state
            .queue
            .submit(image_url, request)
            .await
            .expect("submit job")
    }
}

pub struct RunningPool {
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
    pub rx: mpsc::UnboundedReceiver<ProcessingJob>,
}

impl RunningPool {
    pub async fn next_job(&mut self) -> ProcessingJob {
        tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
            .await
            .expect("timed out waiting for a terminal job")
            .expect("worker pool stopped reporting")
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("pool did not drain")
            .expect("pool task panicked");
    }
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
