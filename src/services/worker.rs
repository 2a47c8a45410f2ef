use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::{JobStatus, ProcessingJob};
use crate::services::executor::JobExecutor;
use crate::services::queue::{Delivery, JobQueue};

/// Default number of consumer loops.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default liveness lease for consumers.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of consumer loops. Zero is treated as one.
    pub concurrency: usize,
    /// How long one broker receive may block before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// Pause after a broker error before receiving again.
    pub error_delay: Duration,
    /// Consumer names are `{prefix}-{run}-{index}`, where `run` is fresh for
    /// every call to [`WorkerPool::run`].
    pub consumer_prefix: String,
    /// How long a consumer stays alive without a renewal. Deliveries parked
    /// under a consumer whose lease lapsed are requeued by any running pool.
    pub lease: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_timeout: Duration::from_secs(1),
            error_delay: Duration::from_secs(1),
            consumer_prefix: "worker".to_string(),
            lease: DEFAULT_LEASE,
        }
    }
}

/// Fixed-size set of queue consumers feeding the job executor.
pub struct WorkerPool {
    queue: JobQueue,
    executor: Arc<JobExecutor>,
    config: WorkerPoolConfig,
    reporter: Option<mpsc::UnboundedSender<ProcessingJob>>,
}

struct Consumer {
    name: String,
    queue: JobQueue,
    executor: Arc<JobExecutor>,
    config: WorkerPoolConfig,
    reporter: Option<mpsc::UnboundedSender<ProcessingJob>>,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, executor: Arc<JobExecutor>, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            executor,
            config,
            reporter: None,
        }
    }

    /// Send every job that reaches a terminal state to `reporter`.
    pub fn with_reporter(mut self, reporter: mpsc::UnboundedSender<ProcessingJob>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Run until `cancel` fires, then stop taking deliveries and wait for the
    /// in-flight ones to finish.
    pub async fn run(self, cancel: CancellationToken) {
        let concurrency = self.config.concurrency.max(1);
        let run_id = Uuid::new_v4().simple().to_string();
        let names: Vec<String> = (0..concurrency)
            .map(|index| format!("{}-{}-{index}", self.config.consumer_prefix, &run_id[..8]))
            .collect();

        // Leased before sweeping so no other pool treats these as orphans.
        self.renew(&names).await;
        self.sweep().await;

        let drained = CancellationToken::new();
        let keeper = tokio::spawn(keep_alive(
            self.queue.clone(),
            names.clone(),
            self.config.lease,
            drained.clone(),
        ));

        let mut consumers = JoinSet::new();
        for name in names {
            let consumer = Consumer {
                name,
                queue: self.queue.clone(),
                executor: self.executor.clone(),
                config: self.config.clone(),
                reporter: self.reporter.clone(),
            };
            consumers.spawn(consumer.run(cancel.clone()));
        }

        tracing::info!(concurrency, run_id = %run_id, "Worker pool started");

        while let Some(joined) = consumers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Consumer task ended abnormally");
            }
        }

        drained.cancel();
        if let Err(e) = keeper.await {
            tracing::error!(error = %e, "Lease keeper ended abnormally");
        }

        tracing::info!("Worker pool drained");
    }

    async fn renew(&self, names: &[String]) {
        if let Err(e) = self.queue.heartbeat(names, self.config.lease).await {
            tracing::warn!(error = %e, "Lease renewal failed");
        }
    }

    async fn sweep(&self) {
        match self.queue.recover_orphaned().await {
            Ok(0) => {}
            Ok(moved) => tracing::info!(moved, "Requeued unacknowledged deliveries"),
            Err(e) => tracing::warn!(error = %e, "Delivery recovery failed"),
        }
    }
}

/// Renew the pool's leases and requeue orphaned deliveries until `drained`
/// fires. Runs past shutdown so in-flight jobs keep their consumers alive.
async fn keep_alive(queue: JobQueue, names: Vec<String>, lease: Duration, drained: CancellationToken) {
    let period = (lease / 3).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = drained.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = queue.heartbeat(&names, lease).await {
            tracing::warn!(error = %e, "Lease renewal failed");
        }
        match queue.recover_orphaned().await {
            Ok(0) => {}
            Ok(moved) => tracing::info!(moved, "Requeued deliveries of dead consumers"),
            Err(e) => tracing::warn!(error = %e, "Delivery recovery failed"),
        }
    }
}

impl Consumer {
    async fn run(self, cancel: CancellationToken) {
        let deliveries = self.queue.consume(self.name.clone(), self.config.poll_timeout);
        futures::pin_mut!(deliveries);

        loop {
            // Cancellation is only observed between deliveries.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.handle(delivery).await,
                Some(Err(e)) => {
                    tracing::error!(worker_id = %self.name, error = %e, "Failed to receive delivery");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_delay) => {}
                    }
                }
                None => break,
            }
        }

        tracing::debug!(worker_id = %self.name, "Consumer stopped");
    }

    async fn handle(&self, delivery: Delivery) {
        let mut job: ProcessingJob = match serde_json::from_str(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(worker_id = %self.name, error = %e, "Rejecting undecodable delivery");
                self.reject(&delivery).await;
                return;
            }
        };

        if let Err(e) = job.start() {
            tracing::warn!(worker_id = %self.name, job_id = %job.id, error = %e, "Rejecting job that is not pending");
            self.reject(&delivery).await;
            return;
        }

        tracing::info!(
            worker_id = %self.name,
            job_id = %job.id,
            image_url = %job.image_url,
            redelivered = delivery.redelivered,
            "Processing job"
        );

        let started = Instant::now();
        let outcome = match self.executor.execute_job(&job).await {
            Ok(result) => job.complete(result),
            Err(e) => job.fail(e.to_string()),
        };
        if let Err(e) = outcome {
            tracing::error!(job_id = %job.id, error = %e, "Job state machine violated");
        }
        metrics::histogram!("image_job_processing_seconds").record(started.elapsed().as_secs_f64());

        // Acknowledged whatever the outcome; failures are recorded on the job.
        if let Err(e) = self.queue.ack(&delivery).await {
            tracing::error!(worker_id = %self.name, job_id = %job.id, error = %e, "Failed to ack delivery");
        }

        match job.status {
            JobStatus::Completed => {
                metrics::counter!("image_jobs_total", "outcome" => "completed").increment(1);
                tracing::info!(
                    worker_id = %self.name,
                    job_id = %job.id,
                    url = job.result.as_ref().map(|r| r.url.as_str()).unwrap_or_default(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            _ => {
                metrics::counter!("image_jobs_total", "outcome" => "failed").increment(1);
                tracing::warn!(
                    worker_id = %self.name,
                    job_id = %job.id,
                    error = job.error.as_deref().unwrap_or_default(),
                    "Job failed"
                );
            }
        }

        if let Some(reporter) = &self.reporter {
            let _ = reporter.send(job);
        }
    }

    async fn reject(&self, delivery: &Delivery) {
        metrics::counter!("image_jobs_total", "outcome" => "rejected").increment(1);
        if let Err(e) = self.queue.reject(delivery).await {
            tracing::error!(worker_id = %self.name, error = %e, "Failed to reject delivery");
        }
    }
}
