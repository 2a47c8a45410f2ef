//! Job queue over a message broker.
//!
//! Delivery is at-least-once. A consumer owns a delivery from `receive` until
//! it calls `ack` or `reject`; if it dies first, the delivery stays parked
//! under its consumer name. Live consumers keep a lease renewed through
//! `heartbeat`. Any pool returns the deliveries of consumers whose lease has
//! lapsed to the queue with `recover_orphaned`, whatever their names were.

pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::models::job::ProcessingJob;
use crate::models::request::AdvancedProcessingRequest;

pub use self::redis::RedisBroker;

/// Queue that image jobs are published to.
pub const DEFAULT_QUEUE_NAME: &str = "image_processing";

/// One message handed to one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub consumer: String,
    pub payload: String,
    /// Set when the message was returned to the queue by crash recovery.
    pub redelivered: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub dead_letters: u64,
}

/// Broker operations the queue needs. Implementations are shared by every
/// consumer task and must tolerate concurrent calls.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a message durably.
    async fn publish(&self, payload: String) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next message and park it under `consumer`.
    async fn receive(&self, consumer: &str, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Drop a parked message after processing.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Move a parked message to the dead-letter list. It is never redelivered.
    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return every message parked under `consumer` to the queue. Returns the
    /// number of messages moved.
    async fn recover(&self, consumer: &str) -> Result<u64, QueueError>;

    /// Mark `consumers` alive for `lease`.
    async fn heartbeat(&self, consumers: &[String], lease: Duration) -> Result<(), QueueError>;

    /// Consumers that have parked messages but no live lease.
    async fn orphaned(&self) -> Result<Vec<String>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Submission side of the queue, as seen by request handlers.
#[async_trait]
pub trait Enqueuer: Send + Sync {
    async fn submit_job(&self, job: &ProcessingJob) -> Result<(), QueueError>;
}

/// Typed job queue on top of a [`Broker`].
#[derive(Clone)]
pub struct JobQueue {
    broker: Arc<dyn Broker>,
}

impl JobQueue {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Serialize and publish a job.
    pub async fn publish(&self, job: &ProcessingJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        self.broker.publish(payload).await?;
        metrics::counter!("image_jobs_published_total").increment(1);
        Ok(())
    }

    /// Validate, create and publish a pending job for `image_url`.
    pub async fn submit(
        &self,
        image_url: &str,
        request: AdvancedProcessingRequest,
    ) -> Result<ProcessingJob, SubmitError> {
        if image_url.trim().is_empty() {
            return Err(SubmitError::Invalid("image_url is required".to_string()));
        }
        request.check().map_err(SubmitError::Invalid)?;

        let job = ProcessingJob::new(image_url.trim(), request);
        self.publish(&job).await?;
        tracing::info!(job_id = %job.id, image_url = %job.image_url, "Job submitted");
        Ok(job)
    }

    /// Endless stream of deliveries for `consumer`. Empty polls are absorbed;
    /// broker errors are yielded and the stream keeps going.
    pub fn consume(
        &self,
        consumer: impl Into<String>,
        poll_timeout: Duration,
    ) -> impl Stream<Item = Result<Delivery, QueueError>> + Send + 'static {
        let broker = self.broker.clone();
        let consumer = consumer.into();
        futures::stream::unfold((broker, consumer), move |(broker, consumer)| async move {
            loop {
                match broker.receive(&consumer, poll_timeout).await {
                    Ok(Some(delivery)) => return Some((Ok(delivery), (broker, consumer))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), (broker, consumer))),
                }
            }
        })
    }

    pub async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.broker.ack(delivery).await
    }

    pub async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.broker.reject(delivery).await
    }

    pub async fn heartbeat(&self, consumers: &[String], lease: Duration) -> Result<(), QueueError> {
        self.broker.heartbeat(consumers, lease).await
    }

    /// Requeue everything parked under consumers whose lease has lapsed.
    /// Returns the number of messages moved.
    pub async fn recover_orphaned(&self) -> Result<u64, QueueError> {
        let mut moved = 0;
        for consumer in self.broker.orphaned().await? {
            let count = self.broker.recover(&consumer).await?;
            if count > 0 {
                tracing::info!(consumer = %consumer, moved = count, "Requeued deliveries of a dead consumer");
            }
            moved += count;
        }
        Ok(moved)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.broker.stats().await
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.broker.health_check().await
    }
}

#[async_trait]
impl Enqueuer for JobQueue {
    async fn submit_job(&self, job: &ProcessingJob) -> Result<(), QueueError> {
        self.publish(job).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("validation error: {0}")]
    Invalid(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
