use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::models::batch::{BatchResponse, BatchSlot};
use crate::models::request::AdvancedProcessingRequest;
use crate::services::executor::JobExecutor;

/// Upper bound on concurrent slots within one batch.
pub const MAX_BATCH_WORKERS: usize = 5;

/// Default upper bound on inputs per batch.
pub const DEFAULT_MAX_INPUTS: usize = 20;

/// One input of a batch.
#[derive(Debug, Clone)]
pub struct BatchSource {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Runs one request over several in-hand images without the broker.
///
/// Slots are independent: a failed slot carries its error and never affects
/// its siblings, and the batch as a whole succeeds even if every slot fails.
pub struct BatchCoordinator {
    executor: Arc<JobExecutor>,
    max_inputs: usize,
}

impl BatchCoordinator {
    pub fn new(executor: Arc<JobExecutor>, max_inputs: usize) -> Self {
        Self {
            executor,
            max_inputs: max_inputs.max(1),
        }
    }

    pub async fn run(
        &self,
        sources: Vec<BatchSource>,
        request: AdvancedProcessingRequest,
    ) -> Result<BatchResponse, BatchError> {
        if sources.is_empty() {
            return Err(BatchError::Empty);
        }
        if sources.len() > self.max_inputs {
            return Err(BatchError::TooMany {
                count: sources.len(),
                limit: self.max_inputs,
            });
        }
        request.check().map_err(BatchError::Invalid)?;

        let batch_id = Uuid::new_v4().to_string();
        let workers = MAX_BATCH_WORKERS.min(sources.len());
        tracing::info!(batch_id = %batch_id, inputs = sources.len(), workers, "Starting batch");

        let semaphore = Arc::new(Semaphore::new(workers));
        let request = Arc::new(request);
        let mut handles = Vec::with_capacity(sources.len());
        let mut filenames = Vec::with_capacity(sources.len());

        for (index, source) in sources.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tracing::warn!(batch_id = %batch_id, "Batch semaphore closed, stopping fan-out");
                break;
            };

            filenames.push(source.filename.clone());
            let executor = self.executor.clone();
            let request = request.clone();
            let slot_id = format!("{batch_id}-{index}");

            handles.push(tokio::spawn(async move {
                let result = executor
                    .execute_upload(&slot_id, &source.filename, Arc::new(source.data), &request)
                    .await;
                drop(permit);
                result
            }));
        }

        let mut slots = Vec::with_capacity(handles.len());
        for (index, (handle, filename)) in handles.into_iter().zip(filenames).enumerate() {
            let slot = match handle.await {
                Ok(Ok(result)) => {
                    metrics::counter!("image_batch_slots_total", "outcome" => "completed").increment(1);
                    BatchSlot::succeeded(index, filename, result)
                }
                Ok(Err(e)) => {
                    metrics::counter!("image_batch_slots_total", "outcome" => "failed").increment(1);
                    tracing::warn!(batch_id = %batch_id, slot = index, error = %e, "Batch slot failed");
                    BatchSlot::failed(index, filename, e.to_string())
                }
                Err(e) => {
                    metrics::counter!("image_batch_slots_total", "outcome" => "failed").increment(1);
                    tracing::error!(batch_id = %batch_id, slot = index, error = %e, "Batch slot task panicked");
                    BatchSlot::failed(index, filename, format!("processing aborted: {e}"))
                }
            };
            slots.push(slot);
        }

        let response = BatchResponse::from_slots(batch_id, slots);
        tracing::info!(
            batch_id = %response.batch_id,
            succeeded = response.succeeded,
            failed = response.failed,
            "Batch finished"
        );
        Ok(response)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch has no inputs")]
    Empty,

    #[error("batch has {count} inputs, limit is {limit}")]
    TooMany { count: usize, limit: usize },

    #[error("validation error: {0}")]
    Invalid(String),
}
