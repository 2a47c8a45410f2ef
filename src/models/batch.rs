use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{ProcessedResult, ResolvedSize};

/// Aggregate outcome of a batch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    Partial,
    Failed,
}

/// One input slot of a batch. Exactly one of `url` or `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSlot {
    pub index: usize,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ResolvedSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchSlot {
    pub fn succeeded(index: usize, filename: String, result: ProcessedResult) -> Self {
        Self {
            index,
            filename,
            url: Some(result.url),
            file_size: Some(result.file_size),
            size: Some(result.size),
            error: None,
        }
    }

    pub fn failed(index: usize, filename: String, error: String) -> Self {
        Self {
            index,
            filename,
            url: None,
            file_size: None,
            size: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub slots: Vec<BatchSlot>,
    pub processed_at: DateTime<Utc>,
}

impl BatchResponse {
    /// Build the response from slots already sorted by input index.
    pub fn from_slots(batch_id: String, slots: Vec<BatchSlot>) -> Self {
        let succeeded = slots.iter().filter(|slot| slot.is_success()).count();
        let failed = slots.len() - succeeded;
        let status = match (succeeded, failed) {
            (_, 0) => BatchStatus::Completed,
            (0, _) => BatchStatus::Failed,
            _ => BatchStatus::Partial,
        };
        Self {
            batch_id,
            status,
            succeeded,
            failed,
            slots,
            processed_at: Utc::now(),
        }
    }
}
