use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::{AdvancedProcessingRequest, OutputFormat};

/// Status of an image processing job in the async queue.
///
/// Transitions only move forward: pending → processing → completed | failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// An image processing job. This is also the broker message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub image_url: String,
    pub request: AdvancedProcessingRequest,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingJob {
    pub fn new(image_url: impl Into<String>, request: AdvancedProcessingRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            image_url: image_url.into(),
            request,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Processing)
    }

    pub fn complete(&mut self, result: ProcessedResult) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(message.into());
        Ok(())
    }
}

/// Dimensions and encoding actually produced for a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSize {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    pub format: OutputFormat,
}

/// Outcome of a successful transformation.
///
/// `url` is empty when the transform succeeded but the upload did not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResult {
    pub id: String,
    pub original_url: String,
    pub url: String,
    pub file_size: u64,
    pub processed_at: DateTime<Utc>,
    pub size: ResolvedSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> ProcessedResult {
        ProcessedResult {
            id: "job".into(),
            original_url: "https://example.com/a.png".into(),
            url: String::new(),
            file_size: 10,
            processed_at: Utc::now(),
            size: ResolvedSize {
                width: 1,
                height: 1,
                quality: None,
                format: OutputFormat::Png,
            },
        }
    }

    #[test]
    fn status_moves_forward_only() {
        let mut job = ProcessingJob::new("https://example.com/a.png", Default::default());
        assert!(job.complete(sample_result()).is_err());
        job.start().unwrap();
        assert!(job.start().is_err());
        job.fail("decode error: bad header").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.status.is_terminal());
        assert!(job.complete(sample_result()).is_err());
        assert_eq!(job.error.as_deref(), Some("decode error: bad header"));
    }

    #[test]
    fn message_schema_uses_wire_field_names() {
        let job = ProcessingJob::new(
            "https://example.com/a.png",
            AdvancedProcessingRequest::resize(100, 50, Some(80), Some("jpeg".into())),
        );
        let value = serde_json::to_value(&job).unwrap();
        for field in ["id", "image_url", "request", "status", "created_at"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert!(value.get("result").is_none());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["request"]["resize"]["width"], 100);

        let back: ProcessingJob = serde_json::from_value(value).unwrap();
        assert_eq!(back.request, job.request);
    }
}
