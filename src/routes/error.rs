use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::api::ApiResponse;
use crate::services::batch::BatchError;
use crate::services::executor::JobError;
use crate::services::fetch::FetchError;
use crate::services::pipeline::TransformError;
use crate::services::queue::{QueueError, SubmitError};

/// Error response in the standard envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.message))).into_response()
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        tracing::error!(error = %e, "Queue unavailable");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "job queue unavailable")
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Invalid(message) => Self::bad_request(message),
            SubmitError::Queue(e) => e.into(),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        let status = match &e {
            JobError::Transform(TransformError::Validation(_)) => StatusCode::BAD_REQUEST,
            JobError::Transform(TransformError::Decode(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            JobError::Transform(TransformError::Encode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            JobError::Fetch(FetchError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            JobError::Fetch(_) => StatusCode::BAD_GATEWAY,
            JobError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        Self::bad_request(e.to_string())
    }
}
