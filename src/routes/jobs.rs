use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{ApiResponse, SubmitJobRequest, SubmitJobResponse};
use crate::routes::error::ApiError;

/// POST /api/v1/jobs: queue a job for a remote or stored image.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubmitJobResponse>>), ApiError> {
    body.validate()
        .map_err(|report| ApiError::bad_request(report.to_string()))?;

    let job = state.queue.submit(&body.image_url, body.request).await?;

    let response = SubmitJobResponse {
        job_id: job.id,
        status: job.status.to_string(),
        message: "Job queued for processing".to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(response))))
}
