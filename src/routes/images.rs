use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::ApiResponse;
use crate::models::batch::BatchResponse;
use crate::models::job::ProcessedResult;
use crate::models::request::AdvancedProcessingRequest;
use crate::routes::error::ApiError;
use crate::services::batch::BatchSource;
use crate::services::fetch::{check_image_bytes, FetchError};

/// An uploaded image part.
struct Upload {
    filename: String,
    data: Vec<u8>,
}

fn check_upload(upload: &Upload, max_bytes: usize) -> Result<(), ApiError> {
    if upload.data.len() > max_bytes {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("{} exceeds {max_bytes} bytes", upload.filename),
        ));
    }
    check_image_bytes(&upload.data).map_err(|e| match e {
        FetchError::NotAnImage => ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("{}: {e}", upload.filename),
        ),
        other => ApiError::bad_request(format!("{}: {other}", upload.filename)),
    })
}

fn parse_payload(text: &str) -> Result<AdvancedProcessingRequest, ApiError> {
    if text.trim().is_empty() {
        return Ok(AdvancedProcessingRequest::default());
    }
    serde_json::from_str(text).map_err(|e| ApiError::bad_request(format!("invalid payload: {e}")))
}

async fn read_upload(field: axum::extract::multipart::Field<'_>) -> Result<Upload, ApiError> {
    let filename = field.file_name().unwrap_or("image").to_string();
    let data = field.bytes().await?.to_vec();
    Ok(Upload { filename, data })
}

async fn process_upload(
    state: &AppState,
    upload: Upload,
    request: &AdvancedProcessingRequest,
) -> Result<ProcessedResult, ApiError> {
    check_upload(&upload, state.limits.max_source_bytes)?;
    let id = Uuid::new_v4().to_string();
    let result = state
        .executor
        .execute_upload(&id, &upload.filename, Arc::new(upload.data), request)
        .await?;
    Ok(result)
}

/// POST /api/v1/images/process: transform one uploaded image synchronously.
///
/// Multipart fields: `image` (file) and `payload` (JSON request, optional).
pub async fn process_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ProcessedResult>>, ApiError> {
    let mut upload = None;
    let mut request = AdvancedProcessingRequest::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => upload = Some(read_upload(field).await?),
            "payload" => request = parse_payload(&field.text().await?)?,
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("missing image field"))?;
    let result = process_upload(&state, upload, &request).await?;
    Ok(Json(ApiResponse::ok(result).with_message("Image processed")))
}

/// POST /api/v1/images/resize: resize one uploaded image.
///
/// Multipart fields: `image`, `width`, `height`, and optional `quality` and
/// `format`. A missing or unparsable quality uses the default.
pub async fn resize_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ProcessedResult>>, ApiError> {
    let mut upload = None;
    let (mut width, mut height) = (None, None);
    let (mut quality, mut format) = (None, None);

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => upload = Some(read_upload(field).await?),
            "width" => width = Some(parse_dimension("width", &field.text().await?)?),
            "height" => height = Some(parse_dimension("height", &field.text().await?)?),
            "quality" => quality = field.text().await?.trim().parse::<u8>().ok(),
            "format" => format = Some(field.text().await?.trim().to_string()).filter(|f| !f.is_empty()),
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("missing image field"))?;
    let width = width.ok_or_else(|| ApiError::bad_request("missing width field"))?;
    let height = height.ok_or_else(|| ApiError::bad_request("missing height field"))?;
    let quality = quality.filter(|q| (1..=100).contains(q));

    let request = AdvancedProcessingRequest::resize(width, height, quality, format);
    let result = process_upload(&state, upload, &request).await?;
    Ok(Json(ApiResponse::ok(result).with_message("Image resized")))
}

fn parse_dimension(name: &str, value: &str) -> Result<u32, ApiError> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ApiError::bad_request(format!("{name} must be a positive integer")))
}

/// POST /api/v1/images/batch: apply one request to several uploaded images.
///
/// Multipart fields: repeated `images` (files) and `payload` (JSON request).
/// Per-image failures are reported in their slot; the call itself succeeds.
pub async fn batch_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<BatchResponse>>, ApiError> {
    let mut uploads = Vec::new();
    let mut request = AdvancedProcessingRequest::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "images" | "images[]" => uploads.push(read_upload(field).await?),
            "payload" => request = parse_payload(&field.text().await?)?,
            _ => {}
        }
    }

    let max_bytes = state.limits.max_source_bytes;
    if let Some(oversized) = uploads.iter().find(|u| u.data.len() > max_bytes) {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("{} exceeds {max_bytes} bytes", oversized.filename),
        ));
    }

    // Undecodable images fail their own slot rather than the request.
    let sources = uploads
        .into_iter()
        .map(|u| BatchSource {
            filename: u.filename,
            data: u.data,
        })
        .collect();

    let response = state.batch.run(sources, request).await?;
    let message = format!("{} of {} images processed", response.succeeded, response.slots.len());
    Ok(Json(ApiResponse::ok(response).with_message(message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_the_default_request() {
        assert_eq!(parse_payload("  ").unwrap(), AdvancedProcessingRequest::default());
        assert!(parse_payload("{not json").is_err());
    }

    #[test]
    fn dimensions_must_be_positive_integers() {
        assert_eq!(parse_dimension("width", " 640 ").unwrap(), 640);
        assert!(parse_dimension("width", "0").is_err());
        assert!(parse_dimension("width", "-5").is_err());
        assert!(parse_dimension("width", "wide").is_err());
    }
}
