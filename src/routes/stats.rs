use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{ApiResponse, StatsResponse};
use crate::routes::error::ApiError;

/// GET /api/v1/stats: pending and dead-lettered job counts plus cached results.
pub async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StatsResponse>>, ApiError> {
    let queue = state.queue.stats().await?;
    metrics::gauge!("image_queue_depth").set(queue.pending as f64);

    let cache_entries = match state.executor.keyring().entries().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "Cache key count unavailable");
            None
        }
    };

    Ok(Json(ApiResponse::ok(StatsResponse { queue, cache_entries })))
}
