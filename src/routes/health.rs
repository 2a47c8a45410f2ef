use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::routes::error::ApiError;
use crate::services::health::{ComponentHealth, HealthReport, Service};

fn status_code(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /api/v1/health: status of every backing service.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.probe_all().await;
    (status_code(report.is_healthy()), Json(report))
}

/// GET /api/v1/health/{service}: status of one backing service.
pub async fn service_health(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<(StatusCode, Json<ComponentHealth>), ApiError> {
    let service: Service = service
        .parse()
        .map_err(|_| ApiError::not_found(format!("unknown service: {service}")))?;
    let health = state.health.probe(service).await;
    Ok((status_code(health.is_healthy()), Json(health)))
}
