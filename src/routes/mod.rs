pub mod error;
pub mod health;
pub mod images;
pub mod jobs;
pub mod metrics;
pub mod stats;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// The full HTTP surface. `/metrics` is mounted only when a recorder handle is
/// given.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let body_limit = state.limits.body_limit();

    let mut app = Router::new()
        .route("/", get(|| async { Html(include_str!("../../static/index.html")) }))
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .route("/api/v1/health/{service}", get(health::service_health))
        .route("/api/v1/stats", get(stats::queue_stats))
        .route("/api/v1/jobs", post(jobs::submit_job))
        .route("/api/v1/images/process", post(images::process_image))
        .route("/api/v1/images/resize", post(images::resize_image))
        .route("/api/v1/images/batch", post(images::batch_images))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route("/metrics", get(metrics::prometheus_metrics).with_state(handle));
    }

    app.layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
