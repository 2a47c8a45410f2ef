use std::sync::Arc;

use image_jobs::app_state::{AppState, StartupError};
use image_jobs::config::AppConfig;
use image_jobs::{routes, shutdown, telemetry};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    telemetry::init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!("Initializing image-jobs server");

    let prometheus = Arc::new(telemetry::install_metrics()?);
    let state = AppState::connect(&config)?;
    let app = routes::router(state, Some(prometheus));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
