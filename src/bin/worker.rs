use image_jobs::app_state::{AppState, StartupError};
use image_jobs::config::AppConfig;
use image_jobs::services::worker::{WorkerPool, WorkerPoolConfig};
use image_jobs::{shutdown, telemetry};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    telemetry::init_tracing();
    tracing::info!("Starting image processing worker");

    let config = AppConfig::from_env()?;
    let state = AppState::connect(&config)?;

    let pool = WorkerPool::new(
        state.queue.clone(),
        state.executor.clone(),
        WorkerPoolConfig {
            concurrency: config.worker_concurrency,
            poll_timeout: config.poll_timeout(),
            consumer_prefix: config.worker_name.clone(),
            lease: config.worker_lease(),
            ..WorkerPoolConfig::default()
        },
    );

    // SIGINT/SIGTERM stops intake; run() returns once in-flight jobs finish.
    pool.run(shutdown::cancel_on_signal()).await;

    tracing::info!("Worker stopped");
    Ok(())
}
