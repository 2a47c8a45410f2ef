use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// JSON logs filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn install_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "image_jobs_total",
        "Jobs that left the worker pool, by outcome (completed, failed, rejected)"
    );
    metrics::describe_counter!("image_jobs_published_total", "Jobs published to the queue");
    metrics::describe_histogram!(
        "image_job_processing_seconds",
        "Time from job start to terminal state"
    );
    metrics::describe_counter!(
        "image_cache_lookups_total",
        "Result cache lookups, by result (hit, miss, error)"
    );
    metrics::describe_counter!(
        "image_cache_writes_failed_total",
        "Result cache writes that failed and were skipped"
    );
    metrics::describe_counter!(
        "image_uploads_failed_total",
        "Processed outputs that could not be uploaded"
    );
    metrics::describe_counter!(
        "image_batch_slots_total",
        "Batch slots processed, by outcome"
    );
    metrics::describe_gauge!("image_queue_depth", "Pending jobs in the queue at last stats call");
}
