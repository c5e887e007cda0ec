//! Metrics and observability utilities
//!
//! Prometheus-style metrics for the retrieval pipeline with
//! standardized naming conventions.

use crate::errors::{AppError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// Metrics prefix for all RagForge metrics
pub const METRICS_PREFIX: &str = "ragforge";

/// Buckets for embedding and generation latency (in seconds)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Ingestion metrics
    describe_counter!(
        format!("{}_ingestions_total", METRICS_PREFIX),
        Unit::Count,
        "Total ingestion runs by terminal status"
    );

    describe_counter!(
        format!("{}_chunks_written_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunk vectors written to the index"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Document ingestion latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total queries by outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    describe_histogram!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of chunks returned from search"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Answer generation latency in seconds"
    );

    // Resilience
    describe_counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Retried external calls by operation"
    );

    tracing::info!("Metrics registered");
}

/// Serve Prometheus metrics on `port`
///
/// Must be called from within a tokio runtime.
pub fn install_exporter(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            UPSTREAM_BUCKETS,
        )
        .and_then(|builder| builder.install())
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to install metrics exporter: {}", e),
        })?;

    register_metrics();
    tracing::info!(port, "Metrics exporter listening");
    Ok(())
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string(),
            "batch" => batch_bucket(batch_size)
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a finished ingestion
pub fn record_ingestion(duration_secs: f64, chunks_written: usize, status: &str) {
    counter!(
        format!("{}_ingestions_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    counter!(format!("{}_chunks_written_total", METRICS_PREFIX))
        .increment(chunks_written as u64);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX))
        .record(duration_secs);
}

/// Helper to record a finished query
pub fn record_query(duration_secs: f64, result_count: usize, outcome: &str) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX))
        .record(duration_secs);

    histogram!(format!("{}_search_results_count", METRICS_PREFIX))
        .record(result_count as f64);
}

/// Helper to record answer generation latency
pub fn record_generation(duration_secs: f64, model: &str) {
    histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Helper to count a retried call
pub fn record_retry(operation: &str) {
    counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(1);
}

fn batch_bucket(batch_size: usize) -> &'static str {
    match batch_size {
        0..=1 => "1",
        2..=16 => "2-16",
        17..=64 => "17-64",
        _ => "65+",
    }
}
