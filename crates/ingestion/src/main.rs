//! RagForge Ingestion CLI
//!
//! Ingests one PDF and prints the JSON result:
//!
//! ```text
//! ingestion <pdf_path> [source_id]
//! ```
//!
//! Exits with status 1 when the ingestion ends in FAILED.

use anyhow::Context;
use ragforge_common::{
    cancel::CancellationToken,
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedder,
    index::create_index,
    metrics,
    retry::RetryPolicy,
    VERSION,
};
use ragforge_ingestion::{IngestOrchestrator, IngestRequest, IngestState};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let path = args.next().context("usage: ingestion <pdf_path> [source_id]")?;
    let source_id = args.next();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting RagForge Ingestion v{}",
        VERSION
    );

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    if config.observability.metrics_port != 0 {
        metrics::install_exporter(config.observability.metrics_port)?;
    } else {
        metrics::register_metrics();
    }

    // Clients are built once and shared by the orchestrator
    let retry = RetryPolicy::from_config(&config.retry);
    let embedder = create_embedder(&config.embedding, retry)?;
    let index = create_index(&config.index).await?;
    info!(backend = index.backend(), collection = %config.index.collection, "Vector index ready");

    let orchestrator = IngestOrchestrator::from_config(&config, embedder, index)?;

    let mut request = IngestRequest::from_path(path);
    if let Some(source_id) = source_id {
        request = request.with_source_id(source_id);
    }

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, stopping before the next external call");
            watcher.cancel();
        }
    });

    let response = orchestrator.run_ingest_with_cancel(request, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    // A skipped document is not an error
    if response.status == IngestState::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // stdout carries the JSON result
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}
