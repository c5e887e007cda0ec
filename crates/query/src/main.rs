//! RagForge Query CLI
//!
//! Answers one question and prints the JSON response:
//!
//! ```text
//! query <question> [top_k]
//! ```

use anyhow::Context;
use ragforge_common::{
    cancel::CancellationToken,
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedder,
    generation::create_generator,
    index::create_index,
    metrics,
    retry::RetryPolicy,
    VERSION,
};
use ragforge_query::{QueryOrchestrator, QueryRequest};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let question = args.next().context("usage: query <question> [top_k]")?;
    let top_k = args
        .next()
        .map(|raw| raw.parse::<usize>())
        .transpose()
        .context("top_k must be a non-negative integer")?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting RagForge Query v{}",
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

    let retry = RetryPolicy::from_config(&config.retry);
    let embedder = create_embedder(&config.embedding, retry.clone())?;
    let generator = create_generator(&config.generation, retry)?;
    let index = create_index(&config.index).await?;

    let orchestrator = QueryOrchestrator::from_config(&config, embedder, index, generator)?;
    orchestrator.ensure_collection().await?;
    info!(collection = %orchestrator.collection().name, "Vector index ready");

    let mut request = QueryRequest::new(question);
    request.top_k = top_k;

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, stopping before the next external call");
            watcher.cancel();
        }
    });

    match orchestrator.run_query_with_cancel(request, &cancel).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.report())?);
            std::process::exit(1);
        }
    }
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
