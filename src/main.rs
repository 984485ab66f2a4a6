use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use docflow::config::WorkerConfig;
use docflow::queue;
use docflow::repository::SqliteDocumentRepository;
use docflow::services::bus::MessageBus;
use docflow::services::category::KeywordCategorizer;
use docflow::services::extract::LocalTextExtractor;
use docflow::services::pipeline::DocumentPipeline;
use docflow::services::search::SqliteSearchIndex;
use docflow::services::storage::FsBlobStorage;
use docflow::worker::DocumentWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::parse();

    let default_filter = if config.verbose {
        "docflow=debug,info"
    } else {
        "docflow=info,warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("invalid configuration")?;

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;

    let transport = queue::connect(&config.queue_url, config.queue_settings())
        .await
        .context("failed to connect to queue transport")?;
    let bus = Arc::new(MessageBus::new(Arc::clone(&transport), config.queue_names()));

    let repository = Arc::new(
        SqliteDocumentRepository::new(&config.data_dir.join("documents.db"))
            .context("failed to open document store")?,
    );
    let search = Arc::new(
        SqliteSearchIndex::new(&config.data_dir.join("search.db"))
            .context("failed to open search index")?,
    );
    let storage = Arc::new(FsBlobStorage::new(config.data_dir.join("blobs")));

    let pipeline = Arc::new(DocumentPipeline::new(
        repository,
        storage,
        Arc::new(LocalTextExtractor::new()),
        Arc::new(KeywordCategorizer::new()),
        search,
        Arc::clone(&bus),
        config.max_retries,
    ));

    let worker = DocumentWorker::new(transport, pipeline, bus, config.worker_options());
    worker.initialize().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        if shutdown_tx.send(true).is_err() {
            error!("worker already stopped");
        }
    });

    info!(queue_url = %config.queue_url, "starting document worker");
    worker.run(shutdown_rx).await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
