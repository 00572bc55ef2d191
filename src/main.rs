//! Application entrypoint and state wiring.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use evidence_ledger::config::Config;
use evidence_ledger::routes;
use evidence_ledger::service::EvidenceService;
use evidence_ledger::storage::FileStore;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = Config::parse();

    // 1) durable store; the chain is rebuilt from it
    let store = FileStore::open(&config.data_dir)
        .with_context(|| format!("open block store at {}", config.data_dir.display()))?;
    let service = EvidenceService::open(store, config.ledger()).context("load evidence ledger")?;

    // 2) router
    let app = routes::router(Arc::new(service), config.max_upload_bytes);

    // 3) serve
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(addr = %config.bind, "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
