//! Driftbot entry point: load config, open the store, start the ingest
//! endpoint and the retention loop, then run the event pipeline.

use anyhow::Context as _;
use clap::Parser;
use driftbot::cache::StateCache;
use driftbot::config::Config;
use driftbot::orchestrator::{EventRouter, Orchestrator};
use driftbot::store::Store;
use driftbot::transport::{RelayTransport, serve_ingest};
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "driftbot", about = "chat auto-reply agent")]
struct Cli {
    /// Path to the config file (defaults to the platform data directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "driftbot=debug" } else { "driftbot=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let store = Store::connect(&config.sqlite_path())
        .await
        .context("failed to open the database")?;
    let cache = Arc::new(StateCache::new());
    cache.warm(&store).await?;

    let transport = Arc::new(RelayTransport::new(&config.transport));
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        store.clone(),
        cache,
        transport,
        StdRng::from_os_rng(),
    ));
    let router = EventRouter::new(orchestrator);

    let (events_tx, mut events_rx) = mpsc::channel(256);
    let bind_addr = config.transport.bind_addr.clone();
    tokio::spawn(async move {
        if let Err(error) = serve_ingest(&bind_addr, events_tx).await {
            tracing::error!(%error, "ingest endpoint stopped");
        }
    });

    if config.bot.retention_days > 0 {
        let store = store.clone();
        let retention_days = config.bot.retention_days;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
                match store.delete_older_than(cutoff).await {
                    Ok((turns, errors)) => {
                        tracing::info!(turns, errors, "retention cleanup done");
                    }
                    Err(error) => {
                        tracing::warn!(%error, "retention cleanup failed");
                    }
                }
            }
        });
    }

    tracing::info!("driftbot running");
    // Single dispatch point: arrival order here is the order each
    // channel's worker sees.
    while let Some(event) = events_rx.recv().await {
        router.dispatch(event).await;
    }

    Ok(())
}
