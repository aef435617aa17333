//! Sentra threat-feed updater daemon.
//!
//! Runs the ingestion loop against the shared threat table: a full feed
//! pass at startup and every five minutes, plus an hourly cleanup of rows
//! older than thirty days. Deployed alongside the resolver daemon,
//! pointed at the same `DATABASE_URL`.

use anyhow::{Context, Result};
use clap::Parser;
use sentra_config::Config;
use sentra_feeds::{run_update_loop, FeedManager};
use sentra_metrics::tracing_setup::{init_tracing, parse_level, LogConfig, LogFormat};
use sentra_store::{MemoryStore, SqliteStore, ThreatStore};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Sentra threat-feed updater.
#[derive(Parser, Debug)]
#[command(name = "sentra-feedd", version, about, long_about = None)]
struct Cli {
    /// Override the configured log level.
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Minimal output (errors only).
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("loading configuration")?;

    let level = if cli.quiet {
        tracing::Level::ERROR
    } else {
        parse_level(cli.log_level.as_deref().unwrap_or(&config.log_level))
    };
    let format = if config.is_production() {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(&LogConfig { level, format });

    info!(version = env!("CARGO_PKG_VERSION"), "starting sentra feed updater");

    let store: Arc<dyn ThreatStore> = match config.database_path() {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .with_context(|| format!("opening threat database at {path}"))?,
        ),
        None => {
            warn!("using in-memory threat store; ingested data will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    let manager = FeedManager::with_default_feeds();
    for feed in manager.feeds() {
        info!(
            feed = feed.name,
            enabled = feed.enabled,
            interval_secs = feed.update_interval.as_secs(),
            "configured feed"
        );
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_task = tokio::spawn(run_update_loop(manager, store, shutdown_rx));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    let _ = loop_task.await;

    info!("sentra feed updater stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = signal::ctrl_c() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
