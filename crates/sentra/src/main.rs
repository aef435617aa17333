//! Sentra DNS filtering resolver daemon.
//!
//! Binds the UDP listener, wires the classifier between the decision
//! cache and the threat table, and forwards clean queries upstream.
//! All configuration comes from the environment; see `sentra-config`.

use anyhow::{Context, Result};
use clap::Parser;
use sentra_cache::MemoryCache;
use sentra_classify::Classifier;
use sentra_config::Config;
use sentra_metrics::prometheus::{init_prometheus, PrometheusConfig};
use sentra_metrics::tracing_setup::{init_tracing, parse_level, LogConfig, LogFormat};
use sentra_resolver::Forwarder;
use sentra_server::{FilterHandler, QueryLogSink, UdpServer};
use sentra_store::{MemoryStore, SqliteStore, ThreatStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// How long shutdown waits for in-flight handlers.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Sentra DNS filtering resolver.
#[derive(Parser, Debug)]
#[command(name = "sentra", version, about, long_about = None)]
struct Cli {
    /// Override the configured log level.
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Minimal output (errors only).
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(config: &Config, cli: &Cli) {
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
}

/// Opens the threat store named by `DATABASE_URL`.
fn build_store(config: &Config) -> Result<Arc<dyn ThreatStore>> {
    match config.database_path() {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("opening threat database at {path}"))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("using in-memory threat store; threat data will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("loading configuration")?;
    init_logging(&config, &cli);

    info!(version = env!("CARGO_PKG_VERSION"), "starting sentra DNS filter");

    if let Err(e) = init_prometheus(&PrometheusConfig {
        listen: config.http_address,
    }) {
        warn!(error = %e, "metrics exporter failed to start; continuing without it");
    }

    let store = build_store(&config)?;
    let cache = Arc::new(MemoryCache::new());

    let classifier = Classifier::new(store.clone(), cache);
    let forwarder = Arc::new(Forwarder::new(&config.upstreams, config.upstream_timeout));
    for upstream in forwarder.upstreams() {
        info!(upstream = %upstream.address(), "configured upstream resolver");
    }

    let log_sink = QueryLogSink::spawn(store.clone(), sentra_server::query_log::DEFAULT_CAPACITY);
    let handler = Arc::new(FilterHandler::new(classifier, forwarder, log_sink));

    let server = Arc::new(
        UdpServer::bind(config.dns_address, handler)
            .await
            .with_context(|| format!("binding DNS listener on {}", config.dns_address))?,
    );

    let serving = Arc::clone(&server);
    let serve_task = tokio::spawn(async move { serving.run().await });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight queries");

    server.shutdown(SHUTDOWN_DEADLINE).await;
    serve_task.abort();

    info!("sentra DNS filter stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                return signal::ctrl_c().await.unwrap_or(());
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            result = signal::ctrl_c() => {
                if result.is_ok() {
                    info!("received SIGINT");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
