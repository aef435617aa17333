//! # Sentra feed ingestion
//!
//! Periodically fetches external threat and ad-block feeds, parses each
//! format into normalized [`ThreatEntry`](sentra_store::ThreatEntry)
//! values, and batch-loads the threat table. A failing feed (HTTP error,
//! timeout, garbage payload) costs one cycle of that feed and nothing
//! else.

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use sentra_store::{ThreatEntry, ThreatStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

mod formats;

pub use formats::{
    extract_domain, is_valid_domain, FeedFormat, ADBLOCK_ROW_CAP, HOSTS_ROW_CAP,
};

/// How often the update loop wakes up.
pub const UPDATE_CYCLE: Duration = Duration::from_secs(5 * 60);

/// How often aged rows are purged.
pub const CLEANUP_CYCLE: Duration = Duration::from_secs(60 * 60);

/// Age at which purged rows are deleted outright.
pub const CLEANUP_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// HTTP timeout for threat feeds.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP timeout for the (much larger) ad-block feeds.
const AD_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Feed ingestion error.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Transport-level fetch failure.
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Upstream answered with a non-200 status.
    #[error("feed returned HTTP {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
    },
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

/// One configured feed.
#[derive(Debug, Clone)]
pub struct FeedDescriptor {
    /// Human-readable feed name.
    pub name: &'static str,
    /// Fetch URL.
    pub source_url: &'static str,
    /// Payload format.
    pub format: FeedFormat,
    /// Minimum time between fetches of this feed.
    pub update_interval: Duration,
    /// Completion time of the last successful fetch.
    pub last_updated: Option<DateTime<Utc>>,
    /// Disabled feeds are configured but never fetched.
    pub enabled: bool,
    /// Per-request timeout.
    pub fetch_timeout: Duration,
}

impl FeedDescriptor {
    /// Returns the short source identifier stored on entries:
    /// the lowercased name with spaces collapsed to underscores.
    pub fn source_id(&self) -> String {
        self.name.to_ascii_lowercase().replace(' ', "_")
    }

    /// Returns true when this feed's own interval has elapsed.
    pub fn needs_update(&self, now: DateTime<Utc>) -> bool {
        match self.last_updated {
            None => true,
            Some(last) => {
                now.signed_duration_since(last).to_std().unwrap_or_default()
                    >= self.update_interval
            }
        }
    }
}

/// The built-in feed catalog.
///
/// PhishTank ships disabled: its bulk download requires registration.
pub fn default_feeds() -> Vec<FeedDescriptor> {
    const HOUR: Duration = Duration::from_secs(60 * 60);
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    let feed = |name, source_url, format, update_interval, enabled, fetch_timeout| FeedDescriptor {
        name,
        source_url,
        format,
        update_interval,
        last_updated: None,
        enabled,
        fetch_timeout,
    };

    vec![
        feed(
            "URLhaus",
            "https://urlhaus.abuse.ch/downloads/json/",
            FeedFormat::UrlhausJson,
            Duration::from_secs(5 * 60),
            true,
            FETCH_TIMEOUT,
        ),
        feed(
            "OpenPhish",
            "https://openphish.com/feed.txt",
            FeedFormat::OpenphishText,
            Duration::from_secs(30 * 60),
            true,
            FETCH_TIMEOUT,
        ),
        feed(
            "PhishTank",
            "http://data.phishtank.com/data/online-valid.json",
            FeedFormat::PhishtankJson,
            HOUR,
            false,
            FETCH_TIMEOUT,
        ),
        feed(
            "EasyList",
            "https://easylist.to/easylist/easylist.txt",
            FeedFormat::AdblockFilter,
            DAY,
            true,
            AD_FETCH_TIMEOUT,
        ),
        feed(
            "EasyPrivacy",
            "https://easylist.to/easylist/easyprivacy.txt",
            FeedFormat::AdblockFilter,
            DAY,
            true,
            AD_FETCH_TIMEOUT,
        ),
        feed(
            "AdGuard Base",
            "https://filters.adtidy.org/extension/chromium/filters/2.txt",
            FeedFormat::AdblockFilter,
            12 * HOUR,
            true,
            AD_FETCH_TIMEOUT,
        ),
        feed(
            "StevenBlack Hosts",
            "https://raw.githubusercontent.com/StevenBlack/hosts/master/hosts",
            FeedFormat::Hosts,
            DAY,
            true,
            AD_FETCH_TIMEOUT,
        ),
        feed(
            "Peter Lowe's List",
            "https://pgl.yoyo.org/adservers/serverlist.php?hostformat=hosts&showintro=0&mimetype=plaintext",
            FeedFormat::Hosts,
            DAY,
            true,
            AD_FETCH_TIMEOUT,
        ),
        feed(
            "Dan Pollock's Hosts",
            "https://someonewhocares.org/hosts/zero/hosts",
            FeedFormat::Hosts,
            DAY,
            true,
            AD_FETCH_TIMEOUT,
        ),
    ]
}

/// Fetches and parses the configured feeds.
///
/// Owns the pooled HTTP client; per-feed state (`last_updated`) mutates
/// only here, on the ingestion loop's task.
pub struct FeedManager {
    feeds: Vec<FeedDescriptor>,
    client: reqwest::Client,
}

impl FeedManager {
    /// Creates a manager over the given feeds.
    pub fn new(feeds: Vec<FeedDescriptor>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sentra-dns-filter/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client construction cannot fail with static config");

        Self { feeds, client }
    }

    /// Creates a manager over the built-in catalog.
    pub fn with_default_feeds() -> Self {
        Self::new(default_feeds())
    }

    /// Returns the configured feeds.
    pub fn feeds(&self) -> &[FeedDescriptor] {
        &self.feeds
    }

    /// Runs one ingestion pass over every enabled feed whose interval has
    /// elapsed, returning the combined normalized entries.
    ///
    /// A failing feed is logged and skipped for this cycle; its
    /// `last_updated` is left unchanged so the next cycle retries.
    pub async fn update_all(&mut self) -> Vec<ThreatEntry> {
        let now = Utc::now();
        let mut all_entries = Vec::new();

        for feed in &mut self.feeds {
            if !feed.enabled {
                continue;
            }
            if !feed.needs_update(now) {
                debug!(feed = feed.name, "feed interval not yet elapsed");
                continue;
            }

            info!(feed = feed.name, url = feed.source_url, "updating feed");
            match fetch_feed(&self.client, feed).await {
                Ok(body) => {
                    let entries = feed.format.parse(&body, &feed.source_id());
                    info!(feed = feed.name, entries = entries.len(), "feed updated");
                    all_entries.extend(entries);
                    feed.last_updated = Some(Utc::now());
                }
                Err(e) => {
                    warn!(feed = feed.name, error = %e, "feed update failed, skipping cycle");
                }
            }
        }

        all_entries
    }
}

async fn fetch_feed(client: &reqwest::Client, feed: &FeedDescriptor) -> Result<String> {
    let response = client
        .get(feed.source_url)
        .timeout(feed.fetch_timeout)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::Status {
            status: status.as_u16(),
        });
    }

    Ok(response.text().await?)
}

/// Runs the ingestion loop until `shutdown` fires: a full pass at startup,
/// another every [`UPDATE_CYCLE`], and an independent cleanup pass every
/// [`CLEANUP_CYCLE`] deleting rows older than [`CLEANUP_MAX_AGE`].
pub async fn run_update_loop(
    mut manager: FeedManager,
    store: Arc<dyn ThreatStore>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut update_tick = tokio::time::interval(UPDATE_CYCLE);
    let mut cleanup_tick = tokio::time::interval(CLEANUP_CYCLE);
    // The first interval tick fires immediately; push cleanup one period out.
    cleanup_tick.reset();

    loop {
        tokio::select! {
            _ = update_tick.tick() => {
                run_update_pass(&mut manager, store.as_ref()).await;
            }
            _ = cleanup_tick.tick() => {
                match store.cleanup(CLEANUP_MAX_AGE).await {
                    Ok(deleted) => info!(deleted, "threat table cleanup pass finished"),
                    Err(e) => error!(error = %e, "threat table cleanup failed"),
                }
            }
            _ = shutdown.recv() => {
                info!("feed update loop stopping");
                return;
            }
        }
    }
}

async fn run_update_pass(manager: &mut FeedManager, store: &dyn ThreatStore) {
    let started = std::time::Instant::now();
    let entries = manager.update_all().await;
    if entries.is_empty() {
        info!("no new feed entries this cycle");
        return;
    }

    match store.bulk_upsert(&entries).await {
        Ok(outcome) => {
            info!(
                upserted = outcome.upserted,
                skipped = outcome.skipped,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "threat table updated"
            );

            match store.stats().await {
                Ok(stats) => info!(
                    total = stats.total,
                    recent_24h = stats.recent_24h,
                    "threat table stats"
                ),
                Err(e) => warn!(error = %e, "could not read threat table stats"),
            }
        }
        Err(e) => error!(error = %e, "bulk upsert failed"),
    }
}
