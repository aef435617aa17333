//! # Sentra threat table
//!
//! Durable storage for feed-derived threat intelligence and the
//! append-only DNS query log.
//!
//! The [`ThreatStore`] trait is the seam between the resolver and its
//! backing store: the classifier holds a read-mostly handle, the feed
//! updater holds the same handle for bulk writes, and neither sees the
//! storage engine. Two implementations ship: [`SqliteStore`] for real
//! deployments and [`MemoryStore`] for tests and local runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// How long a row stays visible to classification after its last update.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Storage error.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite-level failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task running a query was cancelled.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Row rejected before reaching the engine.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Threat categories recognized by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatType {
    /// Malware distribution.
    Malware,
    /// Credential phishing.
    Phishing,
    /// Advertising / tracking.
    Ads,
    /// Spam infrastructure.
    Spam,
    /// Botnet command and control.
    Botnet,
}

impl ThreatType {
    /// Returns the lowercase wire/storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malware => "malware",
            Self::Phishing => "phishing",
            Self::Ads => "ads",
            Self::Spam => "spam",
            Self::Botnet => "botnet",
        }
    }

    /// Parses the storage name.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "malware" => Some(Self::Malware),
            "phishing" => Some(Self::Phishing),
            "ads" => Some(Self::Ads),
            "spam" => Some(Self::Spam),
            "botnet" => Some(Self::Botnet),
            _ => None,
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized threat assertion about one domain, as produced by feed
/// ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatEntry {
    /// Lowercased, validated domain.
    pub domain: String,
    /// Threat category.
    pub threat_type: ThreatType,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Short identifier of the originating feed.
    pub source: String,
    /// When the source first observed the domain.
    pub first_seen: DateTime<Utc>,
    /// When the source last observed the domain.
    pub last_seen: DateTime<Utc>,
    /// Whether the entry is considered live by its source.
    pub is_active: bool,
    /// Free-form per-feed metadata.
    pub metadata: HashMap<String, String>,
}

impl ThreatEntry {
    /// Creates an entry observed now with empty metadata.
    pub fn new(
        domain: impl Into<String>,
        threat_type: ThreatType,
        confidence: f64,
        source: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            domain: domain.into(),
            threat_type,
            confidence,
            source: source.into(),
            first_seen: now,
            last_seen: now,
            is_active: true,
            metadata: HashMap::new(),
        }
    }

    /// Normalizes the confidence to `[0, 1]`, treating values above 1 as
    /// percentages.
    pub fn normalized_confidence(&self) -> f64 {
        let c = if self.confidence > 1.0 {
            self.confidence / 100.0
        } else {
            self.confidence
        };
        c.clamp(0.0, 1.0)
    }
}

/// A fresh row returned by [`ThreatStore::lookup_active`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThreatMatch {
    /// Threat category of the matched row.
    pub threat_type: ThreatType,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Outcome of a bulk upsert: rows merged vs rows skipped on error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Rows inserted or merged.
    pub upserted: usize,
    /// Rows skipped after a per-row failure.
    pub skipped: usize,
}

/// Aggregate statistics over the threat table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreatStats {
    /// Total rows, regardless of freshness.
    pub total: u64,
    /// Row counts by threat type.
    pub by_type: HashMap<String, u64>,
    /// Rows created within the last 24 hours.
    pub recent_24h: u64,
    /// Top sources by row count, best first, at most ten.
    pub by_source: Vec<(String, u64)>,
}

/// The decision recorded for a resolved query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryDecision {
    /// Query was forwarded and answered.
    Allowed,
    /// Query was answered with NXDOMAIN by policy.
    Blocked,
    /// Resolution failed.
    Error,
}

impl QueryDecision {
    /// Returns the storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
            Self::Error => "error",
        }
    }
}

/// One row of the append-only query log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    /// When the query completed.
    pub timestamp: DateTime<Utc>,
    /// Client socket address.
    pub client_addr: String,
    /// Queried domain, lookup-key form.
    pub domain: String,
    /// Query type mnemonic.
    pub qtype: String,
    /// The decision taken.
    pub decision: QueryDecision,
    /// Threat type when blocked.
    pub threat_type: Option<String>,
    /// Wall-clock handling time in milliseconds.
    pub response_ms: Option<u64>,
}

/// The threat table and query log, behind a swappable interface.
///
/// Every method is best-effort from the resolver's point of view: a failing
/// store must never take the resolver down, so callers treat errors as
/// "no data" and keep serving.
#[async_trait]
pub trait ThreatStore: Send + Sync {
    /// Returns the highest-confidence row for `domain` whose `updated_at`
    /// falls inside [`FRESHNESS_WINDOW`], or `None`.
    ///
    /// The window is strict: a row exactly at the boundary is stale.
    async fn lookup_active(&self, domain: &str) -> Result<Option<ThreatMatch>>;

    /// Merges a batch of entries, one transaction per batch.
    ///
    /// Per-row policy: keep the maximum confidence ever seen, the latest
    /// `last_seen`, and the incoming type/source; failed rows are logged
    /// and skipped without failing the batch.
    async fn bulk_upsert(&self, entries: &[ThreatEntry]) -> Result<UpsertOutcome>;

    /// Returns aggregate statistics.
    async fn stats(&self) -> Result<ThreatStats>;

    /// Deletes rows whose `updated_at` is older than `max_age`. Returns
    /// the number of rows removed.
    async fn cleanup(&self, max_age: Duration) -> Result<u64>;

    /// Appends one row to the query log.
    async fn append_query_log(&self, record: &QueryRecord) -> Result<()>;
}

/// Converts a [`Duration`] cutoff into the epoch-seconds timestamp used by
/// both store implementations.
pub(crate) fn cutoff_epoch(now: DateTime<Utc>, max_age: Duration) -> i64 {
    (now - ChronoDuration::seconds(max_age.as_secs() as i64)).timestamp()
}
