//! # Sentra metrics
//!
//! Counter/histogram registry for the resolver, exported through a
//! Prometheus scrape endpoint. Every series goes through the `metrics`
//! facade; the hot counters are mirrored in process-local atomics so tests
//! can assert on deltas without standing up an exporter.

#![warn(missing_docs)]
#![warn(clippy::all)]

use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub mod prometheus;
pub mod tracing_setup;

static METRICS: OnceCell<DnsMetrics> = OnceCell::new();

/// Returns the global metrics handle, initializing it on first use.
pub fn metrics() -> &'static DnsMetrics {
    METRICS.get_or_init(DnsMetrics::new)
}

/// Resolver metrics.
///
/// Counters have no cross-metric consistency guarantee; each is an
/// independent atomic.
#[derive(Debug)]
pub struct DnsMetrics {
    start_time: Instant,
    queries: AtomicU64,
    blocked: AtomicU64,
    allowed: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    table_queries: AtomicU64,
    table_errors: AtomicU64,
    log_drops: AtomicU64,
}

impl DnsMetrics {
    /// Creates a zeroed registry.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            queries: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            table_queries: AtomicU64::new(0),
            table_errors: AtomicU64::new(0),
            log_drops: AtomicU64::new(0),
        }
    }

    /// Returns process uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Records a received query message.
    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_dns_queries_total").increment(1);
    }

    /// Records one question's qtype.
    pub fn record_qtype(&self, qtype: &str) {
        counter!("sentra_dns_queries_by_type_total", "qtype" => qtype.to_string()).increment(1);
    }

    /// Records a blocked verdict.
    pub fn record_blocked(&self, threat_type: &str) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_dns_blocked_total").increment(1);
        counter!("sentra_threats_by_type_total", "threat_type" => threat_type.to_string())
            .increment(1);
    }

    /// Records an allowed (forwarded and answered) query.
    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_dns_allowed_total").increment(1);
    }

    /// Records a query that failed to resolve.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_dns_errors_total").increment(1);
    }

    /// Records a decision-cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_cache_hits_total").increment(1);
    }

    /// Records a decision-cache miss.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_cache_misses_total").increment(1);
    }

    /// Records a threat-table lookup.
    pub fn record_table_query(&self) {
        self.table_queries.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_threat_table_queries_total").increment(1);
    }

    /// Records a threat-table failure.
    pub fn record_table_error(&self) {
        self.table_errors.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_threat_table_errors_total").increment(1);
    }

    /// Records a query-log record dropped under overload.
    pub fn record_log_drop(&self) {
        self.log_drops.fetch_add(1, Ordering::Relaxed);
        counter!("sentra_query_log_dropped_total").increment(1);
    }

    /// Records total handler latency.
    pub fn record_response_time(&self, elapsed: Duration) {
        histogram!("sentra_dns_response_time_seconds").record(elapsed.as_secs_f64());
    }

    /// Total queries seen.
    pub fn queries_total(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Total blocked verdicts.
    pub fn blocked_total(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    /// Total allowed queries.
    pub fn allowed_total(&self) -> u64 {
        self.allowed.load(Ordering::Relaxed)
    }

    /// Total failed queries.
    pub fn errors_total(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Total cache hits.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Total cache misses.
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Total threat-table lookups.
    pub fn table_queries(&self) -> u64 {
        self.table_queries.load(Ordering::Relaxed)
    }

    /// Total threat-table failures.
    pub fn table_errors(&self) -> u64 {
        self.table_errors.load(Ordering::Relaxed)
    }

    /// Total dropped query-log records.
    pub fn log_drops(&self) -> u64 {
        self.log_drops.load(Ordering::Relaxed)
    }
}

impl Default for DnsMetrics {
    fn default() -> Self {
        Self::new()
    }
}
