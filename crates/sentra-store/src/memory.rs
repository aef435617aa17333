//! In-memory threat store.
//!
//! Backs tests and `DATABASE_URL=memory:` local runs. Same merge and
//! freshness semantics as the SQLite store, no persistence.

use crate::{
    cutoff_epoch, QueryRecord, Result, ThreatEntry, ThreatMatch, ThreatStats, ThreatStore,
    UpsertOutcome, FRESHNESS_WINDOW,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredRow {
    entry: ThreatEntry,
    created_at: i64,
    updated_at: i64,
}

/// DashMap-backed implementation of [`ThreatStore`].
#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<String, StoredRow>,
    logs: Mutex<Vec<QueryRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every query-log record appended so far.
    pub fn logged_queries(&self) -> Vec<QueryRecord> {
        self.logs.lock().clone()
    }

    /// Overrides a row's `updated_at`, for exercising the freshness
    /// window from other crates' tests.
    pub fn set_updated_at(&self, domain: &str, updated_at: i64) {
        if let Some(mut row) = self.rows.get_mut(domain) {
            row.updated_at = updated_at;
        }
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl ThreatStore for MemoryStore {
    async fn lookup_active(&self, domain: &str) -> Result<Option<ThreatMatch>> {
        let fresh_after = cutoff_epoch(Utc::now(), FRESHNESS_WINDOW);
        Ok(self.rows.get(domain).and_then(|row| {
            (row.updated_at > fresh_after).then(|| ThreatMatch {
                threat_type: row.entry.threat_type,
                confidence: row.entry.normalized_confidence(),
            })
        }))
    }

    async fn bulk_upsert(&self, entries: &[ThreatEntry]) -> Result<UpsertOutcome> {
        let now = Utc::now().timestamp();
        let mut outcome = UpsertOutcome::default();

        for entry in entries {
            if entry.domain.is_empty() {
                outcome.skipped += 1;
                continue;
            }

            let mut incoming = entry.clone();
            incoming.confidence = incoming.normalized_confidence();

            match self.rows.entry(entry.domain.clone()) {
                Entry::Occupied(mut occupied) => {
                    let row = occupied.get_mut();
                    row.entry.confidence = row.entry.confidence.max(incoming.confidence);
                    row.entry.threat_type = incoming.threat_type;
                    if !incoming.source.is_empty() {
                        row.entry.source = incoming.source;
                    }
                    if incoming.last_seen > row.entry.last_seen {
                        row.entry.last_seen = incoming.last_seen;
                    }
                    row.entry.is_active = true;
                    row.entry.metadata = incoming.metadata;
                    row.updated_at = now;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(StoredRow {
                        entry: incoming,
                        created_at: now,
                        updated_at: now,
                    });
                }
            }
            outcome.upserted += 1;
        }

        Ok(outcome)
    }

    async fn stats(&self) -> Result<ThreatStats> {
        let day_ago = cutoff_epoch(Utc::now(), Duration::from_secs(24 * 60 * 60));
        let mut stats = ThreatStats {
            total: self.rows.len() as u64,
            ..Default::default()
        };

        let mut sources: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for row in self.rows.iter() {
            *stats
                .by_type
                .entry(row.entry.threat_type.as_str().to_string())
                .or_default() += 1;
            *sources.entry(row.entry.source.clone()).or_default() += 1;
            if row.created_at > day_ago {
                stats.recent_24h += 1;
            }
        }

        let mut by_source: Vec<(String, u64)> = sources.into_iter().collect();
        by_source.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        by_source.truncate(10);
        stats.by_source = by_source;

        Ok(stats)
    }

    async fn cleanup(&self, max_age: Duration) -> Result<u64> {
        let cutoff = cutoff_epoch(Utc::now(), max_age);
        let before = self.rows.len();
        self.rows.retain(|_, row| row.updated_at >= cutoff);
        Ok((before - self.rows.len()) as u64)
    }

    async fn append_query_log(&self, record: &QueryRecord) -> Result<()> {
        self.logs.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ThreatType;

    fn entry(domain: &str, confidence: f64, source: &str) -> ThreatEntry {
        ThreatEntry::new(domain, ThreatType::Ads, confidence, source)
    }

    #[tokio::test]
    async fn test_merge_matches_sqlite_semantics() {
        let store = MemoryStore::new();
        store
            .bulk_upsert(&[entry("evil.example", 0.80, "easylist")])
            .await
            .unwrap();
        store
            .bulk_upsert(&[entry("evil.example", 0.90, "adguard_base")])
            .await
            .unwrap();
        store
            .bulk_upsert(&[entry("evil.example", 0.50, "easylist")])
            .await
            .unwrap();

        let hit = store.lookup_active("evil.example").await.unwrap().unwrap();
        assert!((hit.confidence - 0.90).abs() < f64::EPSILON);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_row_is_invisible() {
        let store = MemoryStore::new();
        store
            .bulk_upsert(&[entry("old.example", 0.95, "feed")])
            .await
            .unwrap();

        let window = FRESHNESS_WINDOW.as_secs() as i64;
        store.set_updated_at("old.example", Utc::now().timestamp() - window);

        assert!(store.lookup_active("old.example").await.unwrap().is_none());

        // The row is hidden from classification, not deleted.
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_cleanup() {
        let store = MemoryStore::new();
        store
            .bulk_upsert(&[entry("a.example", 0.9, "f"), entry("b.example", 0.9, "f")])
            .await
            .unwrap();
        store.set_updated_at("a.example", Utc::now().timestamp() - 40 * 86400);

        let deleted = store.cleanup(Duration::from_secs(30 * 86400)).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_query_log_capture() {
        let store = MemoryStore::new();
        store
            .append_query_log(&QueryRecord {
                timestamp: Utc::now(),
                client_addr: "10.0.0.1:9".to_string(),
                domain: "x.test".to_string(),
                qtype: "A".to_string(),
                decision: crate::QueryDecision::Allowed,
                threat_type: None,
                response_ms: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(store.logged_queries().len(), 1);
    }
}
