//! # Sentra query classifier
//!
//! Decides block/allow for a queried name: decision cache first, then the
//! threat table, then the same table lookup for every parent suffix of the
//! name. The classifier owns the resolver's fail-open guarantee: any
//! cache or store failure degrades to "not a threat" and the query is
//! forwarded normally.

#![warn(missing_docs)]
#![warn(clippy::all)]

use sentra_cache::{decision_key, Decision, DecisionCache};
use sentra_metrics::metrics;
use sentra_store::ThreatStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Minimum confidence for a fresh threat row to force a block.
pub const BLOCK_THRESHOLD: f64 = 0.70;

/// Request-scoped deadline for each threat-table lookup.
const TABLE_DEADLINE: Duration = Duration::from_secs(5);

/// The classifier's answer for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// True when the query must be answered with NXDOMAIN.
    pub block: bool,
    /// The threat category that triggered the block; `"cached"` when the
    /// verdict came from the decision cache.
    pub threat_type: Option<String>,
}

impl Verdict {
    fn allow() -> Self {
        Self {
            block: false,
            threat_type: None,
        }
    }

    fn block(threat_type: impl Into<String>) -> Self {
        Self {
            block: true,
            threat_type: Some(threat_type.into()),
        }
    }
}

/// Cache-then-table classifier with parent-suffix escalation.
///
/// Holds read handles only: the classifier never writes the threat table,
/// and its cache writes are advisory.
pub struct Classifier {
    store: Arc<dyn ThreatStore>,
    cache: Arc<dyn DecisionCache>,
}

impl Classifier {
    /// Creates a classifier over the given store and cache handles.
    pub fn new(store: Arc<dyn ThreatStore>, cache: Arc<dyn DecisionCache>) -> Self {
        Self { store, cache }
    }

    /// Classifies a domain.
    ///
    /// `domain` may arrive in any case and with a trailing dot; it is
    /// normalized before lookup. On a block from the threat table the
    /// **original** (normalized) domain is cached, so repeat queries for
    /// the same subdomain skip the suffix walk entirely.
    pub async fn classify(&self, domain: &str) -> Verdict {
        let domain = normalize(domain);
        if domain.is_empty() {
            return Verdict::allow();
        }

        let key = decision_key(&domain);

        // 1. Decision cache.
        match self.cache.get(&key).await {
            Ok(Some(value)) => match Decision::from_cached(&value) {
                Some(Decision::Blocked) => {
                    metrics().record_cache_hit();
                    return Verdict::block("cached");
                }
                Some(Decision::Allowed) => {
                    metrics().record_cache_hit();
                    return Verdict::allow();
                }
                None => {
                    debug!(domain = %domain, value = %value, "ignoring unknown cache value");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(domain = %domain, error = %e, "decision cache unavailable");
            }
        }
        metrics().record_cache_miss();

        // 2. Exact threat-table lookup.
        if let Some(threat_type) = self.lookup_blockable(&domain).await {
            self.cache_decision(&key, Decision::Blocked).await;
            return Verdict::block(threat_type);
        }

        // 3. Parent-suffix escalation: drop one leading label at a time.
        // The walk reaches the TLD, which is simply expected to miss.
        let mut suffix = &domain[..];
        while let Some(dot) = suffix.find('.') {
            suffix = &suffix[dot + 1..];
            if suffix.is_empty() {
                break;
            }
            if let Some(threat_type) = self.lookup_blockable(suffix).await {
                // Cache under the original name: the suffix-walk cost is
                // paid once per unique subdomain per TTL window.
                self.cache_decision(&key, Decision::Blocked).await;
                return Verdict::block(threat_type);
            }
        }

        // 4. Nothing matched.
        self.cache_decision(&key, Decision::Allowed).await;
        Verdict::allow()
    }

    /// One fail-open threat-table lookup; returns the threat type when the
    /// row is blockable.
    async fn lookup_blockable(&self, domain: &str) -> Option<String> {
        metrics().record_table_query();

        let lookup = tokio::time::timeout(TABLE_DEADLINE, self.store.lookup_active(domain));
        match lookup.await {
            Ok(Ok(Some(row))) if row.confidence >= BLOCK_THRESHOLD => {
                Some(row.threat_type.as_str().to_string())
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                metrics().record_table_error();
                warn!(domain = %domain, error = %e, "threat table unavailable, failing open");
                None
            }
            Err(_) => {
                metrics().record_table_error();
                warn!(domain = %domain, "threat table lookup deadline exceeded, failing open");
                None
            }
        }
    }

    /// Best-effort cache write.
    async fn cache_decision(&self, key: &str, decision: Decision) {
        if let Err(e) = self
            .cache
            .set(key, decision.as_str(), decision.ttl())
            .await
        {
            warn!(key = %key, error = %e, "decision cache write failed");
        }
    }
}

/// Lowercases and strips a single trailing dot.
fn normalize(domain: &str) -> String {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    domain.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentra_cache::MemoryCache;
    use sentra_store::{
        MemoryStore, QueryRecord, Result as StoreResult, StoreError, ThreatEntry, ThreatMatch,
        ThreatStats, ThreatType, UpsertOutcome,
    };
    use std::sync::atomic::{AtomicU64, Ordering};

    async fn classifier_with(
        entries: &[(&str, ThreatType, f64)],
    ) -> (Classifier, Arc<MemoryStore>, Arc<MemoryCache>) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());

        let batch: Vec<ThreatEntry> = entries
            .iter()
            .map(|(d, t, c)| ThreatEntry::new(*d, *t, *c, "test"))
            .collect();
        store.bulk_upsert(&batch).await.unwrap();

        (
            Classifier::new(store.clone(), cache.clone()),
            store,
            cache,
        )
    }

    #[tokio::test]
    async fn test_blockable_row_blocks() {
        let (classifier, _, _) =
            classifier_with(&[("evil.example", ThreatType::Malware, 0.90)]).await;

        let verdict = classifier.classify("evil.example").await;
        assert!(verdict.block);
        assert_eq!(verdict.threat_type.as_deref(), Some("malware"));
    }

    #[tokio::test]
    async fn test_low_confidence_is_allowed() {
        let (classifier, _, _) =
            classifier_with(&[("shady.example", ThreatType::Spam, 0.50)]).await;

        let verdict = classifier.classify("shady.example").await;
        assert!(!verdict.block);
    }

    #[tokio::test]
    async fn test_threshold_boundary_inclusive() {
        let (classifier, _, _) =
            classifier_with(&[("edge.example", ThreatType::Botnet, BLOCK_THRESHOLD)]).await;

        let verdict = classifier.classify("edge.example").await;
        assert!(verdict.block);
    }

    #[tokio::test]
    async fn test_normalization() {
        let (classifier, _, _) =
            classifier_with(&[("evil.example", ThreatType::Phishing, 0.95)]).await;

        let verdict = classifier.classify("EVIL.Example.").await;
        assert!(verdict.block);
    }

    #[tokio::test]
    async fn test_parent_suffix_escalation_caches_original() {
        let (classifier, _, cache) =
            classifier_with(&[("doubleclick.net", ThreatType::Ads, 0.90)]).await;

        let verdict = classifier.classify("tracker.cdn.doubleclick.net").await;
        assert!(verdict.block);
        assert_eq!(verdict.threat_type.as_deref(), Some("ads"));

        // The original subdomain is cached, not the matching ancestor.
        let cached = cache
            .get("domain:tracker.cdn.doubleclick.net")
            .await
            .unwrap();
        assert_eq!(cached.as_deref(), Some("blocked"));
        assert!(cache.get("domain:doubleclick.net").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_block_short_circuits_store() {
        struct CountingStore {
            inner: MemoryStore,
            lookups: AtomicU64,
        }

        #[async_trait]
        impl ThreatStore for CountingStore {
            async fn lookup_active(&self, domain: &str) -> StoreResult<Option<ThreatMatch>> {
                self.lookups.fetch_add(1, Ordering::Relaxed);
                self.inner.lookup_active(domain).await
            }
            async fn bulk_upsert(&self, entries: &[ThreatEntry]) -> StoreResult<UpsertOutcome> {
                self.inner.bulk_upsert(entries).await
            }
            async fn stats(&self) -> StoreResult<ThreatStats> {
                self.inner.stats().await
            }
            async fn cleanup(&self, max_age: std::time::Duration) -> StoreResult<u64> {
                self.inner.cleanup(max_age).await
            }
            async fn append_query_log(&self, record: &QueryRecord) -> StoreResult<()> {
                self.inner.append_query_log(record).await
            }
        }

        let store = Arc::new(CountingStore {
            inner: MemoryStore::new(),
            lookups: AtomicU64::new(0),
        });
        let cache = Arc::new(MemoryCache::new());
        cache
            .set("domain:ads.example", "blocked", Duration::from_secs(60))
            .await
            .unwrap();

        let classifier = Classifier::new(store.clone(), cache);
        let verdict = classifier.classify("ads.example").await;

        assert!(verdict.block);
        assert_eq!(verdict.threat_type.as_deref(), Some("cached"));
        assert_eq!(store.lookups.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_allow_path_caches_allowed() {
        let (classifier, _, cache) = classifier_with(&[]).await;

        let verdict = classifier.classify("example.com").await;
        assert!(!verdict.block);
        assert_eq!(
            cache.get("domain:example.com").await.unwrap().as_deref(),
            Some("allowed")
        );
    }

    #[tokio::test]
    async fn test_store_error_fails_open() {
        struct BrokenStore;

        #[async_trait]
        impl ThreatStore for BrokenStore {
            async fn lookup_active(&self, _domain: &str) -> StoreResult<Option<ThreatMatch>> {
                Err(StoreError::InvalidEntry("connection refused".into()))
            }
            async fn bulk_upsert(&self, _entries: &[ThreatEntry]) -> StoreResult<UpsertOutcome> {
                Ok(UpsertOutcome::default())
            }
            async fn stats(&self) -> StoreResult<ThreatStats> {
                Ok(ThreatStats::default())
            }
            async fn cleanup(&self, _max_age: std::time::Duration) -> StoreResult<u64> {
                Ok(0)
            }
            async fn append_query_log(&self, _record: &QueryRecord) -> StoreResult<()> {
                Ok(())
            }
        }

        let classifier = Classifier::new(Arc::new(BrokenStore), Arc::new(MemoryCache::new()));
        let verdict = classifier.classify("anything.example").await;
        assert!(!verdict.block);
    }

    #[tokio::test]
    async fn test_stale_row_is_not_blockable() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        store
            .bulk_upsert(&[ThreatEntry::new(
                "old.example",
                ThreatType::Malware,
                0.95,
                "test",
            )])
            .await
            .unwrap();
        store.set_updated_at(
            "old.example",
            chrono::Utc::now().timestamp() - 31 * 86400,
        );

        let classifier = Classifier::new(store, cache);
        let verdict = classifier.classify("old.example").await;
        assert!(!verdict.block);
    }
}
