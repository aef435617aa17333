//! # Sentra decision cache
//!
//! A TTL'd key-value cache holding per-domain block/allow decisions. The
//! cache is purely advisory: a miss or an error only costs latency, never
//! correctness, so every caller degrades an `Err` to a miss.
//!
//! Values are short opaque strings; the resolver stores exactly two
//! literals, rendered by [`Decision`]. Keys are built by [`decision_key`].
//! Expired entries are invisible on read and reclaimed lazily on access.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// TTL for cached "blocked" decisions. Threat intel rarely flips back, so
/// blocked answers are kept longer.
pub const BLOCKED_TTL: Duration = Duration::from_secs(60 * 60);

/// TTL for cached "allowed" decisions. Shorter, so newly ingested threats
/// take effect within half an hour.
pub const ALLOWED_TTL: Duration = Duration::from_secs(30 * 60);

/// Cache error.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache backend could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// The two cacheable verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Synthesize NXDOMAIN.
    Blocked,
    /// Forward upstream.
    Allowed,
}

impl Decision {
    /// Returns the literal stored in the cache.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Allowed => "allowed",
        }
    }

    /// Parses a cached literal. Unknown values are treated as a miss by
    /// callers, so this is `Option` rather than `Result`.
    pub fn from_cached(value: &str) -> Option<Self> {
        match value {
            "blocked" => Some(Self::Blocked),
            "allowed" => Some(Self::Allowed),
            _ => None,
        }
    }

    /// Returns the TTL policy for this decision.
    pub const fn ttl(self) -> Duration {
        match self {
            Self::Blocked => BLOCKED_TTL,
            Self::Allowed => ALLOWED_TTL,
        }
    }
}

/// Builds the cache key for a domain decision.
pub fn decision_key(domain: &str) -> String {
    format!("domain:{domain}")
}

/// Advisory TTL'd string cache.
///
/// Writes are best-effort: implementations log failures instead of
/// propagating them where possible, and callers ignore write errors.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    /// Returns the live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Stores `value` only if `key` has no live value. Returns true if the
    /// value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Increments the counter at `key`, creating it with `ttl` when absent
    /// or expired. Returns the new count.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64>;
}

#[derive(Debug, Clone)]
enum Slot {
    Text(String),
    Counter(u64),
}

#[derive(Debug, Clone)]
struct CacheSlot {
    value: Slot,
    expires_at: Instant,
}

impl CacheSlot {
    /// An entry at its expiry instant is already gone.
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process [`DecisionCache`] over a concurrent map.
///
/// Expired slots are dropped on the access that finds them; there is no
/// background sweeper.
#[derive(Default)]
pub struct MemoryCache {
    map: DashMap<String, CacheSlot>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots currently held, including not-yet-reclaimed expired
    /// ones.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true when no slots are held.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[async_trait]
impl DecisionCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();

        if let Some(slot) = self.map.get(key) {
            if !slot.is_expired(now) {
                if let Slot::Text(s) = &slot.value {
                    return Ok(Some(s.clone()));
                }
                return Ok(None);
            }
        } else {
            return Ok(None);
        }

        // Lazy reclamation of the expired slot.
        self.map.remove_if(key, |_, slot| slot.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.map.insert(
            key.to_string(),
            CacheSlot {
                value: Slot::Text(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut written = false;

        let mut slot = self.map.entry(key.to_string()).or_insert_with(|| {
            written = true;
            CacheSlot {
                value: Slot::Text(value.to_string()),
                expires_at: now + ttl,
            }
        });

        if !written && slot.is_expired(now) {
            *slot = CacheSlot {
                value: Slot::Text(value.to_string()),
                expires_at: now + ttl,
            };
            written = true;
        }

        Ok(written)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut slot = self.map.entry(key.to_string()).or_insert(CacheSlot {
            value: Slot::Counter(0),
            expires_at: now + ttl,
        });

        if slot.is_expired(now) {
            *slot = CacheSlot {
                value: Slot::Counter(0),
                expires_at: now + ttl,
            };
        }

        let next = match slot.value {
            Slot::Counter(n) => n + 1,
            // A text slot reused as a counter restarts the count.
            Slot::Text(_) => 1,
        };
        slot.value = Slot::Counter(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decision_literals() {
        assert_eq!(Decision::Blocked.as_str(), "blocked");
        assert_eq!(Decision::Allowed.as_str(), "allowed");
        assert_eq!(Decision::from_cached("blocked"), Some(Decision::Blocked));
        assert_eq!(Decision::from_cached("bogus"), None);
        assert_eq!(decision_key("ads.example"), "domain:ads.example");
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set("domain:ads.example", "blocked", Duration::from_secs(60))
            .await
            .unwrap();

        let value = cache.get("domain:ads.example").await.unwrap();
        assert_eq!(value.as_deref(), Some("blocked"));

        assert!(cache.get("domain:other.example").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_reclaimed() {
        let cache = MemoryCache::new();
        cache
            .set("domain:x.example", "allowed", Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.get("domain:x.example").await.unwrap().is_none());
        // Reclaimed on that access.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_immediately_absent() {
        let cache = MemoryCache::new();
        cache
            .set("domain:x.example", "blocked", Duration::ZERO)
            .await
            .unwrap();

        // now >= expires_at at the expiry instant itself.
        assert!(cache.get("domain:x.example").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = MemoryCache::new();
        cache
            .set("k", "blocked", Duration::from_secs(60))
            .await
            .unwrap();
        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let cache = MemoryCache::new();

        assert!(cache
            .set_if_absent("k", "blocked", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!cache
            .set_if_absent("k", "allowed", Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("blocked"));
    }

    #[tokio::test]
    async fn test_set_if_absent_replaces_expired() {
        let cache = MemoryCache::new();
        cache
            .set("k", "blocked", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(cache
            .set_if_absent("k", "allowed", Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("allowed"));
    }

    #[tokio::test]
    async fn test_incr_with_expiry() {
        let cache = MemoryCache::new();

        assert_eq!(
            cache
                .incr_with_expiry("rate:10.0.0.1", Duration::from_secs(1))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            cache
                .incr_with_expiry("rate:10.0.0.1", Duration::from_secs(1))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_incr_restarts_after_expiry() {
        let cache = MemoryCache::new();
        cache
            .incr_with_expiry("rate:x", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            cache
                .incr_with_expiry("rate:x", Duration::from_secs(1))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_ttl_policy() {
        assert_eq!(Decision::Blocked.ttl(), Duration::from_secs(3600));
        assert_eq!(Decision::Allowed.ttl(), Duration::from_secs(1800));
    }
}
