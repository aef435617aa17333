//! SQLite-backed threat store.
//!
//! One connection guarded by a mutex, queries dispatched through
//! `spawn_blocking` so the async handlers never park on storage I/O.
//! Timestamps are stored as epoch seconds.

use crate::{
    cutoff_epoch, QueryRecord, Result, StoreError, ThreatEntry, ThreatMatch, ThreatStats,
    ThreatStore, ThreatType, UpsertOutcome, FRESHNESS_WINDOW,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS threat_domains (
    id               INTEGER PRIMARY KEY,
    domain           TEXT NOT NULL UNIQUE,
    threat_type      TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    source           TEXT NOT NULL,
    first_seen       INTEGER NOT NULL,
    last_seen        INTEGER NOT NULL,
    is_active        INTEGER NOT NULL DEFAULT 1,
    metadata         TEXT NOT NULL DEFAULT '{}',
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_threat_domains_updated_at
    ON threat_domains (updated_at);

CREATE TABLE IF NOT EXISTS dns_logs (
    id            INTEGER PRIMARY KEY,
    domain        TEXT NOT NULL,
    query_type    TEXT NOT NULL,
    response_type TEXT NOT NULL,
    threat_type   TEXT,
    client_addr   TEXT NOT NULL,
    response_ms   INTEGER,
    timestamp     INTEGER NOT NULL
);
";

const UPSERT_SQL: &str = "
INSERT INTO threat_domains
    (domain, threat_type, confidence_score, source, first_seen, last_seen,
     is_active, metadata, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8)
ON CONFLICT (domain) DO UPDATE SET
    confidence_score = MAX(threat_domains.confidence_score, excluded.confidence_score),
    threat_type      = excluded.threat_type,
    source           = CASE WHEN excluded.source != ''
                            THEN excluded.source
                            ELSE threat_domains.source END,
    last_seen        = MAX(threat_domains.last_seen, excluded.last_seen),
    is_active        = 1,
    metadata         = excluded.metadata,
    updated_at       = excluded.updated_at
";

/// SQLite implementation of [`ThreatStore`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (and migrates) the database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // journal_mode returns the resulting mode as a row, so it cannot
        // go through execute_batch.
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!("threat database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the connection inside `spawn_blocking`.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let out = tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await??;
        Ok(out)
    }
}

#[async_trait]
impl ThreatStore for SqliteStore {
    async fn lookup_active(&self, domain: &str) -> Result<Option<ThreatMatch>> {
        let domain = domain.to_string();
        let fresh_after = cutoff_epoch(Utc::now(), FRESHNESS_WINDOW);

        self.blocking(move |conn| {
            conn.query_row(
                "SELECT threat_type, confidence_score
                 FROM threat_domains
                 WHERE domain = ?1 AND updated_at > ?2
                 ORDER BY confidence_score DESC
                 LIMIT 1",
                params![domain, fresh_after],
                |row| {
                    let type_name: String = row.get(0)?;
                    let confidence: f64 = row.get(1)?;
                    Ok((type_name, confidence))
                },
            )
            .optional()
        })
        .await
        .map(|row| {
            row.and_then(|(type_name, confidence)| {
                // Unknown type names (from a newer schema, say) behave as absent.
                ThreatType::from_str_opt(&type_name).map(|threat_type| ThreatMatch {
                    threat_type,
                    confidence,
                })
            })
        })
    }

    async fn bulk_upsert(&self, entries: &[ThreatEntry]) -> Result<UpsertOutcome> {
        if entries.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let entries = entries.to_vec();
        let now = Utc::now().timestamp();

        let outcome = self
            .blocking(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let mut outcome = UpsertOutcome::default();

                {
                    let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
                    for entry in &entries {
                        if entry.domain.is_empty() {
                            outcome.skipped += 1;
                            continue;
                        }
                        let metadata = serde_json::to_string(&entry.metadata)
                            .unwrap_or_else(|_| "{}".to_string());
                        let result = stmt.execute(params![
                            entry.domain,
                            entry.threat_type.as_str(),
                            entry.normalized_confidence(),
                            entry.source,
                            entry.first_seen.timestamp(),
                            entry.last_seen.timestamp(),
                            metadata,
                            now,
                        ]);
                        match result {
                            Ok(_) => outcome.upserted += 1,
                            Err(e) => {
                                warn!(domain = %entry.domain, source = %entry.source,
                                      error = %e, "skipping threat row");
                                outcome.skipped += 1;
                            }
                        }
                    }
                }

                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        debug!(
            upserted = outcome.upserted,
            skipped = outcome.skipped,
            "bulk upsert committed"
        );
        Ok(outcome)
    }

    async fn stats(&self) -> Result<ThreatStats> {
        let day_ago = cutoff_epoch(Utc::now(), Duration::from_secs(24 * 60 * 60));

        self.blocking(move |conn| {
            let mut stats = ThreatStats {
                total: conn.query_row("SELECT COUNT(*) FROM threat_domains", [], |r| r.get(0))?,
                recent_24h: conn.query_row(
                    "SELECT COUNT(*) FROM threat_domains WHERE created_at > ?1",
                    params![day_ago],
                    |r| r.get(0),
                )?,
                ..Default::default()
            };

            let mut stmt = conn
                .prepare("SELECT threat_type, COUNT(*) FROM threat_domains GROUP BY threat_type")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?;
            for row in rows {
                let (threat_type, count) = row?;
                stats.by_type.insert(threat_type, count);
            }

            let mut stmt = conn.prepare(
                "SELECT source, COUNT(*) AS n FROM threat_domains
                 GROUP BY source ORDER BY n DESC LIMIT 10",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?;
            for row in rows {
                stats.by_source.push(row?);
            }

            Ok(stats)
        })
        .await
    }

    async fn cleanup(&self, max_age: Duration) -> Result<u64> {
        let cutoff = cutoff_epoch(Utc::now(), max_age);
        let deleted = self
            .blocking(move |conn| {
                conn.execute(
                    "DELETE FROM threat_domains WHERE updated_at < ?1",
                    params![cutoff],
                )
            })
            .await? as u64;

        info!(deleted, "cleaned up aged threat rows");
        Ok(deleted)
    }

    async fn append_query_log(&self, record: &QueryRecord) -> Result<()> {
        let record = record.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO dns_logs
                     (domain, query_type, response_type, threat_type,
                      client_addr, response_ms, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.domain,
                    record.qtype,
                    record.decision.as_str(),
                    record.threat_type,
                    record.client_addr,
                    record.response_ms,
                    record.timestamp.timestamp(),
                ],
            )
            .map(|_| ())
        })
        .await
    }
}
