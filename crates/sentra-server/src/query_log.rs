//! Async query-log sink.
//!
//! Handlers hand records to a bounded channel and move on; a single
//! background writer drains it into the store. Under overload the channel
//! fills and records are dropped and counted, so the resolver never waits
//! on its own log. Ordering is whatever the channel yields; timestamps
//! are the authoritative order.

use sentra_metrics::metrics;
use sentra_store::{QueryRecord, ThreatStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default channel capacity used by the daemons.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Non-blocking front end of the query log.
#[derive(Clone)]
pub struct QueryLogSink {
    tx: mpsc::Sender<QueryRecord>,
}

impl QueryLogSink {
    /// Spawns the background writer and returns the sink handle.
    ///
    /// The writer stops once every sink clone is dropped and the channel
    /// drains.
    pub fn spawn(store: Arc<dyn ThreatStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueryRecord>(capacity);

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = store.append_query_log(&record).await {
                    warn!(domain = %record.domain, error = %e, "query log write failed");
                }
            }
            debug!("query log writer stopped");
        });

        Self { tx }
    }

    /// Enqueues a record; drops it (counted) when the channel is full or
    /// the writer is gone.
    pub fn log(&self, record: QueryRecord) {
        if self.tx.try_send(record).is_err() {
            metrics().record_log_drop();
        }
    }
}
