//! # Sentra DNS server
//!
//! The UDP front end of the filtering resolver. Each inbound message gets
//! its own handler task; handlers share state only through the decision
//! cache, the threat table, and the metrics registry. The query-log sink
//! is the one bounded queue in the system, and it sheds load by dropping
//! records rather than back-pressuring the request path.

#![warn(missing_docs)]
#![warn(clippy::all)]

use thiserror::Error;

pub mod handler;
pub mod query_log;
pub mod udp;

pub use handler::{FilterHandler, QueryContext, QueryHandler};
pub use query_log::QueryLogSink;
pub use udp::UdpServer;

/// Server error.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Socket-level failure (bind errors are fatal at startup).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
