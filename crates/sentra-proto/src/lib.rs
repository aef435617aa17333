//! # Sentra DNS Protocol Library
//!
//! DNS wire format types and parsing for the Sentra filtering resolver.
//!
//! The scope is deliberately that of a forwarder: full header/question
//! handling, compression-aware name decoding, and a compact set of typed
//! RDATA (A, AAAA, NS, CNAME, PTR, SOA, MX, TXT). Every other record type
//! is carried opaquely so upstream answers survive a parse/serialize round
//! trip unchanged.
//!
//! ## Example
//!
//! ```rust
//! use std::str::FromStr;
//! use sentra_proto::{Message, Name, Question};
//!
//! let query = Message::query(Question::a(Name::from_str("example.com.").unwrap()));
//! let wire = query.to_wire();
//! let parsed = Message::parse(&wire).unwrap();
//! assert_eq!(parsed.id(), query.id());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod class;
pub mod error;
pub mod header;
pub mod message;
pub mod name;
pub mod opcode;
pub mod question;
pub mod rcode;
pub mod rdata;
pub mod record;
pub mod rtype;

pub use class::{Class, RecordClass};
pub use error::{Error, Result};
pub use header::Header;
pub use message::Message;
pub use name::Name;
pub use opcode::OpCode;
pub use question::Question;
pub use rcode::ResponseCode;
pub use rdata::RData;
pub use record::ResourceRecord;
pub use rtype::{RecordType, Type};

/// Maximum length of a single DNS label (RFC 1035).
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum wire-format length of a domain name (RFC 1035).
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum UDP message size without EDNS (RFC 1035).
pub const MAX_UDP_MESSAGE_SIZE: usize = 512;

/// Well-known DNS port.
pub const DNS_PORT: u16 = 53;
