//! DNS wire format error types.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while parsing or serializing DNS messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer is too short to contain the expected data.
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort {
        /// Expected minimum size.
        expected: usize,
        /// Actual buffer size.
        actual: usize,
    },

    /// Ran off the end of the message while parsing.
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEof {
        /// Byte offset where the data ended.
        offset: usize,
    },

    /// Malformed data that does not fit the wire grammar.
    #[error("invalid data at offset {offset}: {message}")]
    InvalidData {
        /// Byte offset of the offending data.
        offset: usize,
        /// Description of the problem.
        message: String,
    },

    /// Label exceeds 63 bytes.
    #[error("label too long: {length} bytes exceeds maximum of 63")]
    LabelTooLong {
        /// Actual label length.
        length: usize,
    },

    /// Name exceeds 255 bytes in wire format.
    #[error("name too long: {length} bytes exceeds maximum of 255")]
    NameTooLong {
        /// Actual wire-format length.
        length: usize,
    },

    /// Character not allowed in a presentation-format label.
    #[error("invalid character '{character}' in label at position {position}")]
    InvalidLabelChar {
        /// The offending character.
        character: char,
        /// Its position within the label.
        position: usize,
    },

    /// Compression pointer that points forward or at itself.
    #[error("invalid compression pointer at offset {offset}: points to {target}")]
    InvalidCompressionPointer {
        /// Offset of the pointer.
        offset: usize,
        /// Offset the pointer references.
        target: usize,
    },

    /// More pointer jumps than any legitimate message needs.
    #[error("too many compression pointer jumps (>{max_jumps})")]
    TooManyCompressionJumps {
        /// The jump limit that was exceeded.
        max_jumps: usize,
    },

    /// Opcode value outside the known registry.
    #[error("invalid opcode: {value}")]
    InvalidOpCode {
        /// The unknown opcode value.
        value: u8,
    },

    /// Response code value outside the known registry.
    #[error("invalid response code: {value}")]
    InvalidResponseCode {
        /// The unknown rcode value.
        value: u8,
    },

    /// RDATA whose length does not match its type.
    #[error("invalid RDATA for {rtype}: {message}")]
    InvalidRData {
        /// Record type name.
        rtype: String,
        /// Description of the problem.
        message: String,
    },
}

impl Error {
    /// Creates a `BufferTooShort` error.
    #[inline]
    pub fn buffer_too_short(expected: usize, actual: usize) -> Self {
        Self::BufferTooShort { expected, actual }
    }

    /// Creates an `UnexpectedEof` error.
    #[inline]
    pub fn unexpected_eof(offset: usize) -> Self {
        Self::UnexpectedEof { offset }
    }

    /// Creates an `InvalidData` error.
    #[inline]
    pub fn invalid_data(offset: usize, message: impl Into<String>) -> Self {
        Self::InvalidData {
            offset,
            message: message.into(),
        }
    }

    /// Creates an `InvalidRData` error.
    #[inline]
    pub fn invalid_rdata(rtype: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRData {
            rtype: rtype.into(),
            message: message.into(),
        }
    }

    /// Returns true if the message is malformed and should simply be dropped.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::BufferTooShort { .. }
                | Self::UnexpectedEof { .. }
                | Self::InvalidData { .. }
                | Self::InvalidCompressionPointer { .. }
                | Self::TooManyCompressionJumps { .. }
        )
    }
}
