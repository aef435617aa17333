//! DNS record classes.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// DNS record class (RFC 1035 section 3.2.4).
///
/// Practically everything is `IN`; the others exist so queries using them
/// are at least representable.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u16)]
pub enum RecordClass {
    /// Internet.
    IN = 1,

    /// CHAOS (used by some servers for `version.bind` queries).
    CH = 3,

    /// Hesiod.
    HS = 4,

    /// Query-only: no class (RFC 2136).
    NONE = 254,

    /// Query-only: any class.
    ANY = 255,
}

impl RecordClass {
    /// Returns the numeric value.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Creates a class from its numeric value.
    #[inline]
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// Returns the conventional mnemonic.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::IN => "IN",
            Self::CH => "CH",
            Self::HS => "HS",
            Self::NONE => "NONE",
            Self::ANY => "ANY",
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A record class as it appears on the wire: known or opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    /// A class from the registry.
    Known(RecordClass),

    /// Any other class code, preserved verbatim.
    Unknown(u16),
}

impl Class {
    /// Creates a `Class` from a wire value.
    #[inline]
    pub fn from_u16(value: u16) -> Self {
        match RecordClass::from_u16(value) {
            Some(rc) => Self::Known(rc),
            None => Self::Unknown(value),
        }
    }

    /// Returns the wire value.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::Known(rc) => rc.to_u16(),
            Self::Unknown(v) => v,
        }
    }

    /// Returns the known class, if any.
    #[inline]
    pub const fn as_known(self) -> Option<RecordClass> {
        match self {
            Self::Known(rc) => Some(rc),
            Self::Unknown(_) => None,
        }
    }
}

impl From<RecordClass> for Class {
    fn from(rc: RecordClass) -> Self {
        Self::Known(rc)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(rc) => write!(f, "{rc}"),
            Self::Unknown(v) => write!(f, "CLASS{v}"),
        }
    }
}
