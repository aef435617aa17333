//! DNS record types.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record types this resolver understands in typed form.
///
/// Anything not listed here still round-trips through the wire codec as an
/// opaque [`Type::Unknown`] value; these are simply the types with dedicated
/// RDATA handling or query constructors.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u16)]
pub enum RecordType {
    /// IPv4 address.
    A = 1,

    /// Authoritative name server.
    NS = 2,

    /// Canonical name (alias).
    CNAME = 5,

    /// Start of authority.
    SOA = 6,

    /// Domain name pointer (reverse DNS).
    PTR = 12,

    /// Mail exchange.
    MX = 15,

    /// Text strings.
    TXT = 16,

    /// IPv6 address (RFC 3596).
    AAAA = 28,

    /// Service locator (RFC 2782).
    SRV = 33,

    /// EDNS OPT pseudo-record (RFC 6891). Carried opaquely.
    OPT = 41,

    /// HTTPS service binding (RFC 9460). Carried opaquely.
    HTTPS = 65,

    /// Query for any type.
    ANY = 255,
}

impl RecordType {
    /// Returns the numeric value.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Creates a record type from its numeric value.
    #[inline]
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// Returns the conventional upper-case mnemonic.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::SOA => "SOA",
            Self::PTR => "PTR",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::AAAA => "AAAA",
            Self::SRV => "SRV",
            Self::OPT => "OPT",
            Self::HTTPS => "HTTPS",
            Self::ANY => "ANY",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A record type as it appears on the wire: known or opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// A type with dedicated handling.
    Known(RecordType),

    /// Any other type code, preserved verbatim.
    Unknown(u16),
}

impl Type {
    /// Creates a `Type` from a wire value.
    #[inline]
    pub fn from_u16(value: u16) -> Self {
        match RecordType::from_u16(value) {
            Some(rt) => Self::Known(rt),
            None => Self::Unknown(value),
        }
    }

    /// Returns the wire value.
    #[inline]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::Known(rt) => rt.to_u16(),
            Self::Unknown(v) => v,
        }
    }

    /// Returns the known record type, if any.
    #[inline]
    pub const fn as_known(self) -> Option<RecordType> {
        match self {
            Self::Known(rt) => Some(rt),
            Self::Unknown(_) => None,
        }
    }
}

impl From<RecordType> for Type {
    fn from(rt: RecordType) -> Self {
        Self::Known(rt)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(rt) => write!(f, "{rt}"),
            Self::Unknown(v) => write!(f, "TYPE{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_values() {
        assert_eq!(RecordType::A.to_u16(), 1);
        assert_eq!(RecordType::AAAA.to_u16(), 28);
        assert_eq!(RecordType::ANY.to_u16(), 255);
    }

    #[test]
    fn test_type_roundtrip() {
        assert_eq!(Type::from_u16(1), Type::Known(RecordType::A));
        assert_eq!(Type::from_u16(1).to_u16(), 1);

        // RRSIG (46) has no typed handling here but must survive.
        assert_eq!(Type::from_u16(46), Type::Unknown(46));
        assert_eq!(Type::from_u16(46).to_u16(), 46);
    }

    #[test]
    fn test_type_display() {
        assert_eq!(Type::Known(RecordType::MX).to_string(), "MX");
        assert_eq!(Type::Unknown(46).to_string(), "TYPE46");
    }
}
