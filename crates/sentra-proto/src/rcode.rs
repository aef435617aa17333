//! DNS response codes.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// DNS response code carried in the header RCODE field (RFC 1035, RFC 6895).
///
/// Only the 4-bit header range is modeled; extended rcodes require an EDNS
/// OPT record, which this forwarder carries opaquely.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum ResponseCode {
    /// No error condition.
    #[default]
    NoError = 0,

    /// The server could not interpret the query.
    FormErr = 1,

    /// The server failed to process the query.
    ServFail = 2,

    /// The queried name does not exist.
    NXDomain = 3,

    /// The server does not implement the requested operation.
    NotImp = 4,

    /// The server refuses to answer for policy reasons.
    Refused = 5,

    /// Name exists when it should not (RFC 2136).
    YXDomain = 6,

    /// RR set exists when it should not (RFC 2136).
    YXRRSet = 7,

    /// RR set that should exist does not (RFC 2136).
    NXRRSet = 8,

    /// Server not authoritative / not authorized (RFC 2136, RFC 8945).
    NotAuth = 9,

    /// Name not contained in zone (RFC 2136).
    NotZone = 10,
}

impl ResponseCode {
    /// Returns the numeric value.
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Creates a response code from its 4-bit header value.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::try_from(value & 0x0F).ok()
    }

    /// Returns true for NOERROR.
    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::NoError)
    }

    /// Returns true for NXDOMAIN.
    #[inline]
    pub const fn is_nxdomain(self) -> bool {
        matches!(self, Self::NXDomain)
    }

    /// Returns true for SERVFAIL.
    #[inline]
    pub const fn is_server_error(self) -> bool {
        matches!(self, Self::ServFail)
    }

    /// Returns the conventional upper-case name.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoError => "NOERROR",
            Self::FormErr => "FORMERR",
            Self::ServFail => "SERVFAIL",
            Self::NXDomain => "NXDOMAIN",
            Self::NotImp => "NOTIMP",
            Self::Refused => "REFUSED",
            Self::YXDomain => "YXDOMAIN",
            Self::YXRRSet => "YXRRSET",
            Self::NXRRSet => "NXRRSET",
            Self::NotAuth => "NOTAUTH",
            Self::NotZone => "NOTZONE",
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
