//! DNS record data (RDATA).
//!
//! Typed variants cover the record types a forwarder actually inspects;
//! everything else is preserved as opaque bytes so upstream answers can be
//! relayed without loss. Name-bearing RDATA (NS, CNAME, PTR, SOA, MX) is
//! decompressed on parse and re-encoded uncompressed, which keeps the
//! rewritten RDLENGTH consistent.

use crate::error::{Error, Result};
use crate::name::{Name, NameParser};
use crate::rtype::RecordType;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// SOA record fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Soa {
    /// Primary name server.
    pub mname: Name,
    /// Responsible mailbox.
    pub rname: Name,
    /// Zone serial.
    pub serial: u32,
    /// Refresh interval (seconds).
    pub refresh: u32,
    /// Retry interval (seconds).
    pub retry: u32,
    /// Expire limit (seconds).
    pub expire: u32,
    /// Minimum / negative-caching TTL (seconds).
    pub minimum: u32,
}

/// Parsed record data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RData {
    /// IPv4 address.
    A(Ipv4Addr),

    /// IPv6 address.
    Aaaa(Ipv6Addr),

    /// Name server.
    Ns(Name),

    /// Canonical name.
    Cname(Name),

    /// Domain pointer.
    Ptr(Name),

    /// Mail exchange.
    Mx {
        /// Preference (lower wins).
        preference: u16,
        /// Exchange host.
        exchange: Name,
    },

    /// Start of authority.
    Soa(Soa),

    /// Text record: one or more character strings.
    Txt(Vec<Vec<u8>>),

    /// Any other record type, kept as raw bytes.
    Unknown {
        /// The record type code.
        type_code: u16,
        /// Raw RDATA bytes.
        data: Vec<u8>,
    },
}

impl RData {
    /// Parses RDATA of the given type.
    ///
    /// `data` is the whole message (for compression pointers); the RDATA
    /// itself spans `offset..offset + rdlength`.
    pub fn parse(
        rtype: Option<RecordType>,
        data: &[u8],
        offset: usize,
        rdlength: u16,
    ) -> Result<Self> {
        let end = offset + rdlength as usize;
        let Some(slice) = data.get(offset..end) else {
            return Err(Error::buffer_too_short(end, data.len()));
        };

        match rtype {
            Some(RecordType::A) => {
                let bytes: [u8; 4] = slice
                    .try_into()
                    .map_err(|_| Error::invalid_rdata("A", format!("rdlength {rdlength}")))?;
                Ok(Self::A(Ipv4Addr::from(bytes)))
            }
            Some(RecordType::AAAA) => {
                let bytes: [u8; 16] = slice
                    .try_into()
                    .map_err(|_| Error::invalid_rdata("AAAA", format!("rdlength {rdlength}")))?;
                Ok(Self::Aaaa(Ipv6Addr::from(bytes)))
            }
            Some(RecordType::NS) => Ok(Self::Ns(parse_single_name(data, offset)?)),
            Some(RecordType::CNAME) => Ok(Self::Cname(parse_single_name(data, offset)?)),
            Some(RecordType::PTR) => Ok(Self::Ptr(parse_single_name(data, offset)?)),
            Some(RecordType::MX) => {
                if slice.len() < 3 {
                    return Err(Error::invalid_rdata("MX", format!("rdlength {rdlength}")));
                }
                let preference = u16::from_be_bytes([slice[0], slice[1]]);
                let exchange = parse_single_name(data, offset + 2)?;
                Ok(Self::Mx {
                    preference,
                    exchange,
                })
            }
            Some(RecordType::SOA) => {
                let parser = NameParser::new(data);
                let (mname, mlen) = parser.parse_name(offset)?;
                let (rname, rlen) = parser.parse_name(offset + mlen)?;
                let fixed = offset + mlen + rlen;
                let Some(tail) = data.get(fixed..fixed + 20) else {
                    return Err(Error::buffer_too_short(fixed + 20, data.len()));
                };
                let word = |i: usize| {
                    u32::from_be_bytes([tail[i], tail[i + 1], tail[i + 2], tail[i + 3]])
                };
                Ok(Self::Soa(Soa {
                    mname,
                    rname,
                    serial: word(0),
                    refresh: word(4),
                    retry: word(8),
                    expire: word(12),
                    minimum: word(16),
                }))
            }
            Some(RecordType::TXT) => {
                let mut strings = Vec::new();
                let mut pos = 0;
                while pos < slice.len() {
                    let len = slice[pos] as usize;
                    let Some(s) = slice.get(pos + 1..pos + 1 + len) else {
                        return Err(Error::invalid_rdata("TXT", "string overruns rdata"));
                    };
                    strings.push(s.to_vec());
                    pos += 1 + len;
                }
                Ok(Self::Txt(strings))
            }
            other => Ok(Self::Unknown {
                type_code: other.map_or(0, RecordType::to_u16),
                data: slice.to_vec(),
            }),
        }
    }

    /// Returns the wire length of this RDATA when re-encoded.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::A(_) => 4,
            Self::Aaaa(_) => 16,
            Self::Ns(n) | Self::Cname(n) | Self::Ptr(n) => n.wire_len(),
            Self::Mx { exchange, .. } => 2 + exchange.wire_len(),
            Self::Soa(soa) => soa.mname.wire_len() + soa.rname.wire_len() + 20,
            Self::Txt(strings) => strings.iter().map(|s| 1 + s.len()).sum(),
            Self::Unknown { data, .. } => data.len(),
        }
    }

    /// Appends the RDATA to `buf`, uncompressed.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Self::A(addr) => buf.extend_from_slice(&addr.octets()),
            Self::Aaaa(addr) => buf.extend_from_slice(&addr.octets()),
            Self::Ns(n) | Self::Cname(n) | Self::Ptr(n) => n.write_wire(buf),
            Self::Mx {
                preference,
                exchange,
            } => {
                buf.extend_from_slice(&preference.to_be_bytes());
                exchange.write_wire(buf);
            }
            Self::Soa(soa) => {
                soa.mname.write_wire(buf);
                soa.rname.write_wire(buf);
                buf.extend_from_slice(&soa.serial.to_be_bytes());
                buf.extend_from_slice(&soa.refresh.to_be_bytes());
                buf.extend_from_slice(&soa.retry.to_be_bytes());
                buf.extend_from_slice(&soa.expire.to_be_bytes());
                buf.extend_from_slice(&soa.minimum.to_be_bytes());
            }
            Self::Txt(strings) => {
                for s in strings {
                    buf.extend_from_slice(&[s.len() as u8]);
                    buf.extend_from_slice(s);
                }
            }
            Self::Unknown { data, .. } => buf.extend_from_slice(data),
        }
    }

    /// Returns the address if this is an A record.
    pub fn as_a(&self) -> Option<Ipv4Addr> {
        match self {
            Self::A(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Returns the address if this is an AAAA record.
    pub fn as_aaaa(&self) -> Option<Ipv6Addr> {
        match self {
            Self::Aaaa(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Returns the target if this is a CNAME record.
    pub fn as_cname(&self) -> Option<&Name> {
        match self {
            Self::Cname(n) => Some(n),
            _ => None,
        }
    }
}

fn parse_single_name(data: &[u8], offset: usize) -> Result<Name> {
    NameParser::new(data).parse_name(offset).map(|(n, _)| n)
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(addr) => write!(f, "{addr}"),
            Self::Aaaa(addr) => write!(f, "{addr}"),
            Self::Ns(n) => write!(f, "{n}"),
            Self::Cname(n) => write!(f, "{n}"),
            Self::Ptr(n) => write!(f, "{n}"),
            Self::Mx {
                preference,
                exchange,
            } => write!(f, "{preference} {exchange}"),
            Self::Soa(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum
            ),
            Self::Txt(strings) => {
                for (i, s) in strings.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "\"{}\"", String::from_utf8_lossy(s))?;
                }
                Ok(())
            }
            // RFC 3597 presentation for opaque data.
            Self::Unknown { data, .. } => {
                write!(f, "\\# {}", data.len())?;
                for b in data {
                    write!(f, " {b:02x}")?;
                }
                Ok(())
            }
        }
    }
}
