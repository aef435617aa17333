//! DNS resource records.

use crate::class::{Class, RecordClass};
use crate::error::{Error, Result};
use crate::name::{Name, NameParser};
use crate::rdata::RData;
use crate::rtype::{RecordType, Type};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single resource record: name, type, class, TTL, RDATA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRecord {
    name: Name,
    rtype: Type,
    rclass: Class,
    ttl: u32,
    rdata: RData,
}

impl ResourceRecord {
    /// Creates a resource record.
    pub fn new(name: Name, rtype: Type, rclass: Class, ttl: u32, rdata: RData) -> Self {
        Self {
            name,
            rtype,
            rclass,
            ttl,
            rdata,
        }
    }

    /// Creates an IN A record.
    pub fn a(name: Name, ttl: u32, addr: std::net::Ipv4Addr) -> Self {
        Self::new(
            name,
            Type::Known(RecordType::A),
            Class::Known(RecordClass::IN),
            ttl,
            RData::A(addr),
        )
    }

    /// Creates an IN AAAA record.
    pub fn aaaa(name: Name, ttl: u32, addr: std::net::Ipv6Addr) -> Self {
        Self::new(
            name,
            Type::Known(RecordType::AAAA),
            Class::Known(RecordClass::IN),
            ttl,
            RData::Aaaa(addr),
        )
    }

    /// Creates an IN CNAME record.
    pub fn cname(name: Name, ttl: u32, target: Name) -> Self {
        Self::new(
            name,
            Type::Known(RecordType::CNAME),
            Class::Known(RecordClass::IN),
            ttl,
            RData::Cname(target),
        )
    }

    /// Returns the record owner name.
    #[inline]
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Returns the record type.
    #[inline]
    pub fn rtype(&self) -> Type {
        self.rtype
    }

    /// Returns the record type if known.
    #[inline]
    pub fn record_type(&self) -> Option<RecordType> {
        self.rtype.as_known()
    }

    /// Returns the record class.
    #[inline]
    pub fn rclass(&self) -> Class {
        self.rclass
    }

    /// Returns the TTL in seconds.
    #[inline]
    pub const fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Returns the record data.
    #[inline]
    pub fn rdata(&self) -> &RData {
        &self.rdata
    }

    /// Parses a record at `offset`; returns it and the bytes consumed.
    pub fn parse(data: &[u8], offset: usize) -> Result<(Self, usize)> {
        let parser = NameParser::new(data);
        let (name, name_len) = parser.parse_name(offset)?;

        let fixed = offset + name_len;
        let Some(bytes) = data.get(fixed..fixed + 10) else {
            return Err(Error::buffer_too_short(fixed + 10, data.len()));
        };

        let rtype = Type::from_u16(u16::from_be_bytes([bytes[0], bytes[1]]));
        let rclass = Class::from_u16(u16::from_be_bytes([bytes[2], bytes[3]]));
        let ttl = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let rdlength = u16::from_be_bytes([bytes[8], bytes[9]]);

        let rdata = RData::parse(rtype.as_known(), data, fixed + 10, rdlength)?;
        // Preserve the opaque type code for types parsed as Unknown.
        let rdata = match rdata {
            RData::Unknown { data, .. } => RData::Unknown {
                type_code: rtype.to_u16(),
                data,
            },
            other => other,
        };

        Ok((
            Self {
                name,
                rtype,
                rclass,
                ttl,
                rdata,
            },
            name_len + 10 + rdlength as usize,
        ))
    }

    /// Returns the wire-format length when re-encoded (uncompressed).
    pub fn wire_len(&self) -> usize {
        self.name.wire_len() + 10 + self.rdata.wire_len()
    }

    /// Appends the record to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        self.name.write_wire(buf);
        buf.extend_from_slice(&self.rtype.to_u16().to_be_bytes());
        buf.extend_from_slice(&self.rclass.to_u16().to_be_bytes());
        buf.extend_from_slice(&self.ttl.to_be_bytes());
        buf.extend_from_slice(&(self.rdata.wire_len() as u16).to_be_bytes());
        self.rdata.write_to(buf);
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.name, self.ttl, self.rclass, self.rtype, self.rdata
        )
    }
}

/// Sequential parser for a record section.
#[derive(Debug)]
pub struct RecordParser<'a> {
    data: &'a [u8],
    offset: usize,
    remaining: u16,
}

impl<'a> RecordParser<'a> {
    /// Creates a parser for `count` records starting at `offset`.
    #[inline]
    pub const fn new(data: &'a [u8], offset: usize, count: u16) -> Self {
        Self {
            data,
            offset,
            remaining: count,
        }
    }

    /// Returns the offset just past the last parsed record.
    #[inline]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Parses the next record, or `None` when the section is exhausted.
    pub fn next(&mut self) -> Result<Option<ResourceRecord>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let (record, consumed) = ResourceRecord::parse(self.data, self.offset)?;
        self.offset += consumed;
        self.remaining -= 1;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    #[test]
    fn test_record_roundtrip() {
        let record = ResourceRecord::a(
            Name::from_str("example.com").unwrap(),
            300,
            Ipv4Addr::new(192, 0, 2, 1),
        );

        let mut buf = BytesMut::new();
        record.write_to(&mut buf);
        assert_eq!(buf.len(), record.wire_len());

        let (parsed, consumed) = ResourceRecord::parse(&buf, 0).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_unknown_type_roundtrip() {
        // A TYPE65280 record with 4 opaque bytes.
        let name = Name::from_str("x.test").unwrap();
        let record = ResourceRecord::new(
            name,
            Type::Unknown(65280),
            Class::Known(RecordClass::IN),
            60,
            RData::Unknown {
                type_code: 65280,
                data: vec![1, 2, 3, 4],
            },
        );

        let mut buf = BytesMut::new();
        record.write_to(&mut buf);
        let (parsed, _) = ResourceRecord::parse(&buf, 0).unwrap();
        assert_eq!(parsed.rtype(), Type::Unknown(65280));
        assert_eq!(parsed.rdata(), record.rdata());
    }

    #[test]
    fn test_record_parser_counts() {
        let r1 = ResourceRecord::a(
            Name::from_str("a.test").unwrap(),
            60,
            Ipv4Addr::new(10, 0, 0, 1),
        );
        let r2 = ResourceRecord::a(
            Name::from_str("b.test").unwrap(),
            60,
            Ipv4Addr::new(10, 0, 0, 2),
        );

        let mut buf = BytesMut::new();
        r1.write_to(&mut buf);
        r2.write_to(&mut buf);

        let mut parser = RecordParser::new(&buf, 0, 2);
        assert_eq!(parser.next().unwrap().unwrap(), r1);
        assert_eq!(parser.next().unwrap().unwrap(), r2);
        assert!(parser.next().unwrap().is_none());
    }
}
