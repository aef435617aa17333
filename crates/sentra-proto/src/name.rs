//! DNS domain names.
//!
//! Names are stored in uncompressed wire format: a sequence of
//! length-prefixed labels terminated by the zero-length root label.
//! Comparison and hashing are case-insensitive per RFC 1035, and parsing
//! from a message follows compression pointers (RFC 1035 section 4.1.4).

use crate::error::{Error, Result};
use crate::{MAX_LABEL_LENGTH, MAX_NAME_LENGTH};
use bytes::BytesMut;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Maximum compression pointer jumps before the parser gives up.
const MAX_COMPRESSION_JUMPS: usize = 64;

/// A DNS domain name in uncompressed wire format.
///
/// ```rust
/// use std::str::FromStr;
/// use sentra_proto::Name;
///
/// let name = Name::from_str("ads.example.com").unwrap();
/// assert_eq!(name.label_count(), 3);
/// assert_eq!(name.parent().unwrap().to_string(), "example.com.");
/// assert_eq!(name, Name::from_str("ADS.Example.COM.").unwrap());
/// ```
#[derive(Clone)]
pub struct Name {
    /// Wire bytes including the terminating root label.
    wire: SmallVec<[u8; 48]>,
}

impl Name {
    /// Creates the root name.
    #[inline]
    pub fn root() -> Self {
        Self {
            wire: SmallVec::from_slice(&[0]),
        }
    }

    /// Creates a name from uncompressed wire bytes, validating structure.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        validate_wire(bytes)?;
        Ok(Self {
            wire: SmallVec::from_slice(bytes),
        })
    }

    /// Returns the wire representation (always ends with the root label).
    #[inline]
    pub fn as_wire(&self) -> &[u8] {
        &self.wire
    }

    /// Returns the wire-format length including the terminating zero.
    #[inline]
    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

    /// Returns the number of labels, excluding the root.
    pub fn label_count(&self) -> usize {
        self.labels().count()
    }

    /// Returns true if this is the root name.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.wire.len() == 1
    }

    /// Iterates over the labels as byte slices, left to right, excluding
    /// the root label.
    pub fn labels(&self) -> LabelIter<'_> {
        LabelIter {
            wire: &self.wire,
            pos: 0,
        }
    }

    /// Returns the parent name with the leftmost label removed.
    ///
    /// Returns `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let skip = 1 + self.wire[0] as usize;
        Some(Self {
            wire: SmallVec::from_slice(&self.wire[skip..]),
        })
    }

    /// Returns true if `self` equals `other` or sits below it in the tree.
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        let mine: Vec<&[u8]> = self.labels().collect();
        let theirs: Vec<&[u8]> = other.labels().collect();
        if theirs.len() > mine.len() {
            return false;
        }
        mine.iter()
            .rev()
            .zip(theirs.iter().rev())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Returns an all-lowercase copy.
    #[must_use]
    pub fn lowercased(&self) -> Self {
        let mut copy = self.clone();
        copy.wire.iter_mut().for_each(u8::make_ascii_lowercase);
        copy
    }

    /// Renders the name without the trailing dot, lowercased.
    ///
    /// This is the canonical form used as a lookup key against the threat
    /// table and the decision cache. The root renders as an empty string.
    pub fn to_lookup_key(&self) -> CompactString {
        let mut out = CompactString::default();
        for label in self.labels() {
            if !out.is_empty() {
                out.push('.');
            }
            for &b in label {
                out.push(b.to_ascii_lowercase() as char);
            }
        }
        out
    }

    /// Writes the wire form into `buf`.
    pub fn write_wire(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.wire);
    }
}

/// Validates uncompressed wire bytes: label sizes, total length, and the
/// terminating root label.
fn validate_wire(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(Error::unexpected_eof(0));
    }
    if bytes.len() > MAX_NAME_LENGTH {
        return Err(Error::NameTooLong { length: bytes.len() });
    }

    let mut pos = 0;
    loop {
        let Some(&len) = bytes.get(pos) else {
            return Err(Error::unexpected_eof(pos));
        };
        if len == 0 {
            // Root label must be the final byte.
            if pos + 1 != bytes.len() {
                return Err(Error::invalid_data(pos, "data after root label"));
            }
            return Ok(());
        }
        if len as usize > MAX_LABEL_LENGTH {
            return Err(Error::LabelTooLong { length: len as usize });
        }
        pos += 1 + len as usize;
    }
}

/// Iterator over the labels of a name.
pub struct LabelIter<'a> {
    wire: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for LabelIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.wire.get(self.pos)? as usize;
        if len == 0 {
            return None;
        }
        let start = self.pos + 1;
        self.pos = start + len;
        self.wire.get(start..start + len)
    }
}

impl FromStr for Name {
    type Err = Error;

    /// Parses a name from dotted presentation format.
    ///
    /// A trailing dot is accepted and implied when absent. Labels may
    /// contain alphanumerics, `-`, `_`, and `*`.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s == "." {
            return Ok(Self::root());
        }

        let s = s.strip_suffix('.').unwrap_or(s);
        let mut wire = SmallVec::<[u8; 48]>::new();

        for part in s.split('.') {
            if part.is_empty() {
                return Err(Error::invalid_data(0, "empty label"));
            }
            if part.len() > MAX_LABEL_LENGTH {
                return Err(Error::LabelTooLong { length: part.len() });
            }
            for (i, c) in part.chars().enumerate() {
                if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '*' {
                    return Err(Error::InvalidLabelChar {
                        character: c,
                        position: i,
                    });
                }
            }
            wire.push(part.len() as u8);
            wire.extend_from_slice(part.as_bytes());
        }
        wire.push(0);

        if wire.len() > MAX_NAME_LENGTH {
            return Err(Error::NameTooLong { length: wire.len() });
        }

        Ok(Self { wire })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, ".");
        }
        for label in self.labels() {
            for &b in label {
                write!(f, "{}", b as char)?;
            }
            write!(f, ".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name(\"{self}\")")
    }
}

impl PartialEq for Name {
    /// Case-insensitive per DNS semantics.
    fn eq(&self, other: &Self) -> bool {
        self.wire.len() == other.wire.len()
            && self
                .wire
                .iter()
                .zip(other.wire.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for &b in &self.wire {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::root()
    }
}

impl Serialize for Name {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Reads domain names out of a DNS message, following compression pointers.
#[derive(Debug, Clone, Copy)]
pub struct NameParser<'a> {
    /// The complete message, needed to resolve pointers.
    message: &'a [u8],
}

impl<'a> NameParser<'a> {
    /// Creates a parser over the full message buffer.
    #[inline]
    pub const fn new(message: &'a [u8]) -> Self {
        Self { message }
    }

    /// Parses the name starting at `offset`.
    ///
    /// Returns the decompressed name and the number of bytes the name
    /// occupies at `offset` (a pointer counts as two bytes, regardless of
    /// how much it expands to).
    pub fn parse_name(&self, offset: usize) -> Result<(Name, usize)> {
        let mut wire = SmallVec::<[u8; 48]>::new();
        let mut pos = offset;
        let mut consumed = 0;
        let mut jumped = false;
        let mut jumps = 0;

        loop {
            let Some(&len) = self.message.get(pos) else {
                return Err(Error::unexpected_eof(pos));
            };

            // Compression pointer: top two bits set.
            if len & 0xC0 == 0xC0 {
                let Some(&low) = self.message.get(pos + 1) else {
                    return Err(Error::unexpected_eof(pos + 1));
                };
                let target = ((len as usize & 0x3F) << 8) | low as usize;
                if target >= pos {
                    return Err(Error::InvalidCompressionPointer {
                        offset: pos,
                        target,
                    });
                }
                if !jumped {
                    consumed = pos - offset + 2;
                    jumped = true;
                }
                jumps += 1;
                if jumps > MAX_COMPRESSION_JUMPS {
                    return Err(Error::TooManyCompressionJumps {
                        max_jumps: MAX_COMPRESSION_JUMPS,
                    });
                }
                pos = target;
                continue;
            }

            // 0x40/0x80 label types are reserved.
            if len & 0xC0 != 0 {
                return Err(Error::invalid_data(
                    pos,
                    format!("invalid label type 0x{len:02X}"),
                ));
            }

            if len == 0 {
                wire.push(0);
                if !jumped {
                    consumed = pos - offset + 1;
                }
                break;
            }

            let start = pos + 1;
            let end = start + len as usize;
            let Some(label) = self.message.get(start..end) else {
                return Err(Error::unexpected_eof(end));
            };
            if wire.len() + 1 + len as usize > MAX_NAME_LENGTH {
                return Err(Error::NameTooLong {
                    length: wire.len() + 1 + len as usize,
                });
            }
            wire.push(len);
            wire.extend_from_slice(label);
            pos = end;
        }

        Ok((Name { wire }, consumed))
    }
}
