//! Complete DNS messages.

use crate::error::{Error, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::question::Question;
use crate::rcode::ResponseCode;
use crate::record::{RecordParser, ResourceRecord};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A DNS message: header, question section, and the three record sections.
///
/// OPT pseudo-records are not given special treatment; they live in the
/// additional section as opaque records and ride through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    header: Header,
    questions: Vec<Question>,
    answers: Vec<ResourceRecord>,
    authority: Vec<ResourceRecord>,
    additional: Vec<ResourceRecord>,
}

impl Message {
    /// Creates an empty message with the given header.
    pub fn new(header: Header) -> Self {
        Self {
            header,
            questions: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Creates a recursion-desired query with a random ID.
    pub fn query(question: Question) -> Self {
        let header = Header::query();
        Self {
            header,
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Creates a response skeleton from a query: ID and questions copied,
    /// RD echoed, QR set.
    pub fn response_from(query: &Message) -> Self {
        let header = Header::response_from(&query.header);
        Self {
            header,
            questions: query.questions.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Returns the header.
    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns a mutable reference to the header.
    #[inline]
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Returns the message ID.
    #[inline]
    pub fn id(&self) -> u16 {
        self.header.id
    }

    /// Sets the message ID.
    #[inline]
    pub fn set_id(&mut self, id: u16) {
        self.header.id = id;
    }

    /// Returns the response code.
    #[inline]
    pub fn rcode(&self) -> ResponseCode {
        self.header.rcode
    }

    /// Sets the response code.
    #[inline]
    pub fn set_rcode(&mut self, rcode: ResponseCode) {
        self.header.rcode = rcode;
    }

    /// Returns the question section.
    #[inline]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Returns the first question, if any.
    #[inline]
    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Returns the answer section.
    #[inline]
    pub fn answers(&self) -> &[ResourceRecord] {
        &self.answers
    }

    /// Returns the authority section.
    #[inline]
    pub fn authority(&self) -> &[ResourceRecord] {
        &self.authority
    }

    /// Returns the additional section.
    #[inline]
    pub fn additional(&self) -> &[ResourceRecord] {
        &self.additional
    }

    /// Adds a question.
    pub fn add_question(&mut self, question: Question) {
        self.questions.push(question);
        self.header.qd_count = self.questions.len() as u16;
    }

    /// Adds an answer record.
    pub fn add_answer(&mut self, record: ResourceRecord) {
        self.answers.push(record);
        self.header.an_count = self.answers.len() as u16;
    }

    /// Adds every record from an iterator to the answer section.
    pub fn add_answers(&mut self, records: impl IntoIterator<Item = ResourceRecord>) {
        self.answers.extend(records);
        self.header.an_count = self.answers.len() as u16;
    }

    /// Clears the answer section.
    pub fn clear_answers(&mut self) {
        self.answers.clear();
        self.header.an_count = 0;
    }

    /// Adds an authority record.
    pub fn add_authority(&mut self, record: ResourceRecord) {
        self.authority.push(record);
        self.header.ns_count = self.authority.len() as u16;
    }

    /// Adds an additional record.
    pub fn add_additional(&mut self, record: ResourceRecord) {
        self.additional.push(record);
        self.header.ar_count = self.additional.len() as u16;
    }

    /// Returns true for NOERROR with at least one answer.
    pub fn is_success(&self) -> bool {
        self.rcode().is_success() && !self.answers.is_empty()
    }

    /// Returns true for NXDOMAIN.
    pub fn is_nxdomain(&self) -> bool {
        self.rcode().is_nxdomain()
    }

    /// Returns true for SERVFAIL.
    pub fn is_servfail(&self) -> bool {
        self.rcode().is_server_error()
    }

    /// Returns true if the message is flagged truncated.
    pub fn is_truncated(&self) -> bool {
        self.header.is_truncated()
    }

    /// Parses a message from wire format.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::buffer_too_short(HEADER_SIZE, data.len()));
        }

        let header = Header::parse(data)?;
        let mut offset = HEADER_SIZE;

        let mut questions = Vec::with_capacity(header.qd_count as usize);
        for _ in 0..header.qd_count {
            let (q, consumed) = Question::parse(data, offset)?;
            questions.push(q);
            offset += consumed;
        }

        let mut answers = Vec::with_capacity(header.an_count as usize);
        let mut parser = RecordParser::new(data, offset, header.an_count);
        while let Some(r) = parser.next()? {
            answers.push(r);
        }
        offset = parser.offset();

        let mut authority = Vec::with_capacity(header.ns_count as usize);
        let mut parser = RecordParser::new(data, offset, header.ns_count);
        while let Some(r) = parser.next()? {
            authority.push(r);
        }
        offset = parser.offset();

        let mut additional = Vec::with_capacity(header.ar_count as usize);
        let mut parser = RecordParser::new(data, offset, header.ar_count);
        while let Some(r) = parser.next()? {
            additional.push(r);
        }

        Ok(Self {
            header,
            questions,
            answers,
            authority,
            additional,
        })
    }

    /// Returns the wire-format length when serialized.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE
            + self.questions.iter().map(Question::wire_len).sum::<usize>()
            + self
                .answers
                .iter()
                .chain(&self.authority)
                .chain(&self.additional)
                .map(ResourceRecord::wire_len)
                .sum::<usize>()
    }

    /// Appends the message to `buf` with section counts recomputed.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let mut header = self.header.clone();
        header.qd_count = self.questions.len() as u16;
        header.an_count = self.answers.len() as u16;
        header.ns_count = self.authority.len() as u16;
        header.ar_count = self.additional.len() as u16;
        header.write_to(buf);

        for q in &self.questions {
            q.write_to(buf);
        }
        for r in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
        {
            r.write_to(buf);
        }
    }

    /// Serializes the message to wire format.
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Trims records until the message fits in `max_size` bytes, setting
    /// the TC flag if anything was removed. Additional records go first,
    /// then authority, then answers.
    pub fn truncate_to(&mut self, max_size: usize) {
        let mut removed = false;
        while self.wire_len() > max_size {
            let popped = self
                .additional
                .pop()
                .or_else(|| self.authority.pop())
                .or_else(|| self.answers.pop());
            if popped.is_none() {
                break;
            }
            removed = true;
        }

        if removed {
            self.header.set_truncated(true);
        }
        self.header.an_count = self.answers.len() as u16;
        self.header.ns_count = self.authority.len() as u16;
        self.header.ar_count = self.additional.len() as u16;
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ";; {}", self.header)?;
        for q in &self.questions {
            writeln!(f, ";{q}")?;
        }
        for r in &self.answers {
            writeln!(f, "{r}")?;
        }
        Ok(())
    }
}
