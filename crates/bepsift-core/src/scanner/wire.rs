//! Low-level protobuf wire format parsing.
//!
//! This module walks protobuf wire format without a compiled schema. It
//! knows nothing about BEP messages; it only splits bytes into
//! `(field number, wire type, payload)` triples and refuses anything it
//! cannot bound.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 5: I32 (fixed32, sfixed32, float)
//!
//! Group wire types (3 and 4) are deprecated and never appear in BEP; they
//! are rejected along with the unassigned codes 6 and 7.

use crate::config::MAX_VARINT_BYTES;
use crate::error::{Error, Result};
use regex::Regex;
use std::borrow::Cow;
use std::io::{ErrorKind, Read};
use std::sync::OnceLock;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    Fixed64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    LengthDelimited = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    Fixed32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::Fixed32),
            _ => Err(Error::invalid_wire_format(
                0,
                format!("unknown wire type: {}", value),
            )),
        }
    }
}

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_VALID_NUMBER: u32 = 536_870_911;

/// Decode a varint from the given bytes.
///
/// At most `max_bytes` bytes (never more than 10) may be consumed. Returns
/// the decoded value and the number of bytes consumed. Encodings that need
/// more bytes, or whose tenth byte would push the value past 64 bits, are
/// rejected rather than wrapped. Error offsets are relative to `data`.
pub fn decode_varint(data: &[u8], max_bytes: usize) -> Result<(u64, usize)> {
    let limit = max_bytes.clamp(1, MAX_VARINT_BYTES);
    let mut result: u64 = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= limit {
            return Err(Error::varint_overlong(0));
        }

        let payload = (byte & 0x7F) as u64;
        if i == MAX_VARINT_BYTES - 1 && payload > 1 {
            return Err(Error::varint_overlong(0));
        }

        result |= payload << (7 * i);

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    if data.len() >= limit {
        Err(Error::varint_overlong(0))
    } else {
        Err(Error::varint_truncated(0))
    }
}

/// Read one varint from a byte source.
///
/// Returns `Ok(None)` when the source is exhausted before the first byte,
/// which marks a clean end of stream. Running out after the first byte is a
/// truncated varint.
pub fn read_varint<R: Read>(reader: &mut R, max_bytes: usize) -> Result<Option<(u64, usize)>> {
    let limit = max_bytes.clamp(1, MAX_VARINT_BYTES);
    let mut buf = [0u8; MAX_VARINT_BYTES];
    let mut len = 0;

    loop {
        let mut byte = [0u8; 1];
        match reader.read(&mut byte) {
            Ok(0) if len == 0 => return Ok(None),
            Ok(0) => return Err(Error::varint_truncated(0)),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }

        buf[len] = byte[0];
        len += 1;

        if byte[0] & 0x80 == 0 || len == limit {
            return decode_varint(&buf[..len], limit).map(Some);
        }
    }
}

/// One decoded wire-format element, borrowed from the record bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireField<'a> {
    /// Field number from the tag
    pub field_number: u32,
    /// Wire type from the tag
    pub wire_type: WireType,
    /// Payload bytes (the value for fixed types and varints, the body for LEN)
    pub raw: &'a [u8],
    /// Offset of the tag within the buffer being walked
    pub offset: usize,
}

impl<'a> WireField<'a> {
    /// Returns the payload as text if it is printable UTF-8
    pub fn as_str(&self) -> Option<&'a str> {
        match self.wire_type {
            WireType::LengthDelimited => printable_text(self.raw),
            _ => None,
        }
    }

    /// Returns the numeric value of a varint field
    pub fn as_varint(&self) -> Option<u64> {
        match self.wire_type {
            WireType::Varint => decode_varint(self.raw, MAX_VARINT_BYTES)
                .ok()
                .map(|(value, _)| value),
            _ => None,
        }
    }
}

/// Iterator over the fields of one wire-format message.
///
/// Yields an error for the first malformed field and then stops.
#[derive(Debug, Clone)]
pub struct FieldIter<'a> {
    data: &'a [u8],
    position: usize,
    max_varint_bytes: usize,
    done: bool,
}

impl<'a> FieldIter<'a> {
    /// Creates an iterator over `data` using the given varint byte cap
    pub fn new(data: &'a [u8], max_varint_bytes: usize) -> Self {
        Self {
            data,
            position: 0,
            max_varint_bytes,
            done: false,
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Varints inside a record only ever corrupt that record
    fn varint_at(&self, at: usize) -> Result<(u64, usize)> {
        decode_varint(&self.data[at..], self.max_varint_bytes).map_err(|e| match e {
            Error::MalformedVarint { offset, truncated } => Error::invalid_wire_format(
                offset + at,
                if truncated { "truncated varint" } else { "overlong varint" },
            ),
            other => other,
        })
    }

    fn next_field(&mut self) -> Result<WireField<'a>> {
        let start = self.position;

        // Decode the tag (varint containing field number and wire type)
        let (tag, tag_len) = self.varint_at(start)?;

        let wire_type = WireType::try_from((tag & 0x07) as u8)
            .map_err(|_| Error::invalid_wire_format(start, format!("unknown wire type {}", tag & 0x07)))?;
        let field_number = tag >> 3;

        if field_number == 0 || field_number > MAX_VALID_NUMBER as u64 {
            return Err(Error::invalid_wire_format(
                start,
                format!("invalid field number {}", field_number),
            ));
        }

        let value_start = start + tag_len;
        let remaining = self.data.len() - value_start;

        let (payload_start, payload_len) = match wire_type {
            WireType::Varint => {
                let (_, varint_len) = self.varint_at(value_start)?;
                (value_start, varint_len)
            }
            WireType::Fixed64 => (value_start, 8),
            WireType::Fixed32 => (value_start, 4),
            WireType::LengthDelimited => {
                let (length, length_len) = self.varint_at(value_start)?;
                let available = (remaining - length_len) as u64;
                if length > available {
                    return Err(Error::invalid_wire_format(
                        value_start,
                        format!(
                            "not enough bytes for LEN field (need {}, have {})",
                            length, available
                        ),
                    ));
                }
                (value_start + length_len, length as usize)
            }
            WireType::StartGroup | WireType::EndGroup => {
                return Err(Error::invalid_wire_format(start, "group wire types are not supported"));
            }
        };

        let end = payload_start + payload_len;
        if end > self.data.len() {
            return Err(Error::invalid_wire_format(
                value_start,
                format!("not enough bytes for {:?} field", wire_type),
            ));
        }

        self.position = end;

        Ok(WireField {
            field_number: field_number as u32,
            wire_type,
            raw: &self.data[payload_start..end],
            offset: start,
        })
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<WireField<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.position >= self.data.len() {
            return None;
        }

        let field = self.next_field();
        if field.is_err() {
            self.done = true;
        }
        Some(field)
    }
}

/// Returns the bytes as text if they look like a human-readable string.
///
/// The bytes must be valid UTF-8, contain at least one alphanumeric char,
/// and contain no control characters besides tab, CR and LF once ANSI
/// escape sequences are set aside. The first visible char may not be a
/// control character at all: a length-delimited payload that starts with
/// one is almost always an embedded message tag.
pub fn printable_text(bytes: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(bytes).ok()?;
    let visible = strip_ansi(text);

    let mut chars = visible.chars();
    let first = chars.next()?;
    if first.is_control() {
        return None;
    }

    let mut has_alphanumeric = first.is_alphanumeric();
    for c in chars {
        if c.is_control() && !matches!(c, '\t' | '\n' | '\r') {
            return None;
        }
        has_alphanumeric |= c.is_alphanumeric();
    }

    has_alphanumeric.then_some(text)
}

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("ANSI pattern is valid"))
}

/// Removes terminal color and cursor sequences (`ESC [ ... m` and friends)
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    if !text.contains('\x1b') {
        return Cow::Borrowed(text);
    }
    ansi_regex().replace_all(text, "")
}
