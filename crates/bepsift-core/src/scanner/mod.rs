//! Schema-less scanning of BEP events.
//!
//! This module pulls human-readable strings out of one event record without
//! knowing the event's message type. It never links against Bazel's
//! `.proto` definitions; every record is treated as a generic wire-format
//! blob.
//!
//! ## Algorithm Overview
//!
//! 1. Walk the record's fields with [`FieldIter`]
//! 2. Ignore varint and fixed-width fields
//! 3. For each length-delimited payload, keep it as a candidate string when
//!    it is printable UTF-8, otherwise try to parse it as an embedded
//!    message one level deeper and merge what that finds
//! 4. Stop at the first malformed field, keeping what was already collected
//!
//! Nesting is bounded by an explicit depth that is threaded through every
//! call, and the number of candidates per record is capped. Exceeding the
//! depth means "not a submessage"; it is never an error.
//!
//! Records that are printable text as a whole (for example JSON-encoded
//! events written by tooling) are scanned line by line instead.
//!
//! Terminal color sequences (`--color=yes` output) are stripped from every
//! candidate.

mod wire;

use crate::config::AnalyzerConfig;
use crate::error::Error;
use crate::stream::RawRecord;
use tracing::trace;

pub use wire::{
    decode_varint, printable_text, read_varint, strip_ansi, FieldIter, WireField, WireType,
    MAX_VALID_NUMBER,
};

/// A printable string found inside a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateString {
    /// The string, clipped to the configured length
    pub text: String,
    /// Ordinal of the record it came from
    pub record_index: usize,
    /// Number of the field that carried it (0 for text-mode lines)
    pub field_number: u32,
    /// Nesting depth of the owning message (0 = the record itself)
    pub depth: usize,
}

/// What scanning one record produced
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Candidate strings in scan order
    pub candidates: Vec<CandidateString>,
    /// The structural error that stopped the scan early, if any
    pub corruption: Option<Error>,
    /// True once the per-record candidate cap was reached
    pub capped: bool,
    /// True if the record was scanned as plain text
    pub text_mode: bool,
}

impl ScanOutcome {
    /// Returns true if the record stopped on malformed wire data
    pub fn is_corrupt(&self) -> bool {
        self.corruption.is_some()
    }
}

/// Candidate buffer with a hard capacity
#[derive(Debug)]
struct Collector {
    items: Vec<CandidateString>,
    limit: usize,
}

impl Collector {
    fn new(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            limit,
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.limit
    }

    fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.items.len())
    }

    fn push(&mut self, candidate: CandidateString) {
        if !self.is_full() {
            self.items.push(candidate);
        }
    }

    fn absorb(&mut self, other: Collector) {
        for candidate in other.items {
            self.push(candidate);
        }
    }
}

/// Walks records and collects candidate strings
#[derive(Debug, Clone)]
pub struct WireScanner {
    max_strings: usize,
    max_depth: usize,
    max_varint_bytes: usize,
    max_string_len: usize,
}

impl Default for WireScanner {
    fn default() -> Self {
        Self::new(&AnalyzerConfig::default())
    }
}

impl WireScanner {
    /// Creates a scanner bound by the given limits
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            max_strings: config.max_strings_per_event,
            max_depth: config.depth_limit(),
            max_varint_bytes: config.varint_limit(),
            max_string_len: config.max_string_len,
        }
    }

    /// Scans one record from the stream
    pub fn scan(&self, record: &RawRecord) -> ScanOutcome {
        self.scan_bytes(record.as_bytes(), record.index)
    }

    /// Scans raw record bytes tagged with the given ordinal
    pub fn scan_bytes(&self, data: &[u8], record_index: usize) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if data.is_empty() || self.max_strings == 0 {
            return outcome;
        }

        if let Some(text) = text_record(data) {
            if let Some(staged) = self.as_embedded_message(data, 0, record_index, self.max_strings) {
                outcome.candidates = staged.items;
            } else {
                outcome.text_mode = true;
                outcome.candidates = self.scan_text(text, record_index);
            }
            outcome.capped = outcome.candidates.len() >= self.max_strings;
            return outcome;
        }

        let mut collector = Collector::new(self.max_strings);
        if let Err(e) = self.scan_message(data, 0, record_index, &mut collector) {
            trace!(
                "Record {} abandoned after {} candidates: {}",
                record_index,
                collector.items.len(),
                e
            );
            outcome.corruption = Some(e);
        }

        outcome.capped = collector.is_full();
        outcome.candidates = collector.items;
        outcome
    }

    /// Splits a text record into one candidate per meaningful line
    fn scan_text(&self, text: &str, record_index: usize) -> Vec<CandidateString> {
        text.lines()
            .map(strip_ansi)
            .filter(|line| line.chars().any(char::is_alphanumeric))
            .take(self.max_strings)
            .map(|line| self.candidate(line.trim(), record_index, 0, 0))
            .collect()
    }

    /// Walks the fields of one message, stopping at the first malformed one
    fn scan_message(
        &self,
        data: &[u8],
        depth: usize,
        record_index: usize,
        out: &mut Collector,
    ) -> crate::Result<()> {
        for field in FieldIter::new(data, self.max_varint_bytes) {
            if out.is_full() {
                // Nothing more can be kept for this record
                return Ok(());
            }

            let field = field?;
            if field.wire_type == WireType::LengthDelimited {
                self.scan_payload(&field, depth, record_index, out);
            }
        }

        Ok(())
    }

    /// Interprets one length-delimited payload as a string or a submessage
    fn scan_payload(
        &self,
        field: &WireField<'_>,
        depth: usize,
        record_index: usize,
        out: &mut Collector,
    ) {
        let payload = field.raw;
        if payload.is_empty() {
            return;
        }

        if let Some(text) = printable_text(payload) {
            // Printable bytes can still be a well-formed message whose tag and
            // length bytes happen to be printable
            match self.as_embedded_message(payload, depth + 1, record_index, out.remaining()) {
                Some(staged) => out.absorb(staged),
                None => out.push(self.candidate(text, record_index, field.field_number, depth)),
            }
            return;
        }

        match self.try_submessage(payload, depth + 1, record_index, out.remaining()) {
            Some(staged) => out.absorb(staged),
            None => trace!(
                "Discarding field {} at offset {} (neither string nor message)",
                field.field_number,
                field.offset
            ),
        }
    }

    /// Accepts printable bytes as a message only if they start with a
    /// length-delimited tag and parse cleanly into at least one candidate
    fn as_embedded_message(
        &self,
        data: &[u8],
        depth: usize,
        record_index: usize,
        capacity: usize,
    ) -> Option<Collector> {
        let tag = *data.first()?;
        if tag & 0x07 != WireType::LengthDelimited as u8 || tag >> 3 == 0 {
            return None;
        }

        self.try_submessage(data, depth, record_index, capacity)
            .filter(|staged| !staged.items.is_empty())
    }

    /// Parses `data` as a nested message into a staging buffer.
    ///
    /// Returns `None` when the depth limit is exceeded or the bytes are not
    /// structurally valid; whatever was staged is then discarded.
    fn try_submessage(
        &self,
        data: &[u8],
        depth: usize,
        record_index: usize,
        capacity: usize,
    ) -> Option<Collector> {
        if depth > self.max_depth {
            trace!("Depth {} exceeds limit {}, not a submessage", depth, self.max_depth);
            return None;
        }

        let mut staged = Collector::new(capacity);
        self.scan_message(data, depth, record_index, &mut staged)
            .ok()
            .map(|()| staged)
    }

    fn candidate(
        &self,
        text: &str,
        record_index: usize,
        field_number: u32,
        depth: usize,
    ) -> CandidateString {
        let text = strip_ansi(text);
        CandidateString {
            text: clip_chars(&text, self.max_string_len).to_string(),
            record_index,
            field_number,
            depth,
        }
    }
}

/// A whole record that reads as text once leading whitespace is skipped
fn text_record(data: &[u8]) -> Option<&str> {
    let start = data.iter().position(|b| !b.is_ascii_whitespace())?;
    printable_text(&data[start..])?;
    std::str::from_utf8(data).ok()
}

/// Returns the longest prefix of `text` holding at most `max` chars
pub(crate) fn clip_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
