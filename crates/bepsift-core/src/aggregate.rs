//! Bounded failure aggregation.
//!
//! [`FailureAggregator`] consumes classified failures in stream order and
//! builds the final [`FailureSet`]: messages truncated once, duplicates
//! dropped, and the set capped while counting continues past the cap.

use crate::classify::{find_location, ClassifiedFailure};
use crate::config::AnalyzerConfig;
use serde::Serialize;
use std::collections::HashSet;
use tracing::trace;

/// Appended to every message that was cut
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Cuts `message` to at most `max_chars` characters and then `max_lines`
/// lines, appending [`TRUNCATION_MARKER`] if anything was removed.
///
/// The marker itself is not counted against either limit. Applying the
/// function to its own output returns that output unchanged.
pub fn truncate_message(message: &str, max_chars: usize, max_lines: usize) -> String {
    let (body, already_cut) = match message.strip_suffix(TRUNCATION_MARKER) {
        Some(body) => (body, true),
        None => (message, false),
    };

    let mut cut = body;
    if let Some((idx, _)) = cut.char_indices().nth(max_chars) {
        cut = &cut[..idx];
    }
    if let Some((idx, _)) = cut.match_indices('\n').nth(max_lines.saturating_sub(1)) {
        cut = &cut[..idx];
    }
    if max_lines == 0 {
        cut = "";
    }

    if already_cut || cut.len() < body.len() {
        format!("{}{}", cut, TRUNCATION_MARKER)
    } else {
        body.to_string()
    }
}

/// The capped, deduplicated result of a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureSet {
    /// Distinct failures encountered, including those past the cap
    pub total_failures_seen: usize,
    /// Number of entries kept
    pub failures_kept: usize,
    /// True if distinct failures were dropped by the cap
    pub truncated: bool,
    /// Kept failures in encounter order
    #[serde(rename = "failures")]
    pub entries: Vec<ClassifiedFailure>,
}

impl FailureSet {
    /// Returns true if nothing was kept
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the kept failures
    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedFailure> {
        self.entries.iter()
    }
}

/// Streaming deduplicator and cap for classified failures
#[derive(Debug)]
pub struct FailureAggregator {
    max_failures: usize,
    max_message_size: usize,
    max_error_lines: usize,
    seen: HashSet<blake3::Hash>,
    entries: Vec<ClassifiedFailure>,
    duplicates: usize,
}

impl FailureAggregator {
    /// Creates an empty aggregator bound by the config's limits
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            max_failures: config.max_failures,
            max_message_size: config.max_message_size,
            max_error_lines: config.max_error_lines,
            seen: HashSet::new(),
            entries: Vec::new(),
            duplicates: 0,
        }
    }

    /// Adds one failure. Returns true if it was kept.
    ///
    /// A failure is truncated at most once. When its message is cut, the
    /// location is looked up again so that it always points into the text
    /// that is kept.
    pub fn push(&mut self, mut failure: ClassifiedFailure) -> bool {
        if !failure.message_truncated {
            let cut = truncate_message(&failure.message, self.max_message_size, self.max_error_lines);
            if cut != failure.message {
                failure.message = cut;
                failure.message_truncated = true;
                failure.location = find_location(&failure.message);
            }
        }

        if !self.seen.insert(dedup_key(&failure.target_label, &failure.message)) {
            self.duplicates += 1;
            trace!("Duplicate failure for {} dropped", failure.target_label);
            return false;
        }

        if self.entries.len() >= self.max_failures {
            trace!("Failure cap reached, counting {} only", failure.target_label);
            return false;
        }

        self.entries.push(failure);
        true
    }

    /// Distinct failures seen so far
    pub fn total_seen(&self) -> usize {
        self.seen.len()
    }

    /// Failures dropped as exact duplicates
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Finishes aggregation
    pub fn finish(self) -> FailureSet {
        let total_failures_seen = self.seen.len();
        let failures_kept = self.entries.len();

        FailureSet {
            total_failures_seen,
            failures_kept,
            truncated: total_failures_seen > failures_kept,
            entries: self.entries,
        }
    }
}

/// Digest of the label and message, with a separator that cannot appear in a label
fn dedup_key(label: &str, message: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(label.as_bytes());
    hasher.update(&[0]);
    hasher.update(message.as_bytes());
    hasher.finalize()
}
