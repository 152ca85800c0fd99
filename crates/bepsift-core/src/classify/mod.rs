//! Failure classification.
//!
//! [`FailureClassifier`] looks at the candidate strings of one record and
//! decides whether the event reports a success, a failure, or nothing it can
//! be sure about. Only failures produce output, and a record maps to at most
//! one [`ClassifiedFailure`].
//!
//! ## Decision Policy
//!
//! - Explicit status signals (`FAILED`, `"reason": "BUILD_FAILED"`,
//!   `success: false`, ...) decide the outcome when present. A record that
//!   carries both success and failure signals is a failure.
//! - Without explicit status, failure words and console prefixes in the
//!   prose (`ERROR:`, `... error: ...`) mark a failure. Labels and paths
//!   are never prose, whatever words they contain.
//! - Anything else is ambiguous and skipped; the classifier never invents a
//!   failure.
//!
//! Messages are assembled here but not truncated; the aggregator applies
//! the size and line caps exactly once.

mod markers;
mod patterns;

use crate::scanner::CandidateString;
use markers::{explicit_signal, free_text_signal, is_option, FieldView, Signal};
use serde::Serialize;
use std::fmt;
use tracing::trace;

pub use patterns::{find_label, find_location, SourceLocation};

/// Label used when a failing record names no target
pub const UNKNOWN_TARGET: &str = "unknown target";

/// What kind of work failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// A target failed to build
    Build,
    /// A test failed
    Test,
    /// A failure without a recognizable build or test status
    Other,
}

impl FailureKind {
    /// Lowercase name used in rendered output
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Build => "build",
            FailureKind::Test => "test",
            FailureKind::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failing event, ready for aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedFailure {
    /// Bazel label of the failing target, or [`UNKNOWN_TARGET`]
    pub target_label: String,
    /// Build, test, or other
    pub kind: FailureKind,
    /// Diagnostic text
    pub message: String,
    /// First source location mentioned in the message as kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Ordinal of the record the failure came from
    pub record_index: usize,
    /// True once the aggregator cut the message to its size limits
    #[serde(skip_serializing_if = "is_false")]
    pub message_truncated: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Outcome of classifying one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The event reports success
    Success,
    /// The event carries no usable status
    Ambiguous,
    /// The event reports a failure
    Failure(ClassifiedFailure),
}

/// How a candidate is used once the record is known to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Status,
    Option,
    Label,
    Body,
}

/// Stateless record classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureClassifier;

impl FailureClassifier {
    /// Creates a classifier
    pub fn new() -> Self {
        Self
    }

    /// Classifies the candidate strings of one record
    pub fn classify(&self, candidates: &[CandidateString], record_index: usize) -> Classification {
        if candidates.is_empty() {
            return Classification::Ambiguous;
        }

        let views: Vec<FieldView<'_>> = candidates.iter().map(|c| FieldView::parse(&c.text)).collect();
        let mut roles = vec![Role::Body; candidates.len()];
        let mut explicit = Vec::new();
        let mut free_text = Vec::new();

        for (i, (candidate, view)) in candidates.iter().zip(&views).enumerate() {
            if is_option(&candidate.text) {
                roles[i] = Role::Option;
            } else if let Some(signal) = explicit_signal(view) {
                roles[i] = Role::Status;
                explicit.push(signal);
            } else if let Some(signal) = free_text_signal(&candidate.text) {
                free_text.push(signal);
            }
        }

        let signals = if explicit.is_empty() { free_text } else { explicit };
        let Some(first_failure) = signals.iter().find(|s| s.is_failure()) else {
            return if signals.is_empty() {
                trace!("Record {} is ambiguous", record_index);
                Classification::Ambiguous
            } else {
                Classification::Success
            };
        };

        let kind = failure_kind(&signals);
        let target_label = candidates
            .iter()
            .find_map(|c| find_label(&c.text))
            .unwrap_or(UNKNOWN_TARGET)
            .to_string();

        for (role, view) in roles.iter_mut().zip(&views) {
            if *role == Role::Body && view.message_text().trim() == target_label {
                *role = Role::Label;
            }
        }

        let body: Vec<&str> = roles
            .iter()
            .zip(&views)
            .filter(|(role, _)| **role == Role::Body)
            .map(|(_, view)| view.message_text().trim())
            .filter(|text| text.chars().any(char::is_alphanumeric))
            .collect();

        let message = compose_message(&body, kind, first_failure);
        let location = find_location(&message);

        trace!(
            "Record {} failed: {} ({}), location {:?}",
            record_index,
            target_label,
            kind,
            location
        );

        Classification::Failure(ClassifiedFailure {
            target_label,
            kind,
            message,
            location,
            record_index,
            message_truncated: false,
        })
    }
}

/// Test wins over build, build over everything else
fn failure_kind(signals: &[Signal]) -> FailureKind {
    let failed = |kind: FailureKind| signals.iter().any(|s| s.is_failure() && s.kind == kind);

    if failed(FailureKind::Test) {
        FailureKind::Test
    } else if failed(FailureKind::Build) {
        FailureKind::Build
    } else {
        FailureKind::Other
    }
}

fn is_diagnostic(text: &str) -> bool {
    find_location(text).is_some() || free_text_signal(text).is_some()
}

/// Diagnostic lines in encounter order, else the longest remaining string,
/// else a sentence naming the status that failed
fn compose_message(body: &[&str], kind: FailureKind, failure: &Signal) -> String {
    let diagnostics: Vec<&str> = body.iter().copied().filter(|t| is_diagnostic(t)).collect();
    if !diagnostics.is_empty() {
        return diagnostics.join("\n");
    }

    let longest = body
        .iter()
        .copied()
        .fold(None, |best: Option<&str>, text| match best {
            Some(b) if b.len() >= text.len() => Some(b),
            _ => Some(text),
        });

    match longest {
        Some(text) => text.to_string(),
        None => format!("{} reported {}", kind, failure.token),
    }
}
