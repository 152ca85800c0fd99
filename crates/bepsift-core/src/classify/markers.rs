//! Success and failure markers.
//!
//! Two families of evidence are recognized. Explicit status signals are
//! candidates that *are* a status: a bare enum token such as `FAILED`, or a
//! `key: value` pair whose value is one. Free-text markers are failure words
//! and console prefixes inside diagnostic prose; they only count when a
//! record carries no explicit status at all.

use super::patterns::{find_label, find_location};
use super::FailureKind;
use regex::Regex;
use std::sync::OnceLock;

/// Test status values reporting success
const TEST_SUCCESS: &[&str] = &["PASSED"];

/// Test status values reporting failure
const TEST_FAILURE: &[&str] = &[
    "FAILED",
    "TIMEOUT",
    "FLAKY",
    "INCOMPLETE",
    "REMOTE_FAILURE",
    "FAILED_TO_BUILD",
    "TOOL_HALTED_BEFORE_TESTING",
];

/// Build and exit-code names reporting success
const BUILD_SUCCESS: &[&str] = &["SUCCESS"];

/// Abort reasons and exit-code names reporting failure
const BUILD_FAILURE: &[&str] = &[
    "BUILD_FAILED",
    "BUILD_FAILURE",
    "ANALYSIS_FAILURE",
    "LOADING_FAILURE",
    "NO_BUILD",
    "NO_ANALYZE",
    "OUT_OF_MEMORY",
    "REMOTE_ENVIRONMENT_FAILURE",
    "USER_INTERRUPTED",
];

/// Bazel console prefixes that open an error line
const CONSOLE_PREFIXES: &[&str] = &["ERROR:", "FAILED:"];

/// Keys carrying a process exit code
const EXIT_CODE_KEYS: &[&str] = &["exit_code", "exitCode"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Polarity {
    Success,
    Failure,
}

/// One piece of evidence about a record's outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Signal {
    pub(crate) kind: FailureKind,
    pub(crate) polarity: Polarity,
    pub(crate) token: String,
}

impl Signal {
    fn new(kind: FailureKind, polarity: Polarity, token: impl Into<String>) -> Self {
        Self {
            kind,
            polarity,
            token: token.into(),
        }
    }

    pub(crate) fn is_failure(&self) -> bool {
        self.polarity == Polarity::Failure
    }
}

/// A candidate string split into an optional key and its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldView<'a> {
    pub(crate) key: Option<&'a str>,
    pub(crate) value: &'a str,
    text: &'a str,
    quoted: bool,
}

impl<'a> FieldView<'a> {
    /// Recognizes `"key": value` (JSON) and `key: value` (text proto, lowercase keys)
    pub(crate) fn parse(text: &'a str) -> Self {
        let text = text.trim().trim_end_matches(',').trim_end();

        if let Some(caps) = key_value_regex().captures(text) {
            let quoted_key = caps.get(1);
            let key = quoted_key.or_else(|| caps.get(2)).map(|m| m.as_str());
            let raw_value = caps.get(3).map_or("", |m| m.as_str()).trim();
            let (value, quoted_value) = unquote(raw_value);
            return Self {
                key,
                value,
                text,
                quoted: quoted_key.is_some() || quoted_value,
            };
        }

        let (value, quoted) = unquote(text);
        Self {
            key: None,
            value,
            text,
            quoted,
        }
    }

    /// Text to use when the candidate ends up in a message.
    ///
    /// JSON-style pairs contribute their value; anything else is kept whole
    /// so that `file:12: error` is not mistaken for a key.
    pub(crate) fn message_text(&self) -> &'a str {
        if self.quoted {
            self.value
        } else {
            self.text
        }
    }
}

fn key_value_regex() -> &'static Regex {
    static KEY_VALUE: OnceLock<Regex> = OnceLock::new();
    KEY_VALUE.get_or_init(|| {
        Regex::new(r#"^(?:"([A-Za-z_][A-Za-z0-9_]*)"|([a-z_][a-z0-9_]*))\s*:\s*(.*)$"#)
            .expect("key/value pattern is valid")
    })
}

fn failure_word_regex() -> &'static Regex {
    static WORDS: OnceLock<Regex> = OnceLock::new();
    WORDS.get_or_init(|| {
        Regex::new(r"(?i)\b(error|failed|failure|aborted|fatal)\b").expect("failure word pattern is valid")
    })
}

fn exit_code_regex() -> &'static Regex {
    static EXIT: OnceLock<Regex> = OnceLock::new();
    EXIT.get_or_init(|| {
        Regex::new(r"(?i)\bexit(?:ed with)?(?:\s+code)?[:\s]+([1-9][0-9]*)\b")
            .expect("exit code pattern is valid")
    })
}

fn unquote(text: &str) -> (&str, bool) {
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => (inner, true),
        None => (text, false),
    }
}

fn status_token(token: &str) -> Option<Signal> {
    let lookup = [
        (TEST_SUCCESS, FailureKind::Test, Polarity::Success),
        (TEST_FAILURE, FailureKind::Test, Polarity::Failure),
        (BUILD_SUCCESS, FailureKind::Build, Polarity::Success),
        (BUILD_FAILURE, FailureKind::Build, Polarity::Failure),
    ];

    lookup
        .iter()
        .find(|(tokens, _, _)| tokens.contains(&token))
        .map(|(_, kind, polarity)| Signal::new(*kind, *polarity, token))
}

/// Returns the status this candidate states outright, if any
pub(crate) fn explicit_signal(view: &FieldView<'_>) -> Option<Signal> {
    match (view.key, view.value) {
        (Some("success"), "true") => Some(Signal::new(FailureKind::Build, Polarity::Success, "success")),
        (Some("success"), "false") => Some(Signal::new(FailureKind::Build, Polarity::Failure, "success: false")),
        (Some(key), value) if EXIT_CODE_KEYS.contains(&key) => match value.parse::<i64>() {
            Ok(0) => Some(Signal::new(FailureKind::Build, Polarity::Success, "exit code 0")),
            Ok(code) => Some(Signal::new(FailureKind::Build, Polarity::Failure, format!("exit code {}", code))),
            Err(_) => None,
        },
        (_, value) => status_token(value),
    }
}

/// Returns a failure marker found in diagnostic prose, if any.
///
/// Labels and paths are not prose: `//src/error:lib` or
/// `bazel-out/.../liberror.a` name things, they do not report anything.
/// Failure words are only looked for in the remaining words of a string
/// that reads as a sentence or carries a `path:line` diagnostic.
pub(crate) fn free_text_signal(text: &str) -> Option<Signal> {
    let text = text.trim_start();
    if is_option(text) {
        return None;
    }

    if let Some(prefix) = CONSOLE_PREFIXES.iter().find(|p| text.starts_with(*p)) {
        return Some(Signal::new(
            FailureKind::Build,
            Polarity::Failure,
            prefix.trim_end_matches(':'),
        ));
    }

    let is_prose = text.contains(char::is_whitespace) || find_location(text).is_some();
    if !is_prose {
        return None;
    }

    let words = text
        .split_whitespace()
        .filter(|word| !is_name(word))
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(word) = failure_word_regex().captures(&words).and_then(|c| c.get(1)) {
        return Some(Signal::new(
            FailureKind::Other,
            Polarity::Failure,
            word.as_str().to_ascii_lowercase(),
        ));
    }

    exit_code_regex()
        .captures(&words)
        .and_then(|c| c.get(1))
        .map(|code| Signal::new(FailureKind::Other, Polarity::Failure, format!("exit code {}", code.as_str())))
}

/// A label, path or URL token
fn is_name(word: &str) -> bool {
    word.contains('/') || word.starts_with('@') || find_label(word).is_some()
}

/// Command-line flags never count as evidence or diagnostics
pub(crate) fn is_option(text: &str) -> bool {
    text.trim_start().starts_with("--")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn explicit(text: &str) -> Option<(FailureKind, Polarity)> {
        explicit_signal(&FieldView::parse(text)).map(|s| (s.kind, s.polarity))
    }

    #[test]
    fn test_bare_status_tokens() {
        assert_eq!(explicit("FAILED"), Some((FailureKind::Test, Polarity::Failure)));
        assert_eq!(explicit("PASSED"), Some((FailureKind::Test, Polarity::Success)));
        assert_eq!(explicit("BUILD_FAILED"), Some((FailureKind::Build, Polarity::Failure)));
        assert_eq!(explicit("SUCCESS"), Some((FailureKind::Build, Polarity::Success)));
        assert_eq!(explicit("Failed"), None);
    }

    #[test]
    fn test_key_value_status() {
        assert_eq!(explicit("\"status\": \"FAILED\","), Some((FailureKind::Test, Polarity::Failure)));
        assert_eq!(explicit("status: PASSED"), Some((FailureKind::Test, Polarity::Success)));
        assert_eq!(explicit("\"reason\": \"BUILD_FAILED\""), Some((FailureKind::Build, Polarity::Failure)));
        assert_eq!(explicit("\"success\": false"), Some((FailureKind::Build, Polarity::Failure)));
        assert_eq!(explicit("success: true"), Some((FailureKind::Build, Polarity::Success)));
        assert_eq!(explicit("exit_code: 3"), Some((FailureKind::Build, Polarity::Failure)));
        assert_eq!(explicit("\"label\": \"//pkg:t\""), None);
    }

    #[test]
    fn test_message_text() {
        assert_eq!(FieldView::parse("\"description\": \"a.cc:1: error\",").message_text(), "a.cc:1: error");
        assert_eq!(FieldView::parse("foo:12:3: error: bad").message_text(), "foo:12:3: error: bad");
        assert_eq!(FieldView::parse("\"quoted\"").message_text(), "quoted");
    }

    #[test]
    fn test_free_text_markers() {
        let signal = free_text_signal("ERROR: /src/BUILD:3:1: Compiling x.cc failed").unwrap();
        assert_eq!(signal.kind, FailureKind::Build);
        assert_eq!(signal.token, "ERROR");

        let signal = free_text_signal("src/a.cc:4:2: error: unknown type").unwrap();
        assert_eq!(signal.kind, FailureKind::Other);
        assert_eq!(signal.token, "error");

        let signal = free_text_signal("process exited with code 137").unwrap();
        assert_eq!(signal.token, "exit code 137");

        assert!(free_text_signal("AssertionError raised in helper").is_none());
        assert!(free_text_signal("//src/error:lib").is_none());
        assert!(free_text_signal("bazel-out/k8-fastbuild/bin/src/error/liberror.a").is_none());
        assert!(free_text_signal("file:///work/src/errors/error.cc").is_none());
        assert!(free_text_signal("error").is_none());
        assert!(free_text_signal("Linking //src/error:lib into src/error/liberror.a").is_none());
        assert!(free_text_signal("src/errors/error.cc:12: undefined symbol").is_none());
        assert_eq!(
            free_text_signal("src/errors/error.cc:12: fatal: undefined symbol").map(|s| s.token),
            Some("fatal".to_string())
        );
        assert!(free_text_signal("--test_output=error").is_none());
        assert!(free_text_signal("INFO: Build completed successfully").is_none());
        assert!(free_text_signal("exit code 0").is_none());
    }
}
