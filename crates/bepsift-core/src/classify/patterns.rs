//! Target label and source location patterns.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Bare file names that count as a location path without a `/` or `.`
const BARE_FILENAMES: &[&str] = &["BUILD", "WORKSPACE", "Makefile", "Dockerfile"];

/// A `path:line[:column]` reference found in diagnostic text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    /// File path as written in the diagnostic
    pub path: String,
    /// 1-based line number
    pub line: u32,
    /// Column, when the diagnostic carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)?;
        if let Some(column) = self.column {
            write!(f, ":{}", column)?;
        }
        Ok(())
    }
}

fn label_regex() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        // `//pkg:name`, `@repo//pkg:name` or `@@repo//pkg:name`, not the
        // `//host:port` tail of a URL
        Regex::new(r"(?:^|[^\w:/@.~+-])(@{0,2}[\w.~+-]*//[\w./+-]*:[\w./+@=,~-]+)")
            .expect("label pattern is valid")
    })
}

fn location_regex() -> &'static Regex {
    static LOCATION: OnceLock<Regex> = OnceLock::new();
    LOCATION.get_or_init(|| {
        Regex::new(r"(?:^|[^\w./~+@-])([\w./~+@-]+):(\d+)(?::(\d+))?")
            .expect("location pattern is valid")
    })
}

/// Returns the first Bazel target label in `text`
pub fn find_label(text: &str) -> Option<&str> {
    label_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches(|c| c == '.' || c == ','))
}

/// Returns the first plausible `path:line[:column]` reference in `text`
pub fn find_location(text: &str) -> Option<SourceLocation> {
    location_regex().captures_iter(text).find_map(|caps| {
        let path = caps.get(1)?.as_str();
        if !is_plausible_path(path) {
            return None;
        }

        let line = caps.get(2)?.as_str().parse().ok()?;
        let column = caps.get(3).and_then(|m| m.as_str().parse().ok());

        Some(SourceLocation {
            path: path.to_string(),
            line,
            column,
        })
    })
}

fn is_plausible_path(path: &str) -> bool {
    if path.starts_with("//") || !path.chars().any(char::is_alphabetic) {
        return false;
    }
    path.contains('/') || path.contains('.') || BARE_FILENAMES.contains(&path)
}
