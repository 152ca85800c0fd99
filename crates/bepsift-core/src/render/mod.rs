//! Rendering of failure sets.
//!
//! A [`Renderer`] writes a [`FailureSet`] into any [`fmt::Write`] sink. Three
//! renderers ship with the crate:
//!
//! - [`TextRenderer`]: plain console summary
//! - [`JsonRenderer`]: pretty JSON for machine consumers
//! - [`MarkdownRenderer`]: Buildkite annotation body with source links

mod json;
mod links;
mod markdown;
mod text;

use crate::aggregate::FailureSet;
use std::fmt;

pub use json::JsonRenderer;
pub use links::{normalize_repo_url, SourceLinker};
pub use markdown::MarkdownRenderer;
pub use text::TextRenderer;

/// Header used when nothing failed
pub const SUCCESS_HEADER: &str = "Build completed";

/// Writes a failure set in some output format
pub trait Renderer {
    /// Writes `set` to `out`
    fn render(&self, set: &FailureSet, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Renders into a new string
    fn render_to_string(&self, set: &FailureSet) -> Result<String, fmt::Error> {
        let mut out = String::new();
        self.render(set, &mut out)?;
        Ok(out)
    }
}

/// `Build completed with N failure(s)`, or [`SUCCESS_HEADER`] when empty
pub fn summary_line(set: &FailureSet) -> String {
    match set.failures_kept {
        0 => SUCCESS_HEADER.to_string(),
        1 => format!("{} with 1 failure", SUCCESS_HEADER),
        n => format!("{} with {} failures", SUCCESS_HEADER, n),
    }
}

/// `showing N of M` note for capped sets
pub(crate) fn truncation_note(set: &FailureSet) -> Option<String> {
    set.truncated.then(|| {
        format!(
            "showing {} of {} failures",
            set.failures_kept, set.total_failures_seen
        )
    })
}
