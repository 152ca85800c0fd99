use super::{summary_line, truncation_note, Renderer};
use crate::aggregate::FailureSet;
use std::fmt;

/// Plain console summary
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn render(&self, set: &FailureSet, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}", summary_line(set))?;

        for failure in set.iter() {
            write!(out, "\n{} - {}", failure.target_label, failure.message)?;
            if let Some(location) = &failure.location {
                write!(out, " [{}:{}]", location.path, location.line)?;
            }
            writeln!(out)?;
        }

        if let Some(note) = truncation_note(set) {
            writeln!(out, "\n({})", note)?;
        }
        Ok(())
    }
}
