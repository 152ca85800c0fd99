use super::{summary_line, truncation_note, Renderer, SourceLinker};
use crate::aggregate::FailureSet;
use crate::classify::ClassifiedFailure;
use std::fmt;

/// Buildkite annotation body.
///
/// One collapsible section per failure, with the message in a fenced block
/// and the location linked to the repository when a [`SourceLinker`] is
/// enabled.
#[derive(Debug, Clone, Default)]
pub struct MarkdownRenderer {
    linker: SourceLinker,
}

impl MarkdownRenderer {
    /// Creates a renderer that links locations through `linker`
    pub fn new(linker: SourceLinker) -> Self {
        Self { linker }
    }

    fn write_failure(&self, failure: &ClassifiedFailure, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "<details>")?;
        write!(
            out,
            "<summary><code>{}</code> ({})",
            escape_html(&failure.target_label),
            failure.kind
        )?;
        if let Some(location) = &failure.location {
            let shown = escape_html(&location.to_string());
            match self.linker.link(location) {
                Some(url) => write!(out, " at <a href=\"{}\">{}</a>", escape_html(&url), shown)?,
                None => write!(out, " at <code>{}</code>", shown)?,
            }
        }
        writeln!(out, "</summary>")?;
        writeln!(out)?;

        let fence = fence_for(&failure.message);
        writeln!(out, "{}", fence)?;
        writeln!(out, "{}", failure.message)?;
        writeln!(out, "{}", fence)?;
        writeln!(out)?;
        writeln!(out, "</details>")?;
        writeln!(out)
    }
}

impl Renderer for MarkdownRenderer {
    fn render(&self, set: &FailureSet, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "### {}", summary_line(set))?;
        writeln!(out)?;

        for failure in set.iter() {
            self.write_failure(failure, out)?;
        }

        if let Some(note) = truncation_note(set) {
            writeln!(out, "_{}_", note)?;
        }
        Ok(())
    }
}

/// A backtick fence longer than any backtick run inside `text`
fn fence_for(text: &str) -> String {
    let longest = text
        .split(|c: char| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
