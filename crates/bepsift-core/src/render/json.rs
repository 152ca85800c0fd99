use super::Renderer;
use crate::aggregate::FailureSet;
use std::fmt;

/// Pretty-printed JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, set: &FailureSet, out: &mut dyn fmt::Write) -> fmt::Result {
        let json = serde_json::to_string_pretty(set).map_err(|_| fmt::Error)?;
        writeln!(out, "{}", json)
    }
}
