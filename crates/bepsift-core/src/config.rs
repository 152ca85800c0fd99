//! Analyzer limits.
//!
//! Every size and count bound the engine enforces lives in one immutable
//! [`AnalyzerConfig`] value that is handed to the [`Analyzer`](crate::Analyzer)
//! and threaded down to the stream, scanner, classifier and aggregator.

/// Default overall input cap (100 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default per-record cap (10 MiB)
pub const DEFAULT_MAX_RECORD_SIZE: usize = 10 * 1024 * 1024;

/// Default number of failures kept in a report
pub const DEFAULT_MAX_FAILURES: usize = 50;

/// Default maximum characters per failure message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 5000;

/// Default maximum lines per failure message
pub const DEFAULT_MAX_ERROR_LINES: usize = 10;

/// Default number of candidate strings collected per event
pub const DEFAULT_MAX_STRINGS_PER_EVENT: usize = 20;

/// Longest varint encoding of a 64-bit value
pub const MAX_VARINT_BYTES: usize = 10;

/// Default submessage nesting limit
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Hard ceiling on the configurable nesting limit
pub const MAX_DEPTH_CEILING: usize = 64;

/// Limits applied during one analysis pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Largest accepted input, in bytes
    pub max_file_size: u64,
    /// Largest accepted single record, in bytes
    pub max_record_size: usize,
    /// Failures kept in the final set
    pub max_failures: usize,
    /// Characters kept per failure message
    pub max_message_size: usize,
    /// Lines kept per failure message
    pub max_error_lines: usize,
    /// Candidate strings collected per record
    pub max_strings_per_event: usize,
    /// Bytes a single varint may occupy (at most 10)
    pub max_varint_bytes: usize,
    /// Deepest submessage level the scanner descends into
    pub max_depth: usize,
    /// Characters kept per candidate string
    pub max_string_len: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            max_failures: DEFAULT_MAX_FAILURES,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_error_lines: DEFAULT_MAX_ERROR_LINES,
            max_strings_per_event: DEFAULT_MAX_STRINGS_PER_EVENT,
            max_varint_bytes: MAX_VARINT_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
            max_string_len: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl AnalyzerConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the overall input size cap
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the overall input size cap in mebibytes
    pub fn max_file_size_mb(self, mb: u64) -> Self {
        self.max_file_size(mb.saturating_mul(1024 * 1024))
    }

    /// Sets the per-record size cap
    pub fn max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    /// Sets how many failures are kept
    pub fn max_failures(mut self, max: usize) -> Self {
        self.max_failures = max;
        self
    }

    /// Sets the per-message character cap
    pub fn max_message_size(mut self, chars: usize) -> Self {
        self.max_message_size = chars;
        self
    }

    /// Sets the per-message line cap
    pub fn max_error_lines(mut self, lines: usize) -> Self {
        self.max_error_lines = lines;
        self
    }

    /// Sets how many candidate strings are collected per record
    pub fn max_strings_per_event(mut self, max: usize) -> Self {
        self.max_strings_per_event = max;
        self
    }

    /// Sets the varint byte cap, clamped to `1..=10`
    pub fn max_varint_bytes(mut self, bytes: usize) -> Self {
        self.max_varint_bytes = bytes.clamp(1, MAX_VARINT_BYTES);
        self
    }

    /// Sets the nesting limit, clamped to [`MAX_DEPTH_CEILING`]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.min(MAX_DEPTH_CEILING);
        self
    }

    /// Sets the per-candidate character cap
    pub fn max_string_len(mut self, chars: usize) -> Self {
        self.max_string_len = chars;
        self
    }

    /// Varint byte cap actually enforced
    pub(crate) fn varint_limit(&self) -> usize {
        self.max_varint_bytes.clamp(1, MAX_VARINT_BYTES)
    }

    /// Nesting limit actually enforced
    pub(crate) fn depth_limit(&self) -> usize {
        self.max_depth.min(MAX_DEPTH_CEILING)
    }
}
