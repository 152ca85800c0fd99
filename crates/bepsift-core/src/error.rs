//! Error types for the bepsift-core library.
//!
//! Errors fall into three groups: input access (the BEP file cannot be
//! opened), outer framing (the record stream itself is broken and the pass
//! aborts), and inner wire-format corruption (one record is bad and gets
//! dropped while the pass carries on). The group decides the exit code the
//! binary reports.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bepsift operations
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for input-access failures
pub const EXIT_INPUT_ERROR: u8 = 1;

/// Exit code for an aborted analysis pass
pub const EXIT_ABORTED: u8 = 2;

/// Comprehensive error type for all bepsift operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The BEP file does not exist
    #[error("BEP file not found: {path}")]
    FileNotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// Failed to open or read the input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The source exceeds the configured overall size cap
    #[error("input is {size} bytes, exceeding the {max} byte limit")]
    FileTooLarge {
        /// Total size of the source
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// A record declares a length above the per-record cap
    #[error("record {index} at offset {offset} declares {length} bytes, exceeding the {max} byte limit")]
    RecordTooLarge {
        /// Ordinal of the offending record
        index: usize,
        /// Byte offset of the record's length prefix
        offset: u64,
        /// Declared length
        length: u64,
        /// Configured maximum
        max: usize,
    },

    /// The stream ended in the middle of a record or its length prefix
    #[error("stream truncated at offset {offset}: needed {needed} more bytes, {available} available")]
    TruncatedStream {
        /// Byte offset where the incomplete element starts
        offset: u64,
        /// Bytes the element required
        needed: u64,
        /// Bytes that were actually left
        available: u64,
    },

    /// A varint ran past its byte cap, overflowed 64 bits, or was cut short
    #[error("malformed varint at offset {offset} (truncated: {truncated})")]
    MalformedVarint {
        /// Byte offset where the varint starts
        offset: usize,
        /// True when the input ran out before the terminating byte
        truncated: bool,
    },

    /// Invalid protobuf wire format inside a record
    #[error("invalid protobuf wire format at offset {offset}: {details}")]
    InvalidWireFormat {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// The pass was cancelled at a record boundary
    #[error("analysis cancelled after {records} records")]
    Cancelled {
        /// Records fully processed before cancellation
        records: usize,
    },

    /// I/O failure while streaming an already opened source
    #[error("I/O error while reading records: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file-not-found error
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a new wire format error
    pub fn invalid_wire_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidWireFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a varint error for input that ran out mid-varint
    pub fn varint_truncated(offset: usize) -> Self {
        Self::MalformedVarint {
            offset,
            truncated: true,
        }
    }

    /// Creates a varint error for an over-long or overflowing encoding
    pub fn varint_overlong(offset: usize) -> Self {
        Self::MalformedVarint {
            offset,
            truncated: false,
        }
    }

    /// Returns true if this error only affects a single record and the pass can continue
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidWireFormat { .. })
    }

    /// Returns true if this error comes from the outer record framing.
    ///
    /// Varints inside a record are reported as [`Error::InvalidWireFormat`],
    /// so a [`Error::MalformedVarint`] always means a broken length prefix.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::FileTooLarge { .. }
                | Self::RecordTooLarge { .. }
                | Self::TruncatedStream { .. }
                | Self::MalformedVarint { .. }
        )
    }

    /// Returns true if the input could not be opened or read at all
    pub fn is_input_access(&self) -> bool {
        matches!(self, Self::FileNotFound { .. } | Self::FileRead { .. })
    }

    /// Process exit code the binary reports for this error
    pub fn exit_code(&self) -> u8 {
        if self.is_input_access() {
            EXIT_INPUT_ERROR
        } else {
            EXIT_ABORTED
        }
    }
}
