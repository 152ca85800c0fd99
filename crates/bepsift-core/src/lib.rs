//! # bepsift-core
//!
//! A library for extracting build and test failures from Bazel Build Event
//! Protocol (BEP) binary streams.
//!
//! This crate provides the core functionality for:
//! - Framing a `--build_event_binary_file` output into length-delimited records
//! - Pulling readable strings out of each event without a protobuf schema
//! - Classifying events as failures and locating `path:line:column` references
//! - Aggregating failures into a capped, deduplicated set
//! - Rendering that set and publishing it as a CI annotation
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`stream`]: Length-delimited record framing
//! - [`scanner`]: Schema-less wire format scanning
//! - [`classify`]: Success and failure detection
//! - [`aggregate`]: Deduplication, truncation and capping
//! - [`analyzer`]: The single-pass driver tying the stages together
//! - [`render`]: Text, JSON and markdown output
//! - [`publish`]: Annotation delivery with retry
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use bepsift_core::{Analyzer, AnalyzerConfig, Renderer, TextRenderer};
//!
//! let analyzer = Analyzer::new(AnalyzerConfig::new().max_failures(20));
//! let report = analyzer.analyze_path("build_events.pb")?;
//!
//! print!("{}", TextRenderer.render_to_string(&report.failures)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`Renderer`]: Add output formats for a [`FailureSet`]
//! - [`Publisher`]: Deliver annotations somewhere other than Buildkite
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod aggregate;
pub mod analyzer;
pub mod classify;
pub mod config;
pub mod error;
pub mod publish;
pub mod render;
pub mod scanner;
pub mod stream;

// Re-export primary types for convenience
pub use aggregate::{truncate_message, FailureAggregator, FailureSet, TRUNCATION_MARKER};
pub use analyzer::{AnalysisPass, AnalysisReport, AnalysisStats, Analyzer, Cancellation, PassState};
pub use classify::{ClassifiedFailure, Classification, FailureClassifier, FailureKind, SourceLocation};
pub use config::AnalyzerConfig;
pub use error::{Error, Result};
pub use publish::{publish_blocking, publish_with_retry, Annotation, PublishError, Publisher, RetryPolicy};
pub use render::{JsonRenderer, MarkdownRenderer, Renderer, SourceLinker, TextRenderer};
pub use scanner::{CandidateString, ScanOutcome, WireScanner};
pub use stream::{RawRecord, RecordStream};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
