//! Single-pass analysis driver.
//!
//! An [`Analyzer`] owns the configuration and the reusable stages. Each call
//! to one of its `analyze_*` methods runs one [`AnalysisPass`]: records are
//! pulled from a [`RecordStream`], scanned, classified and aggregated one at
//! a time, and the pass moves through
//! `Start -> Reading -> Finished | Aborted`.
//!
//! Framing errors and cancellation abort the pass. Corruption inside a
//! single record only drops that record.

use crate::aggregate::{FailureAggregator, FailureSet};
use crate::classify::{Classification, FailureClassifier};
use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use crate::scanner::WireScanner;
use crate::stream::{RawRecord, RecordStream};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Cooperative cancellation checked between records.
///
/// Clones share the same flag, so a handle moved into a signal handler
/// cancels the pass that holds the other clone.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Creates a handle that is never tripped unless cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Also trips once `timeout` has elapsed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancelled or past the deadline
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Where a pass is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassState {
    /// Created, nothing read yet
    Start,
    /// Consuming records
    Reading,
    /// Reached clean end of input
    Finished,
    /// Stopped on a framing error or cancellation
    Aborted(String),
}

impl PassState {
    /// Returns true for `Finished` and `Aborted`
    pub fn is_terminal(&self) -> bool {
        matches!(self, PassState::Finished | PassState::Aborted(_))
    }
}

/// Counters collected during a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisStats {
    /// Records read from the stream
    pub records: usize,
    /// Zero-length records
    pub empty_records: usize,
    /// Records dropped because of malformed wire data
    pub corrupt_records: usize,
    /// Records reporting success
    pub successes: usize,
    /// Records without a usable status
    pub ambiguous: usize,
    /// Records classified as failures, duplicates included
    pub failures_seen: usize,
    /// Failures dropped as duplicates
    pub duplicates: usize,
    /// Bytes consumed from the source
    pub bytes_read: u64,
}

/// Everything a finished pass produces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    /// The capped, deduplicated failures
    pub failures: FailureSet,
    /// Pass counters
    pub stats: AnalysisStats,
}

impl AnalysisReport {
    /// Returns true if at least one failure was kept
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Failure-extraction engine
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalyzerConfig,
    scanner: WireScanner,
    classifier: FailureClassifier,
    cancellation: Cancellation,
}

impl Analyzer {
    /// Creates an analyzer with the given limits
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            scanner: WireScanner::new(&config),
            classifier: FailureClassifier::new(),
            cancellation: Cancellation::new(),
            config,
        }
    }

    /// Attaches a cancellation handle checked at every record boundary
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Limits in effect
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyzes a BEP file on disk
    pub fn analyze_path(&self, path: impl AsRef<Path>) -> Result<AnalysisReport> {
        let stream = RecordStream::open(path, &self.config)?;
        self.begin(stream).run()
    }

    /// Analyzes any reader whose total size is known up front
    pub fn analyze_reader<R: Read>(&self, reader: R, total_size: u64) -> Result<AnalysisReport> {
        let stream = RecordStream::new(reader, total_size, &self.config)?;
        self.begin(stream).run()
    }

    /// Analyzes an in-memory stream
    pub fn analyze_bytes(&self, data: &[u8]) -> Result<AnalysisReport> {
        let stream = RecordStream::from_slice(data, &self.config)?;
        self.begin(stream).run()
    }

    /// Starts a pass over `stream` without running it
    pub fn begin<R: Read>(&self, stream: RecordStream<R>) -> AnalysisPass<'_, R> {
        AnalysisPass {
            analyzer: self,
            stream,
            aggregator: FailureAggregator::new(&self.config),
            stats: AnalysisStats::default(),
            state: PassState::Start,
        }
    }
}

/// One sequential pass over a record stream
#[derive(Debug)]
pub struct AnalysisPass<'a, R> {
    analyzer: &'a Analyzer,
    stream: RecordStream<R>,
    aggregator: FailureAggregator,
    stats: AnalysisStats,
    state: PassState,
}

impl<'a, R: Read> AnalysisPass<'a, R> {
    /// Current lifecycle state
    pub fn state(&self) -> &PassState {
        &self.state
    }

    /// Counters so far
    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }

    /// Processes one record. Returns `Ok(false)` once the stream is exhausted.
    ///
    /// Calling it again after the pass reached a terminal state is a no-op.
    pub fn step(&mut self) -> Result<bool> {
        match self.state {
            PassState::Finished | PassState::Aborted(_) => return Ok(false),
            PassState::Start => {
                debug!("Reading {} bytes of records", self.stream.total_size());
                self.state = PassState::Reading;
            }
            PassState::Reading => {}
        }

        if self.analyzer.cancellation.is_cancelled() {
            let err = Error::Cancelled {
                records: self.stats.records,
            };
            return Err(self.abort(err));
        }

        let next = self.stream.next();
        self.stats.bytes_read = self.stream.position();

        match next {
            None => {
                self.state = PassState::Finished;
                debug!("Pass finished after {} records", self.stats.records);
                Ok(false)
            }
            Some(Err(e)) => Err(self.abort(e)),
            Some(Ok(record)) => match self.process(&record) {
                Ok(()) => Ok(true),
                Err(e) => Err(self.abort(e)),
            },
        }
    }

    /// Drives the pass to completion and returns the report
    pub fn run(mut self) -> Result<AnalysisReport> {
        while self.step()? {}
        Ok(self.into_report())
    }

    fn abort(&mut self, err: Error) -> Error {
        warn!("Analysis aborted after {} records: {}", self.stats.records, err);
        self.state = PassState::Aborted(err.to_string());
        err
    }

    /// Classifies one record; only unrecoverable scan errors are returned
    fn process(&mut self, record: &RawRecord) -> Result<()> {
        self.stats.records += 1;

        if record.is_empty() {
            self.stats.empty_records += 1;
            return Ok(());
        }

        let mut outcome = self.analyzer.scanner.scan(record);
        if let Some(err) = outcome.corruption.take() {
            if !err.is_recoverable() {
                return Err(err);
            }
            self.stats.corrupt_records += 1;
            warn!(
                "Dropping corrupt record {} at offset {}: {}",
                record.index, record.offset, err
            );
            return Ok(());
        }

        match self.analyzer.classifier.classify(&outcome.candidates, record.index) {
            Classification::Success => self.stats.successes += 1,
            Classification::Ambiguous => self.stats.ambiguous += 1,
            Classification::Failure(failure) => {
                self.stats.failures_seen += 1;
                trace!("Record {} reports a failure of {}", record.index, failure.target_label);
                self.aggregator.push(failure);
            }
        }
        Ok(())
    }

    fn into_report(self) -> AnalysisReport {
        let mut stats = self.stats;
        stats.duplicates = self.aggregator.duplicates();
        let failures = self.aggregator.finish();

        debug!(
            "Kept {} of {} distinct failures ({} duplicates)",
            failures.failures_kept, failures.total_failures_seen, stats.duplicates
        );

        AnalysisReport { failures, stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureKind;
    use pretty_assertions::assert_eq;

    /// Frames `(field, payload)` string fields into one record
    fn record(fields: &[(u8, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, text) in fields {
            assert!(text.len() < 0x80);
            body.push((field << 3) | 2);
            body.push(text.len() as u8);
            body.extend_from_slice(text.as_bytes());
        }
        let mut out = vec![body.len() as u8];
        out.extend(body);
        out
    }

    fn stream(records: &[Vec<u8>]) -> Vec<u8> {
        records.concat()
    }

    #[test]
    fn test_empty_input_finishes_clean() {
        let report = Analyzer::default().analyze_bytes(&[]).unwrap();
        assert_eq!(report, AnalysisReport::default());
        assert!(!report.has_failures());
    }

    #[test]
    fn test_pass_states() {
        let data = stream(&[record(&[(1, "//a:b"), (2, "PASSED")])]);
        let analyzer = Analyzer::default();
        let mut pass = analyzer.begin(RecordStream::from_slice(&data, analyzer.config()).unwrap());

        assert_eq!(pass.state(), &PassState::Start);
        assert!(pass.step().unwrap());
        assert_eq!(pass.state(), &PassState::Reading);
        assert!(!pass.step().unwrap());
        assert_eq!(pass.state(), &PassState::Finished);
        assert!(!pass.step().unwrap());
        assert_eq!(pass.stats().successes, 1);
    }

    #[test]
    fn test_failures_and_counters() {
        let data = stream(&[
            record(&[(1, "//a:ok"), (2, "PASSED")]),
            vec![0x00],
            record(&[(1, "//a:bad"), (2, "FAILED"), (3, "a/bad_test.cc:3:1: error: nope")]),
            record(&[(1, "//a:bad"), (2, "FAILED"), (3, "a/bad_test.cc:3:1: error: nope")]),
            record(&[(1, "just some progress output")]),
        ]);

        let report = Analyzer::default().analyze_bytes(&data).unwrap();
        assert_eq!(
            report.stats,
            AnalysisStats {
                records: 5,
                empty_records: 1,
                corrupt_records: 0,
                successes: 1,
                ambiguous: 1,
                failures_seen: 2,
                duplicates: 1,
                bytes_read: data.len() as u64,
            }
        );
        assert_eq!(report.failures.failures_kept, 1);
        let failure = &report.failures.entries[0];
        assert_eq!(failure.target_label, "//a:bad");
        assert_eq!(failure.kind, FailureKind::Test);
        assert_eq!(failure.record_index, 2);
    }

    #[test]
    fn test_corrupt_record_is_dropped() {
        let mut bad = record(&[(1, "//a:bad"), (2, "FAILED")]);
        // Field 0 tag after the valid fields
        bad.extend_from_slice(&[0x00, 0x00]);
        bad[0] += 2;

        let data = stream(&[bad, record(&[(1, "//b:c"), (2, "BUILD_FAILED")])]);
        let report = Analyzer::default().analyze_bytes(&data).unwrap();

        assert_eq!(report.stats.corrupt_records, 1);
        assert_eq!(report.failures.failures_kept, 1);
        assert_eq!(report.failures.entries[0].target_label, "//b:c");
    }

    #[test]
    fn test_bad_varint_inside_record_does_not_abort() {
        let mut bad = record(&[(1, "//a:bad"), (2, "FAILED")]);
        // Varint field whose value never terminates
        bad.extend_from_slice(&[0x18, 0xFF]);
        bad[0] += 2;

        let data = stream(&[bad, record(&[(1, "//a:ok"), (2, "PASSED")])]);
        let report = Analyzer::default().analyze_bytes(&data).unwrap();

        assert_eq!(report.stats.records, 2);
        assert_eq!(report.stats.corrupt_records, 1);
        assert_eq!(report.stats.successes, 1);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_truncated_stream_aborts() {
        let mut data = record(&[(1, "//a:b"), (2, "FAILED")]);
        data.extend_from_slice(&[0x20, 0x0a]);

        let analyzer = Analyzer::default();
        let mut pass = analyzer.begin(RecordStream::from_slice(&data, analyzer.config()).unwrap());
        assert!(pass.step().unwrap());
        let err = pass.step().unwrap_err();

        assert!(matches!(err, Error::TruncatedStream { .. }));
        assert!(matches!(pass.state(), PassState::Aborted(_)));
        assert!(!pass.step().unwrap());
    }

    #[test]
    fn test_cancellation_aborts_at_record_boundary() {
        let data = stream(&[record(&[(1, "//a:b"), (2, "FAILED")])]);
        let cancel = Cancellation::new();
        let analyzer = Analyzer::default().with_cancellation(cancel.clone());

        cancel.cancel();
        let err = analyzer.analyze_bytes(&data).unwrap_err();
        assert!(matches!(err, Error::Cancelled { records: 0 }));
        assert_eq!(err.exit_code(), crate::error::EXIT_ABORTED);
    }

    #[test]
    fn test_expired_deadline_cancels() {
        let cancel = Cancellation::new().with_timeout(Duration::ZERO);
        assert!(cancel.is_cancelled());
        assert!(!Cancellation::new().is_cancelled());
    }
}
