//! Length-delimited record framing.
//!
//! A BEP file written with `--build_event_binary_file` is a sequence of
//! events, each prefixed by its length as a varint. [`RecordStream`] turns a
//! byte source into a lazy sequence of [`RawRecord`]s, one event at a time,
//! so memory stays bounded by the largest accepted record rather than the
//! file size.

use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use crate::scanner::read_varint;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::{debug, trace};

/// One undecoded event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Ordinal of the record in the stream (0-based)
    pub index: usize,
    /// Byte offset of the record's length prefix
    pub offset: u64,
    data: Bytes,
}

impl RawRecord {
    /// Creates a record from its payload
    pub fn new(index: usize, offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            offset,
            data: data.into(),
        }
    }

    /// Returns the payload as a slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-length event
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Lazy, non-restartable iterator over the records of a byte source.
///
/// The iterator is fused: after clean end of input or the first error it
/// only yields `None`.
#[derive(Debug)]
pub struct RecordStream<R> {
    reader: R,
    total_size: u64,
    position: u64,
    next_index: usize,
    max_record_size: usize,
    max_varint_bytes: usize,
    finished: bool,
}

impl RecordStream<BufReader<File>> {
    /// Opens a BEP file, rejecting it up front if it exceeds the size cap
    pub fn open(path: impl AsRef<Path>, config: &AnalyzerConfig) -> Result<Self> {
        let path = path.as_ref();

        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::file_not_found(path),
            _ => Error::file_read(path, e),
        })?;
        if !metadata.is_file() {
            return Err(Error::file_read(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        check_size(metadata.len(), config)?;

        let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        debug!("Opened {} ({} bytes)", path.display(), metadata.len());
        Self::new(BufReader::new(file), metadata.len(), config)
    }
}

impl<'a> RecordStream<&'a [u8]> {
    /// Streams records out of an in-memory buffer
    pub fn from_slice(data: &'a [u8], config: &AnalyzerConfig) -> Result<Self> {
        Self::new(data, data.len() as u64, config)
    }
}

impl<R: Read> RecordStream<R> {
    /// Creates a stream over `reader`, whose total size must be known.
    ///
    /// Fails with [`Error::FileTooLarge`] before reading anything if
    /// `total_size` exceeds the configured cap.
    pub fn new(reader: R, total_size: u64, config: &AnalyzerConfig) -> Result<Self> {
        check_size(total_size, config)?;

        Ok(Self {
            reader,
            total_size,
            position: 0,
            next_index: 0,
            max_record_size: config.max_record_size,
            max_varint_bytes: config.varint_limit(),
            finished: false,
        })
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Declared total size of the source
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of records yielded so far
    pub fn records_read(&self) -> usize {
        self.next_index
    }

    fn read_record(&mut self) -> Result<Option<RawRecord>> {
        let offset = self.position;

        let (length, prefix_len) = match read_varint(&mut self.reader, self.max_varint_bytes) {
            Ok(None) => return Ok(None),
            Ok(Some(prefix)) => prefix,
            Err(Error::MalformedVarint { truncated: true, .. }) => {
                return Err(Error::TruncatedStream {
                    offset,
                    needed: 1,
                    available: 0,
                });
            }
            Err(Error::MalformedVarint { truncated: false, .. }) => {
                return Err(Error::varint_overlong(offset as usize));
            }
            Err(e) => return Err(e),
        };
        self.position += prefix_len as u64;

        if length > self.max_record_size as u64 {
            return Err(Error::RecordTooLarge {
                index: self.next_index,
                offset,
                length,
                max: self.max_record_size,
            });
        }

        let remaining = self.total_size.saturating_sub(self.position);
        if length > remaining {
            return Err(Error::TruncatedStream {
                offset: self.position,
                needed: length,
                available: remaining,
            });
        }

        let mut data = Vec::with_capacity(length as usize);
        (&mut self.reader).take(length).read_to_end(&mut data)?;
        if (data.len() as u64) < length {
            return Err(Error::TruncatedStream {
                offset: self.position,
                needed: length,
                available: data.len() as u64,
            });
        }
        self.position += length;

        let record = RawRecord::new(self.next_index, offset, data);
        self.next_index += 1;
        trace!("Record {} at offset {} ({} bytes)", record.index, offset, record.len());

        Ok(Some(record))
    }
}

impl<R: Read> Iterator for RecordStream<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn check_size(size: u64, config: &AnalyzerConfig) -> Result<()> {
    if size > config.max_file_size {
        return Err(Error::FileTooLarge {
            size,
            max: config.max_file_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn frame(records: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for record in records {
            assert!(record.len() < 0x80);
            out.push(record.len() as u8);
            out.extend_from_slice(record);
        }
        out
    }

    fn collect(data: &[u8], config: &AnalyzerConfig) -> Vec<Result<RawRecord>> {
        RecordStream::from_slice(data, config).unwrap().collect()
    }

    /// Fails the test if anything tries to read it
    #[derive(Debug)]
    struct UnreadableSource;

    impl Read for UnreadableSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("source must not be read");
        }
    }

    #[test]
    fn test_yields_records_in_order() {
        let data = frame(&[b"first", b"second", b"third"]);
        let records: Vec<_> = collect(&data, &AnalyzerConfig::default())
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].as_bytes(), b"first");
        assert_eq!(records[1].as_bytes(), b"second");
        assert_eq!(records[2].as_bytes(), b"third");
        assert_eq!(records[1].index, 1);
        assert_eq!(records[1].offset, 6);
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        assert!(collect(&[], &AnalyzerConfig::default()).is_empty());
    }

    #[test]
    fn test_lone_zero_length_header() {
        let records = collect(&[0x00], &AnalyzerConfig::default());
        assert_eq!(records.len(), 1);
        assert!(records[0].as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_multi_byte_length_prefix() {
        let payload = vec![b'a'; 300];
        let mut data = vec![0xAC, 0x02];
        data.extend_from_slice(&payload);

        let records = collect(&data, &AnalyzerConfig::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().len(), 300);
    }

    #[test]
    fn test_file_too_large_is_checked_before_reading() {
        let config = AnalyzerConfig::new().max_file_size(10);
        let err = RecordStream::new(UnreadableSource, 11, &config).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { size: 11, max: 10 }));
    }

    #[test]
    fn test_truncated_payload() {
        let data = [0x09, b'a', b'b', b'c'];
        let records = collect(&data, &AnalyzerConfig::default());
        assert_eq!(records.len(), 1);
        assert!(matches!(
            records[0],
            Err(Error::TruncatedStream {
                offset: 1,
                needed: 9,
                available: 3
            })
        ));
    }

    #[test]
    fn test_truncated_payload_with_understated_size() {
        // The declared size claims more bytes than the reader delivers
        let data: &[u8] = &[0x05, b'a', b'b'];
        let mut stream = RecordStream::new(data, 100, &AnalyzerConfig::default()).unwrap();
        assert!(matches!(
            stream.next(),
            Some(Err(Error::TruncatedStream { available: 2, .. }))
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_truncated_length_prefix() {
        let mut data = frame(&[b"ok"]);
        data.push(0x80);

        let records = collect(&data, &AnalyzerConfig::default());
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(matches!(records[1], Err(Error::TruncatedStream { offset: 3, .. })));
    }

    #[test]
    fn test_overlong_length_prefix() {
        let data = [0xFF; 12];
        let records = collect(&data, &AnalyzerConfig::default());
        assert!(matches!(
            records[0],
            Err(Error::MalformedVarint {
                offset: 0,
                truncated: false
            })
        ));
    }

    #[test]
    fn test_record_too_large() {
        let data = frame(&[b"small", b"this one is too large"]);
        let config = AnalyzerConfig::new().max_record_size(8);

        let records = collect(&data, &config);
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(matches!(
            records[1],
            Err(Error::RecordTooLarge {
                index: 1,
                length: 21,
                max: 8,
                ..
            })
        ));
    }

    #[test]
    fn test_stream_is_fused_after_error() {
        let data = [0x09, b'a'];
        let mut stream = RecordStream::from_slice(&data, &AnalyzerConfig::default()).unwrap();
        assert!(matches!(stream.next(), Some(Err(_))));
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_open_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&frame(&[b"event"])).unwrap();

        let stream = RecordStream::open(file.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(stream.total_size(), 6);
        let records: Vec<_> = stream.collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_open_missing_file() {
        let err = RecordStream::open("/nonexistent/file.pb", &AnalyzerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }
}
