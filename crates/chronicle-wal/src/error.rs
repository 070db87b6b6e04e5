//! Error types for the write-ahead log.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error during WAL operations.
    #[error("wal I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// The configured segment size is not a positive multiple of the page size.
    #[error("invalid segment size {size}: must be a positive multiple of the page size")]
    InvalidSegmentSize {
        /// The rejected size.
        size: usize,
    },

    /// Segment indices in the directory have a gap.
    #[error("segments are not sequential")]
    NonSequentialSegments,

    /// A segment file name could not be parsed as an index.
    #[error("not a valid segment filename: {name}")]
    InvalidSegmentName {
        /// The offending file name.
        name: String,
    },

    /// A frame header declared a payload larger than a page can hold.
    #[error("invalid fragment size {size}")]
    InvalidFragmentSize {
        /// The declared payload size.
        size: usize,
    },

    /// A frame header carried an unknown record type.
    #[error("unexpected record type {value}")]
    InvalidRecordType {
        /// The raw type bits.
        value: u8,
    },

    /// Fewer bytes than a full frame header.
    #[error("truncated frame header: {len} bytes")]
    TruncatedHeader {
        /// Bytes available.
        len: usize,
    },

    /// The WAL has no segment accepting writes.
    #[error("no active segment")]
    NoActiveSegment,

    /// The WAL is already closed.
    #[error("wal is already closed")]
    Closed,

    /// A corruption error without a segment position cannot be repaired.
    #[error("corruption error does not specify position")]
    UnknownCorruptionPosition,

    /// Snappy compression failed on the write path.
    #[error("snappy compression failed: {source}")]
    Compression {
        /// The underlying codec error.
        #[from]
        source: snap::Error,
    },

    /// Corruption found while reading the log.
    #[error(transparent)]
    Corruption(#[from] CorruptionErr),
}

impl WalError {
    /// Returns the corruption details if this is a corruption error.
    pub fn corruption(&self) -> Option<&CorruptionErr> {
        match self {
            Self::Corruption(c) => Some(c),
            _ => None,
        }
    }

    /// Returns true if this error signals on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        self.corruption().is_some()
    }
}

/// Structured description of corruption found while reading.
///
/// `segment` is `None` when the underlying reader cannot attribute the
/// failure to a particular segment file; `offset` then counts total
/// bytes consumed from the stream instead of an intra-segment offset.
#[derive(Debug, Clone)]
pub struct CorruptionErr {
    /// Directory of the damaged log.
    pub dir: PathBuf,
    /// Index of the damaged segment, if known.
    pub segment: Option<u64>,
    /// Byte offset of the first unreadable data.
    pub offset: u64,
    /// Human-readable cause.
    pub reason: String,
}

impl fmt::Display for CorruptionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.segment {
            Some(index) => write!(
                f,
                "corruption in segment {} at {}: {}",
                self.dir.join(format!("{:08}", index)).display(),
                self.offset,
                self.reason
            ),
            None => write!(f, "corruption after {} bytes: {}", self.offset, self.reason),
        }
    }
}

impl std::error::Error for CorruptionErr {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_corruption_display_with_segment() {
        let err = CorruptionErr {
            dir: PathBuf::from("/data/wal"),
            segment: Some(5),
            offset: 1234,
            reason: "unexpected checksum".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("00000005"));
        assert!(msg.contains("1234"));
        assert!(msg.contains("unexpected checksum"));
    }

    #[test]
    fn test_corruption_display_without_segment() {
        let err = CorruptionErr {
            dir: PathBuf::new(),
            segment: None,
            offset: 42,
            reason: "last record is torn".into(),
        };
        assert_eq!(err.to_string(), "corruption after 42 bytes: last record is torn");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let wal_err: WalError = io_err.into();
        assert!(matches!(wal_err, WalError::Io { .. }));
        assert!(!wal_err.is_corruption());
    }

    #[test]
    fn test_corruption_accessor() {
        let err = WalError::Corruption(CorruptionErr {
            dir: Path::new("/tmp/wal").to_path_buf(),
            segment: Some(0),
            offset: 0,
            reason: "bad".into(),
        });
        assert!(err.is_corruption());
        assert_eq!(err.corruption().unwrap().segment, Some(0));
    }
}
