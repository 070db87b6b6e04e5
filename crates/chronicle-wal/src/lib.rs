//! # chronicle-wal
//!
//! Segmented write-ahead log for the Chronicle time-series engine.
//!
//! Clients append opaque byte records; the log persists them in
//! append-only segment files framed into 32 KiB pages, supports
//! sequential replay from any segment, detects corruption through
//! CRC-32C checksums and can repair itself by truncating at the first
//! unreadable record. It is the durability substrate consulted after a
//! crash to rebuild in-memory state that had not yet reached immutable
//! blocks.
//!
//! ## Example
//!
//! ```no_run
//! use chronicle_wal::{Wal, WalConfig, WalReader};
//!
//! # fn main() -> chronicle_wal::WalResult<()> {
//! let wal = Wal::new(WalConfig::new("data/wal"), None)?;
//! wal.log(&[b"sample data"])?;
//! wal.close()?;
//!
//! let mut reader = WalReader::over_dir("data/wal")?;
//! while reader.next() {
//!     let _record = reader.record();
//! }
//! if let Some(corruption) = reader.err() {
//!     let wal = Wal::new(WalConfig::new("data/wal"), None)?;
//!     wal.repair(&corruption)?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// WAL configuration.
pub mod config;

/// On-disk format constants.
pub mod constants;

/// Error types.
pub mod error;

mod metrics;
mod page;

/// Record replay.
pub mod reader;

/// Record frame codec.
pub mod record;

/// Segment files and directory operations.
pub mod segment;

/// The log writer.
pub mod writer;

pub use config::WalConfig;
pub use error::{CorruptionErr, WalError, WalResult};
pub use reader::{SegmentBufReader, WalReader};
pub use record::RecordType;
pub use segment::{list_segments, segment_name, SegmentRange, SegmentRef, WalSegment};
pub use writer::Wal;
