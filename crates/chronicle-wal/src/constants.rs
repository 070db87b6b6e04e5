//! System-wide constants for the write-ahead log.
//!
//! These values define the on-disk framing and are part of the wire
//! format. Changing any of them breaks compatibility with existing
//! log directories.

/// Size of a log page in bytes (32 KiB).
///
/// Pages are the unit of disk framing. Record frames never cross a
/// page boundary, which bounds the damage a torn write can do to the
/// trailing page of the trailing segment.
pub const PAGE_SIZE: usize = 32 * 1024;

/// Size of a record frame header in bytes.
///
/// Layout: type-and-flags (1), payload length (2, big-endian),
/// CRC-32C of the payload (4, big-endian).
pub const RECORD_HEADER_SIZE: usize = 7;

/// Default size of a segment file (128 MiB).
pub const DEFAULT_SEGMENT_SIZE: usize = 128 * 1024 * 1024;

/// Maximum payload bytes a single frame can carry.
///
/// The length field is 16 bits wide, but a frame must fit inside one
/// page together with its header, so this is the effective cap.
pub const MAX_FRAGMENT_PAYLOAD: usize = PAGE_SIZE - RECORD_HEADER_SIZE;

/// Number of pages buffered by the multi-segment reader (512 KiB).
pub const SEGMENT_BUF_PAGES: usize = 16;

/// Capacity of the deferred-fsync callback queue.
pub const FSYNC_QUEUE_CAPACITY: usize = 100;
