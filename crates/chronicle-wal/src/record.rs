//! Record frame codec.
//!
//! Every frame on disk is a 7-byte header followed by the payload:
//!
//! ```text
//! ┌───────────┬──────────┬─────────────┬──────────────┐
//! │ type <1b> │ len <2b> │ CRC32C <4b> │ data <bytes> │
//! └───────────┴──────────┴─────────────┴──────────────┘
//! ```
//!
//! The first byte packs the record type into bits 0-2 and the Snappy
//! compression flag into bit 3; bits 4-7 are reserved zero. Length and
//! CRC are big-endian. The CRC covers the payload only, after any
//! compression.

use bytes::{Buf, BufMut};

use crate::constants::{MAX_FRAGMENT_PAYLOAD, RECORD_HEADER_SIZE};
use crate::error::{WalError, WalResult};

/// Bit 3 of the type byte marks a Snappy-compressed payload.
pub const SNAPPY_MASK: u8 = 1 << 3;

/// Mask extracting the record type from the type byte.
pub const REC_TYPE_MASK: u8 = SNAPPY_MASK - 1;

/// Type of a record frame.
///
/// A logical record is either a single `Full` frame or a
/// `First`, `Middle`*, `Last` sequence within one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// The rest of the page is zero padding.
    PageTerm = 0,
    /// A whole record in one frame.
    Full = 1,
    /// First fragment of a record.
    First = 2,
    /// Middle fragment of a record.
    Middle = 3,
    /// Final fragment of a record.
    Last = 4,
}

impl RecordType {
    /// Decodes a raw type value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PageTerm),
            1 => Some(Self::Full),
            2 => Some(Self::First),
            3 => Some(Self::Middle),
            4 => Some(Self::Last),
            _ => None,
        }
    }

    /// Decodes the type bits of a frame's first header byte.
    pub fn from_header_byte(byte: u8) -> Option<Self> {
        Self::from_u8(byte & REC_TYPE_MASK)
    }

    /// Returns the raw type value.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PageTerm => "zero",
            Self::Full => "full",
            Self::First => "first",
            Self::Middle => "middle",
            Self::Last => "last",
        };
        write!(f, "{}", name)
    }
}

/// Returns true if the header byte carries the compression flag.
pub fn is_compressed(byte: u8) -> bool {
    byte & SNAPPY_MASK != 0
}

/// Computes the CRC-32C (Castagnoli) checksum of a payload.
pub fn checksum(payload: &[u8]) -> u32 {
    crc32c::crc32c(payload)
}

/// Decoded form of the 7-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type.
    pub rec_type: RecordType,
    /// Whether the payload is Snappy-compressed.
    pub compressed: bool,
    /// Payload length in bytes.
    pub length: u16,
    /// CRC-32C of the payload bytes.
    pub crc: u32,
}

impl FrameHeader {
    /// Size of the encoded header in bytes.
    pub const SIZE: usize = RECORD_HEADER_SIZE;

    /// Serializes the header.
    ///
    /// Writes exactly [`FrameHeader::SIZE`] bytes.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut ty = self.rec_type.as_u8();
        if self.compressed {
            ty |= SNAPPY_MASK;
        }
        buf.put_u8(ty);
        buf.put_u16(self.length);
        buf.put_u32(self.crc);
    }

    /// Deserializes a header from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> WalResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(WalError::TruncatedHeader { len: bytes.len() });
        }
        let mut buf = bytes;
        let ty = buf.get_u8();
        let rec_type = RecordType::from_header_byte(ty)
            .ok_or(WalError::InvalidRecordType { value: ty & REC_TYPE_MASK })?;
        let length = buf.get_u16();
        let crc = buf.get_u32();
        if length as usize > MAX_FRAGMENT_PAYLOAD {
            return Err(WalError::InvalidFragmentSize { size: length as usize });
        }
        Ok(Self {
            rec_type,
            compressed: is_compressed(ty),
            length,
            crc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader {
            rec_type: RecordType::First,
            compressed: true,
            length: 12_345,
            crc: 0xDEAD_BEEF,
        };

        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), FrameHeader::SIZE);

        let decoded = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_type_bits_and_flag() {
        let mut buf = Vec::new();
        FrameHeader {
            rec_type: RecordType::Last,
            compressed: true,
            length: 0,
            crc: 0,
        }
        .encode(&mut buf);

        assert_eq!(buf[0] & REC_TYPE_MASK, RecordType::Last.as_u8());
        assert!(is_compressed(buf[0]));
        assert_eq!(buf[0] & 0xF0, 0, "reserved bits must stay zero");
    }

    #[test]
    fn test_invalid_type_rejected() {
        let buf = [7u8, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(WalError::InvalidRecordType { value: 7 })
        ));
    }

    #[test]
    fn test_oversized_fragment_rejected() {
        let mut buf = vec![RecordType::Full.as_u8()];
        buf.extend_from_slice(&(MAX_FRAGMENT_PAYLOAD as u16 + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(WalError::InvalidFragmentSize { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            FrameHeader::decode(&[1, 2, 3]),
            Err(WalError::TruncatedHeader { len: 3 })
        ));
    }

    #[test]
    fn test_checksum_is_castagnoli() {
        // Known CRC-32C vector from RFC 3720.
        assert_eq!(checksum(b"123456789"), 0xE306_9283);
        assert_ne!(checksum(b"hello"), checksum(b"hellp"));
    }

    #[test]
    fn test_type_display() {
        assert_eq!(RecordType::PageTerm.to_string(), "zero");
        assert_eq!(RecordType::Full.to_string(), "full");
        assert_eq!(RecordType::First.to_string(), "first");
        assert_eq!(RecordType::Middle.to_string(), "middle");
        assert_eq!(RecordType::Last.to_string(), "last");
    }
}
