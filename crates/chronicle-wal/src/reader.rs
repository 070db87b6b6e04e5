//! Replay of log records.
//!
//! Two layers: [`SegmentBufReader`] streams raw bytes across a
//! sequence of segment files while tracking which segment and offset
//! is being read, and [`WalReader`] reassembles record fragments from
//! any byte stream, validating headers and checksums as it goes.

use std::io::{self, Read};
use std::path::PathBuf;

use bytes::Buf;

use crate::constants::{PAGE_SIZE, RECORD_HEADER_SIZE, SEGMENT_BUF_PAGES};
use crate::error::{CorruptionErr, WalResult};
use crate::record::{checksum, RecordType, REC_TYPE_MASK, SNAPPY_MASK};
use crate::segment::{list_segments, SegmentRange, WalSegment};

/// A buffered byte stream over a sequence of segments.
///
/// Short, non-page-aligned segments are padded with synthesized zero
/// bytes up to the next page boundary before the reader advances to
/// the next segment. The current segment index must not advance early:
/// it is what corruption reports point repair at.
pub struct SegmentBufReader {
    segs: Vec<WalSegment>,
    /// Index into `segs`.
    cur: usize,
    /// Offset of served bytes into the current segment.
    off: usize,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl SegmentBufReader {
    /// Creates a reader over the given segments, in order.
    pub fn new(segs: Vec<WalSegment>) -> Self {
        Self {
            segs,
            cur: 0,
            off: 0,
            buf: vec![0u8; SEGMENT_BUF_PAGES * PAGE_SIZE],
            pos: 0,
            filled: 0,
        }
    }

    /// Opens every segment in `dir` for reading.
    pub fn over_dir(dir: impl Into<PathBuf>) -> WalResult<Self> {
        Self::over_ranges(&[SegmentRange::all(dir)])
    }

    /// Opens the segments selected by the given ranges, in order.
    pub fn over_ranges(ranges: &[SegmentRange]) -> WalResult<Self> {
        let mut segs = Vec::new();
        for range in ranges {
            for r in list_segments(&range.dir)? {
                if range.first.map_or(false, |first| r.index < first) {
                    continue;
                }
                if range.last.map_or(false, |last| r.index > last) {
                    break;
                }
                segs.push(WalSegment::open_read(range.dir.join(&r.name))?);
            }
        }
        Ok(Self::new(segs))
    }

    /// Index of the segment currently being read, if any.
    pub fn segment(&self) -> Option<u64> {
        self.segs.get(self.cur).map(|s| s.index())
    }

    /// Directory of the segment currently being read, if any.
    pub fn dir(&self) -> Option<PathBuf> {
        self.segs.get(self.cur).map(|s| s.dir().to_path_buf())
    }

    /// Byte offset into the current segment.
    pub fn offset(&self) -> usize {
        self.off
    }
}

impl Read for SegmentBufReader {
    fn read(&mut self, b: &mut [u8]) -> io::Result<usize> {
        loop {
            // Serve buffered bytes first.
            if self.pos < self.filled {
                let n = (self.filled - self.pos).min(b.len());
                b[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                self.off += n;
                return Ok(n);
            }
            if b.is_empty() {
                return Ok(0);
            }

            let seg = match self.segs.get_mut(self.cur) {
                Some(seg) => seg,
                None => return Ok(0),
            };
            let n = seg.read(&mut self.buf)?;
            if n > 0 {
                self.pos = 0;
                self.filled = n;
                continue;
            }

            // EOF mid-page: fake out zero padding so the current
            // segment index stays attributable in corruption reports.
            if self.off % PAGE_SIZE != 0 {
                let mut i = 0;
                while i < b.len() && (self.off + i) % PAGE_SIZE != 0 {
                    b[i] = 0;
                    i += 1;
                }
                self.off += i;
                return Ok(i);
            }

            // EOF at a page boundary: advance, or report end of stream.
            if self.cur + 1 >= self.segs.len() {
                return Ok(0);
            }
            self.cur += 1;
            self.off = 0;
        }
    }
}

/// Source of bytes for a [`WalReader`].
///
/// A segment stream can attribute errors to a segment and offset; an
/// opaque reader can only report total bytes consumed.
enum ByteSource {
    Segments(SegmentBufReader),
    Opaque(Box<dyn Read>),
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Segments(r) => r.read(buf),
            Self::Opaque(r) => r.read(buf),
        }
    }
}

/// Reads whole records back out of a byte stream.
///
/// Call [`next`](WalReader::next) until it returns false, then check
/// [`err`](WalReader::err): `None` means a clean end of the log.
pub struct WalReader {
    src: ByteSource,
    rec: Vec<u8>,
    snappy_buf: Vec<u8>,
    frame_buf: Box<[u8; PAGE_SIZE]>,
    decoder: snap::raw::Decoder,
    /// Total bytes consumed from the source.
    total: u64,
    cur_rec_type: Option<RecordType>,
    err: Option<String>,
}

impl WalReader {
    /// Creates a reader over an arbitrary byte stream.
    pub fn new(rdr: Box<dyn Read>) -> Self {
        Self::with_source(ByteSource::Opaque(rdr))
    }

    /// Creates a reader over a segment stream.
    pub fn from_segments(segs: SegmentBufReader) -> Self {
        Self::with_source(ByteSource::Segments(segs))
    }

    /// Creates a reader over every segment in `dir`.
    pub fn over_dir(dir: impl Into<PathBuf>) -> WalResult<Self> {
        Ok(Self::from_segments(SegmentBufReader::over_dir(dir)?))
    }

    fn with_source(src: ByteSource) -> Self {
        Self {
            src,
            rec: Vec::new(),
            snappy_buf: Vec::new(),
            frame_buf: Box::new([0u8; PAGE_SIZE]),
            decoder: snap::raw::Decoder::new(),
            total: 0,
            cur_rec_type: None,
            err: None,
        }
    }

    /// Advances to the next record. Returns false at the end of the
    /// log; must not be called again after that.
    pub fn next(&mut self) -> bool {
        match self.advance() {
            Ok(true) => true,
            Ok(false) => {
                // A crash just before the final fragment reached disk
                // leaves the last record torn. Expected after a crash,
                // so the stream still ends here.
                if matches!(
                    self.cur_rec_type,
                    Some(RecordType::First) | Some(RecordType::Middle)
                ) {
                    self.err = Some("last record is torn".into());
                }
                false
            }
            Err(reason) => {
                self.err = Some(reason);
                false
            }
        }
    }

    fn advance(&mut self) -> Result<bool, String> {
        self.rec.clear();
        self.snappy_buf.clear();
        let mut record_compressed: Option<bool> = None;
        let mut i = 0u32;

        loop {
            let mut first = [0u8; 1];
            let n = self
                .src
                .read(&mut first)
                .map_err(|e| format!("read first header byte: {}", e))?;
            if n == 0 {
                return Ok(false);
            }
            self.total += 1;

            let raw = first[0] & REC_TYPE_MASK;
            let compressed = first[0] & SNAPPY_MASK != 0;
            let frag_type = RecordType::from_u8(raw);

            if frag_type == Some(RecordType::PageTerm) {
                self.cur_rec_type = frag_type;
                let k = PAGE_SIZE as u64 - (self.total % PAGE_SIZE as u64);
                if k == PAGE_SIZE as u64 {
                    // The terminator byte was the last byte of the page.
                    continue;
                }
                self.src
                    .read_exact(&mut self.frame_buf[..k as usize])
                    .map_err(|e| format!("read remaining zeros: {}", e))?;
                self.total += k;
                if self.frame_buf[..k as usize].iter().any(|&b| b != 0) {
                    return Err("unexpected non-zero byte in padded page".into());
                }
                continue;
            }

            let mut rest = [0u8; RECORD_HEADER_SIZE - 1];
            self.src
                .read_exact(&mut rest)
                .map_err(|e| format!("read remaining header: {}", e))?;
            self.total += rest.len() as u64;

            let mut hdr = &rest[..];
            let length = hdr.get_u16() as usize;
            let crc = hdr.get_u32();

            if length > PAGE_SIZE - RECORD_HEADER_SIZE {
                return Err(format!("invalid record size {}", length));
            }
            self.src
                .read_exact(&mut self.frame_buf[..length])
                .map_err(|e| format!("read record payload: {}", e))?;
            self.total += length as u64;

            let actual = checksum(&self.frame_buf[..length]);
            if actual != crc {
                return Err(format!("unexpected checksum {:x}, expected {:x}", actual, crc));
            }

            let frag_type = match frag_type {
                Some(t) => t,
                None => return Err(format!("unexpected record type {}", raw)),
            };
            self.cur_rec_type = Some(frag_type);
            match frag_type {
                RecordType::Full if i != 0 => return Err("unexpected full record".into()),
                RecordType::First if i != 0 => return Err("unexpected first record".into()),
                RecordType::Middle if i == 0 => return Err("unexpected middle record".into()),
                RecordType::Last if i == 0 => return Err("unexpected last record".into()),
                _ => {}
            }
            match record_compressed {
                None => record_compressed = Some(compressed),
                Some(flag) if flag != compressed => {
                    return Err("compression flag mismatch within record".into());
                }
                _ => {}
            }

            if compressed {
                self.snappy_buf.extend_from_slice(&self.frame_buf[..length]);
            } else {
                self.rec.extend_from_slice(&self.frame_buf[..length]);
            }

            if matches!(frag_type, RecordType::Full | RecordType::Last) {
                if compressed && !self.snappy_buf.is_empty() {
                    let len = snap::raw::decompress_len(&self.snappy_buf)
                        .map_err(|e| format!("invalid snappy data: {}", e))?;
                    self.rec.resize(len, 0);
                    let n = self
                        .decoder
                        .decompress(&self.snappy_buf, &mut self.rec)
                        .map_err(|e| format!("invalid snappy data: {}", e))?;
                    self.rec.truncate(n);
                }
                return Ok(true);
            }
            i += 1;
        }
    }

    /// The current record. Valid until the next call to
    /// [`next`](WalReader::next).
    pub fn record(&self) -> &[u8] {
        &self.rec
    }

    /// The last encountered failure as a corruption report, if any.
    pub fn err(&self) -> Option<CorruptionErr> {
        let reason = self.err.clone()?;
        match &self.src {
            ByteSource::Segments(r) => Some(CorruptionErr {
                dir: r.dir().unwrap_or_default(),
                segment: r.segment(),
                offset: r.offset() as u64,
                reason,
            }),
            ByteSource::Opaque(_) => Some(CorruptionErr {
                dir: PathBuf::new(),
                segment: None,
                offset: self.total,
                reason,
            }),
        }
    }

    /// Index of the segment being read, or `None` for an opaque source.
    pub fn segment(&self) -> Option<u64> {
        match &self.src {
            ByteSource::Segments(r) => r.segment(),
            ByteSource::Opaque(_) => None,
        }
    }

    /// Current read position: the intra-segment offset for a segment
    /// stream, total bytes consumed otherwise.
    pub fn offset(&self) -> u64 {
        match &self.src {
            ByteSource::Segments(r) => r.offset() as u64,
            ByteSource::Opaque(_) => self.total,
        }
    }
}
