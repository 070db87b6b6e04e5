//! Segment files and directory operations.
//!
//! A segment is one append-only file in the log directory, named by
//! its zero-padded decimal index (`00000000`, `00000001`, ...).
//! Indices of the segments present in a directory must form a
//! contiguous ascending range.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{WalError, WalResult};

/// A single segment file.
///
/// At most one segment per writer is active (accepting writes); all
/// others are opened read-only for replay.
pub struct WalSegment {
    file: File,
    dir: PathBuf,
    index: u64,
}

impl WalSegment {
    /// Creates (or reopens for appending) segment `index` in `dir`.
    ///
    /// Pre-existing content is preserved; new writes extend the tail.
    pub fn create(dir: &Path, index: u64) -> WalResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(segment_name(dir, index))?;
        Ok(Self {
            file,
            dir: dir.to_path_buf(),
            index,
        })
    }

    /// Opens a segment read-only, parsing the index from its file name.
    pub fn open_read(path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let index: u64 = name.parse().map_err(|_| WalError::InvalidSegmentName {
            name: name.to_string(),
        })?;
        let file = File::open(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        Ok(Self { file, dir, index })
    }

    /// Returns the index of this segment.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the directory this segment lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of this segment's file.
    pub fn path(&self) -> PathBuf {
        segment_name(&self.dir, self.index)
    }

    /// Appends raw bytes to the segment file.
    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    /// Returns the current file size in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Returns true if the segment file is empty.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Syncs the segment file to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

impl Read for WalSegment {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl std::fmt::Debug for WalSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalSegment")
            .field("dir", &self.dir)
            .field("index", &self.index)
            .finish()
    }
}

/// Builds the file path of segment `index` inside `dir`.
pub fn segment_name(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{:08}", index))
}

/// A segment file found by [`list_segments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// File name within the directory.
    pub name: String,
    /// Parsed segment index.
    pub index: u64,
}

/// Lists the segments of a directory in index order.
///
/// File names that do not parse as a decimal index are skipped. A gap
/// in the resulting index sequence is a fatal error.
pub fn list_segments(dir: &Path) -> WalResult<Vec<SegmentRef>> {
    let mut refs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Ok(index) = name.parse::<u64>() {
            refs.push(SegmentRef { name, index });
        }
    }
    refs.sort_by_key(|r| r.index);
    for pair in refs.windows(2) {
        if pair[0].index + 1 != pair[1].index {
            return Err(WalError::NonSequentialSegments);
        }
    }
    Ok(refs)
}

/// A range of segments in one directory.
///
/// `None` bounds are open on that end.
#[derive(Debug, Clone)]
pub struct SegmentRange {
    /// Directory holding the segments.
    pub dir: PathBuf,
    /// Lowest index to include, if bounded.
    pub first: Option<u64>,
    /// Highest index to include, if bounded.
    pub last: Option<u64>,
}

impl SegmentRange {
    /// Creates a range over `dir` bounded by `first` and `last`.
    pub fn new(dir: impl Into<PathBuf>, first: Option<u64>, last: Option<u64>) -> Self {
        Self {
            dir: dir.into(),
            first,
            last,
        }
    }

    /// Creates a range covering every segment in `dir`.
    pub fn all(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_segment_name_format() {
        let path = segment_name(Path::new("/data/wal"), 42);
        assert_eq!(path, PathBuf::from("/data/wal/00000042"));
    }

    #[test]
    fn test_create_and_open_read() {
        let tmp = TempDir::new().unwrap();

        let mut segment = WalSegment::create(tmp.path(), 3).unwrap();
        segment.write(b"hello").unwrap();
        segment.sync().unwrap();
        assert_eq!(segment.index(), 3);
        assert_eq!(segment.len().unwrap(), 5);
        drop(segment);

        let mut reopened = WalSegment::open_read(tmp.path().join("00000003")).unwrap();
        assert_eq!(reopened.index(), 3);
        assert_eq!(reopened.dir(), tmp.path());

        let mut buf = Vec::new();
        reopened.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn test_create_preserves_existing_content() {
        let tmp = TempDir::new().unwrap();

        let mut segment = WalSegment::create(tmp.path(), 0).unwrap();
        segment.write(b"abc").unwrap();
        drop(segment);

        let mut segment = WalSegment::create(tmp.path(), 0).unwrap();
        segment.write(b"def").unwrap();
        drop(segment);

        let data = fs::read(segment_name(tmp.path(), 0)).unwrap();
        assert_eq!(data, b"abcdef");
    }

    #[test]
    fn test_open_read_rejects_bad_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("not-a-segment");
        fs::write(&path, b"x").unwrap();

        assert!(matches!(
            WalSegment::open_read(&path),
            Err(WalError::InvalidSegmentName { .. })
        ));
    }

    #[test]
    fn test_list_segments_sorted() {
        let tmp = TempDir::new().unwrap();
        for i in [2u64, 0, 1] {
            fs::write(segment_name(tmp.path(), i), b"").unwrap();
        }
        // Foreign files are ignored.
        fs::write(tmp.path().join("00000001.repair"), b"").unwrap();
        fs::write(tmp.path().join("checkpoint"), b"").unwrap();

        let refs = list_segments(tmp.path()).unwrap();
        let indices: Vec<u64> = refs.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(refs[2].name, "00000002");
    }

    #[test]
    fn test_list_segments_detects_gap() {
        let tmp = TempDir::new().unwrap();
        fs::write(segment_name(tmp.path(), 0), b"").unwrap();
        fs::write(segment_name(tmp.path(), 2), b"").unwrap();

        assert!(matches!(
            list_segments(tmp.path()),
            Err(WalError::NonSequentialSegments)
        ));
    }

    #[test]
    fn test_list_segments_empty_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(list_segments(tmp.path()).unwrap().is_empty());
    }
}
