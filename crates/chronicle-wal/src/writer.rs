//! The write-ahead log itself.
//!
//! The log stores opaque byte records in page-framed, append-only
//! segment files. It must be replayed from start to end once before
//! logging new data; if replay reports corruption, [`Wal::repair`]
//! must run before further writes are safe.
//!
//! Records may span pages but never segments, so full segments can be
//! truncated safely and a torn write can only ever damage the trailing
//! page of the trailing segment.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use prometheus::Registry;

use crate::config::WalConfig;
use crate::constants::{FSYNC_QUEUE_CAPACITY, PAGE_SIZE, RECORD_HEADER_SIZE};
use crate::error::{CorruptionErr, WalError, WalResult};
use crate::metrics::WalMetrics;
use crate::page::Page;
use crate::reader::WalReader;
use crate::record::{checksum, FrameHeader, RecordType};
use crate::segment::{list_segments, segment_name, WalSegment};

/// Callback executed on the deferred-fsync worker.
type ActorFn = Box<dyn FnOnce() + Send + 'static>;

/// Mutable writer state, guarded by the one writer mutex.
struct WalInner {
    /// Active segment, the only one accepting writes.
    segment: Option<WalSegment>,
    /// Active page.
    page: Page,
    /// Pages already completed in the active segment.
    done_pages: usize,
    /// Reusable compression output buffer.
    snappy_buf: Vec<u8>,
    snappy: snap::raw::Encoder,
    /// Queue feeding the fsync worker. Dropped on close so the worker
    /// drains and exits.
    actor_tx: Option<Sender<ActorFn>>,
    closed: bool,
}

/// A write-ahead log over a directory of segment files.
///
/// All public write operations serialize on an internal mutex; readers
/// operate on independent file descriptors and may run concurrently
/// with the single writer. The directory is assumed to be exclusively
/// owned by one writer.
pub struct Wal {
    dir: PathBuf,
    segment_size: usize,
    compress: bool,
    metrics: WalMetrics,
    inner: Mutex<WalInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Creates a WAL ready for writing.
    ///
    /// The directory is created if absent and scanned for existing
    /// segments; a fresh segment opens at the last found index plus
    /// one. Fails if the segment size is invalid or the existing
    /// segment indices have a gap.
    pub fn new(config: WalConfig, registry: Option<&Registry>) -> WalResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir)?;

        let metrics = WalMetrics::new(registry);
        let refs = list_segments(&config.dir)?;
        let write_index = refs.last().map(|r| r.index + 1).unwrap_or(0);

        let (tx, rx) = bounded::<ActorFn>(FSYNC_QUEUE_CAPACITY);
        let worker = thread::Builder::new()
            .name("wal-fsync".into())
            .spawn(move || {
                // Runs every queued callback, then drains the rest of
                // the queue once the sender is gone.
                for f in rx {
                    f();
                }
            })?;

        let wal = Self {
            dir: config.dir,
            segment_size: config.segment_size,
            compress: config.compress,
            metrics,
            inner: Mutex::new(WalInner {
                segment: None,
                page: Page::new(),
                done_pages: 0,
                snappy_buf: Vec::new(),
                snappy: snap::raw::Encoder::new(),
                actor_tx: Some(tx),
                closed: false,
            }),
            worker: Mutex::new(Some(worker)),
        };

        {
            let mut inner = wal.inner.lock();
            let segment = WalSegment::create(&wal.dir, write_index)?;
            wal.set_segment(&mut inner, segment)?;
        }

        Ok(wal)
    }

    /// Opens an existing WAL directory without creating a segment.
    ///
    /// The handle supports [`segments`](Wal::segments),
    /// [`truncate`](Wal::truncate) and [`size`](Wal::size); logging
    /// fails until a writer is constructed with [`Wal::new`].
    pub fn open(dir: impl Into<PathBuf>) -> WalResult<Self> {
        Ok(Self {
            dir: dir.into(),
            segment_size: WalConfig::default().segment_size,
            compress: false,
            metrics: WalMetrics::new(None),
            inner: Mutex::new(WalInner {
                segment: None,
                page: Page::new(),
                done_pages: 0,
                snappy_buf: Vec::new(),
                snappy: snap::raw::Encoder::new(),
                actor_tx: None,
                closed: false,
            }),
            worker: Mutex::new(None),
        })
    }

    /// Returns the directory of the WAL.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the configured segment size in bytes.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Returns whether compression is enabled on this WAL.
    pub fn compression_enabled(&self) -> bool {
        self.compress
    }

    fn pages_per_segment(&self) -> usize {
        self.segment_size / PAGE_SIZE
    }

    /// Appends a batch of records.
    ///
    /// Records are persisted in submission order; the last record of
    /// the batch triggers a page flush, so a caller that syncs after
    /// this returns sees its bytes staged to the OS. On failure the
    /// prior frames stay valid and replay may return fewer records
    /// than were offered.
    pub fn log<R: AsRef<[u8]>>(&self, records: &[R]) -> WalResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WalError::Closed);
        }
        if inner.segment.is_none() {
            return Err(WalError::NoActiveSegment);
        }
        let last = records.len().saturating_sub(1);
        for (i, rec) in records.iter().enumerate() {
            if let Err(e) = self.append(&mut inner, rec.as_ref(), i == last) {
                self.metrics.writes_failed.inc();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Writes one record, forcing a page flush when it is the final
    /// record of a batch, when a fragment fills the page, or when the
    /// page was left full by an earlier failed flush.
    fn append(&self, inner: &mut WalInner, rec: &[u8], final_rec: bool) -> WalResult<()> {
        let mut rec: &[u8] = rec;
        // A failed flush leaves the page full; retry it before adding
        // more frames.
        if inner.page.is_full() {
            self.flush_page(inner, true)?;
        }

        // Free space in the active page plus the free pages left in
        // the active segment. If the record cannot fit, rotate so it
        // never crosses a segment boundary.
        let left = (inner.page.remaining() as i64 - RECORD_HEADER_SIZE as i64)
            + (PAGE_SIZE - RECORD_HEADER_SIZE) as i64
                * (self.pages_per_segment() as i64 - inner.done_pages as i64 - 1);
        if rec.len() as i64 > left {
            self.advance_segment(inner)?;
        }

        let mut compressed = false;
        let mut snappy_buf = std::mem::take(&mut inner.snappy_buf);
        if self.compress && !rec.is_empty() {
            let max = snap::raw::max_compress_len(rec.len());
            if snappy_buf.len() < max {
                snappy_buf.resize(max, 0);
            }
            let n = inner.snappy.compress(rec, &mut snappy_buf)?;
            // Only take the encoded form when it is strictly smaller.
            if n < rec.len() {
                rec = &snappy_buf[..n];
                compressed = true;
            }
        }

        // One pass always runs so zero-length records still produce a
        // Full frame.
        let mut i = 0;
        loop {
            let l = rec.len().min(inner.page.remaining() - RECORD_HEADER_SIZE);
            let (part, rest) = rec.split_at(l);

            let rec_type = if i == 0 && rest.is_empty() {
                RecordType::Full
            } else if rest.is_empty() {
                RecordType::Last
            } else if i == 0 {
                RecordType::First
            } else {
                RecordType::Middle
            };

            let header = FrameHeader {
                rec_type,
                compressed,
                length: part.len() as u16,
                crc: checksum(part),
            };
            let page = &mut inner.page;
            let alloc = page.alloc;
            {
                let mut hdr = &mut page.buf[alloc..alloc + RECORD_HEADER_SIZE];
                header.encode(&mut hdr);
            }
            page.buf[alloc + RECORD_HEADER_SIZE..alloc + RECORD_HEADER_SIZE + l]
                .copy_from_slice(part);
            page.alloc += l + RECORD_HEADER_SIZE;

            if inner.page.is_full() {
                self.flush_page(inner, true)?;
            }
            rec = rest;
            i += 1;
            if rec.is_empty() {
                break;
            }
        }
        inner.snappy_buf = snappy_buf;

        if final_rec && inner.page.alloc > 0 {
            self.flush_page(inner, false)?;
        }
        Ok(())
    }

    /// Writes the unflushed part of the page to the active segment.
    ///
    /// With `clear` set (or when the page is full) the allocation
    /// cursor is first raised to the page end so trailing bytes go to
    /// disk as zeros, completing the page, and the page is reset.
    fn flush_page(&self, inner: &mut WalInner, clear: bool) -> WalResult<()> {
        self.metrics.page_flushes.inc();

        let clear = clear || inner.page.is_full();
        if clear {
            inner.page.alloc = PAGE_SIZE;
        }

        {
            let WalInner { segment, page, .. } = &mut *inner;
            let segment = segment.as_mut().ok_or(WalError::NoActiveSegment)?;
            let n = segment.write(&page.buf[page.flushed..page.alloc])?;
            page.flushed += n;
        }

        if clear {
            inner.page.reset();
            inner.done_pages += 1;
            self.metrics.page_completions.inc();
        }
        Ok(())
    }

    /// Creates the next segment and closes the previous one.
    pub fn next_segment(&self) -> WalResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WalError::Closed);
        }
        self.advance_segment(&mut inner)
    }

    fn advance_segment(&self, inner: &mut WalInner) -> WalResult<()> {
        // Only flush the current page if it actually holds data.
        if inner.page.alloc > 0 {
            self.flush_page(inner, true)?;
        }

        let cur_index = inner
            .segment
            .as_ref()
            .ok_or(WalError::NoActiveSegment)?
            .index();
        let next = WalSegment::create(&self.dir, cur_index + 1)?;
        let prev = self.set_segment(inner, next)?;

        // Fsyncing the previous segment must not block further writes;
        // hand it to the worker, which takes ownership.
        if let Some(prev) = prev {
            let fsync_duration = self.metrics.fsync_duration.clone();
            let task: ActorFn = Box::new(move || {
                let timer = fsync_duration.start_timer();
                let res = prev.sync();
                timer.observe_duration();
                if let Err(e) = res {
                    tracing::error!(error = %e, "sync previous segment");
                }
            });
            if let Some(tx) = &inner.actor_tx {
                if tx.send(task).is_err() {
                    tracing::error!("fsync worker is gone, segment closes unsynced");
                }
            }
        }
        Ok(())
    }

    /// Installs `segment` as the active one, returning the previous.
    fn set_segment(
        &self,
        inner: &mut WalInner,
        segment: WalSegment,
    ) -> WalResult<Option<WalSegment>> {
        let len = segment.len()?;
        inner.done_pages = (len / PAGE_SIZE as u64) as usize;
        self.metrics.current_segment.set(segment.index() as i64);
        Ok(inner.segment.replace(segment))
    }

    /// Returns the range `(first, last)` of existing segment indices,
    /// or `None` when the directory holds none.
    pub fn segments(&self) -> WalResult<Option<(u64, u64)>> {
        let refs = list_segments(&self.dir)?;
        Ok(refs.first().zip(refs.last()).map(|(f, l)| (f.index, l.index)))
    }

    /// Deletes all segments with an index below `index`.
    ///
    /// Best effort until the first error: a failed delete aborts and
    /// leaves the remaining segments in place.
    pub fn truncate(&self, index: u64) -> WalResult<()> {
        let _inner = self.inner.lock();
        self.metrics.truncate_total.inc();
        let res = self.truncate_locked(index);
        if res.is_err() {
            self.metrics.truncate_failed.inc();
        }
        res
    }

    fn truncate_locked(&self, index: u64) -> WalResult<()> {
        for r in list_segments(&self.dir)? {
            if r.index >= index {
                break;
            }
            fs::remove_file(self.dir.join(&r.name))?;
        }
        Ok(())
    }

    /// Total size in bytes of all files under the WAL directory.
    pub fn size(&self) -> WalResult<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let meta = entry?.metadata()?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Flushes the active page, stops the fsync worker and closes the
    /// active segment.
    ///
    /// By the time this returns, every previously enqueued fsync has
    /// completed. A second call returns [`WalError::Closed`] without
    /// blocking.
    pub fn close(&self) -> WalResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WalError::Closed);
        }
        if inner.segment.is_none() {
            inner.closed = true;
            return Ok(());
        }

        // Flush the last page and zero out its remaining bytes. An
        // empty page must not be flushed: it would falsely terminate
        // the segment if writing resumes after a reopen.
        if inner.page.alloc > 0 {
            self.flush_page(&mut inner, true)?;
        }

        // Dropping the sender stops the worker once the queue drains.
        inner.actor_tx.take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }

        if let Some(segment) = inner.segment.take() {
            let timer = self.metrics.fsync_duration.start_timer();
            let res = segment.sync();
            timer.observe_duration();
            if let Err(e) = res {
                tracing::error!(error = %e, "sync active segment on close");
                inner.closed = true;
                return Err(e.into());
            }
        }
        inner.closed = true;
        Ok(())
    }

    /// Repairs the WAL after a corrupted replay, truncating at the
    /// first unreadable record.
    ///
    /// All segments newer than the corrupted one are deleted, the
    /// corrupted segment is rewritten up to the corruption offset, and
    /// writing resumes in a fresh segment one past it. Records at or
    /// after the corruption offset are lost.
    pub fn repair(&self, cerr: &CorruptionErr) -> WalResult<()> {
        let damaged = cerr.segment.ok_or(WalError::UnknownCorruptionPosition)?;
        tracing::warn!(
            segment = damaged,
            offset = cerr.offset,
            "starting corruption repair"
        );

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(WalError::Closed);
        }

        let refs = list_segments(&self.dir)?;
        tracing::warn!(
            segment = damaged,
            "deleting all segments newer than corrupted segment"
        );
        for r in &refs {
            if inner.segment.as_ref().map(WalSegment::index) == Some(r.index) {
                // The active segment may be deleted or renamed below;
                // release its handle first.
                inner.segment.take();
            }
            if r.index <= damaged {
                continue;
            }
            fs::remove_file(self.dir.join(&r.name))?;
        }

        tracing::warn!(segment = damaged, "rewriting corrupted segment");
        let damaged_path = segment_name(&self.dir, damaged);
        let mut repair_path = damaged_path.clone().into_os_string();
        repair_path.push(".repair");
        let repair_path = PathBuf::from(repair_path);
        fs::rename(&damaged_path, &repair_path)?;

        let fresh = WalSegment::create(&self.dir, damaged)?;
        self.set_segment(&mut inner, fresh)?;
        // The page may still hold frames belonging to the renamed
        // file; they must not resume at the wrong offset in the fresh
        // segment.
        inner.page.reset();

        let damaged_file = File::open(&repair_path)?;
        let mut r = WalReader::new(Box::new(BufReader::new(damaged_file)));
        while r.next() {
            // Add records only up to where the corruption was.
            if r.offset() >= cerr.offset {
                break;
            }
            let rec = r.record();
            self.append(&mut inner, rec, true)?;
        }
        // Reading the damaged file is expected to fail again at the
        // corruption; nothing to handle.
        drop(r);

        // Pad to the end of the last page so the repaired segment ends
        // on a page boundary.
        self.flush_page(&mut inner, true)?;

        fs::remove_file(&repair_path)?;

        // Always resume in a fresh segment past the repaired one.
        let next = WalSegment::create(&self.dir, damaged + 1)?;
        let prev = self.set_segment(&mut inner, next)?;
        drop(prev);

        Ok(())
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("segment_size", &self.segment_size)
            .field("compress", &self.compress)
            .finish()
    }
}
