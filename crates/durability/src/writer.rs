//! The WAL writer: sequence assignment, sync/batch write modes, rotation,
//! compression, and prefix truncation. One struct owns the active segment
//! plus config, with `append`/`flush`/`rotate_segment`/`close` methods and a
//! switch between sync and batched writes.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::WalConfig;
use crate::error::{Error, Result};
use crate::format::{WalRecord, FLAG_COMPRESSED};
use crate::segment::{list_segment_paths, segment_file_name, WalSegment};

/// `segment_number -> (min_seq, max_seq)`, the bookkeeping the WAL uniquely
/// owns per §3 Ownership.
pub type SegmentRanges = BTreeMap<u64, (i64, i64)>;

/// Write mode, selected from [`WalConfig::enable_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Every append fsyncs before returning.
    Sync,
    /// Appends accumulate in memory; a single fsync covers a flushed batch.
    Batch,
}

/// Operational counters surfaced for operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalCounters {
    /// Total records appended (sync or batched).
    pub records_appended: u64,
    /// Total payload+header bytes written to segment files.
    pub bytes_written: u64,
    /// Total fsyncs issued.
    pub fsyncs: u64,
    /// Total segment rotations performed.
    pub segments_rotated: u64,
    /// Total whole segments removed by truncation.
    pub segments_truncated: u64,
}

fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    // Directory fsync is a no-op on platforms without directory handles
    // (e.g. Windows); best-effort elsewhere.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

fn maybe_compress(config: &WalConfig, payload: &[u8]) -> (u8, Vec<u8>) {
    if !config.enable_compress || payload.len() < config.compress_min_bytes {
        return (0, payload.to_vec());
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(payload).is_err() {
        return (0, payload.to_vec());
    }
    match encoder.finish() {
        Ok(compressed) if (compressed.len() as f64) <= config.compress_min_ratio * payload.len() as f64 => {
            (FLAG_COMPRESSED, compressed)
        }
        _ => (0, payload.to_vec()),
    }
}

/// Decompress a record's payload if [`FLAG_COMPRESSED`] is set.
pub fn decompress_if_needed(record: &WalRecord) -> Result<Vec<u8>> {
    if !record.is_compressed() {
        return Ok(record.payload.clone());
    }
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut decoder = GzDecoder::new(record.payload.as_slice());
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// The resume point a recovery scan hands to [`WalWriter::resume`].
#[derive(Debug, Clone)]
pub struct ResumePoint {
    /// Next sequence number to assign (1 + max seq seen across all files).
    pub next_seq: i64,
    /// Numeric identity of the segment the writer should keep appending to.
    pub active_segment_number: u64,
    /// Byte length that segment was truncated/validated to.
    pub active_segment_len: u64,
    /// Per-segment `(min_seq, max_seq)` bookkeeping recovered from the scan.
    pub segment_ranges: SegmentRanges,
}

/// The WAL writer: owns the active segment and all append/rotate/truncate
/// logic.
pub struct WalWriter {
    segment: WalSegment,
    dir: PathBuf,
    config: WalConfig,
    mode: WriteMode,
    next_seq: i64,
    pending: Vec<(i64, Vec<u8>)>,
    pending_since: Option<Instant>,
    current_range: Option<(i64, i64)>,
    segment_ranges: SegmentRanges,
    closed: bool,
    counters: WalCounters,
}

impl WalWriter {
    /// Start a brand-new WAL in `config.dir` (no prior segments).
    pub fn create_new(config: WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let segment = WalSegment::create(&config.dir, 0)?;
        let mode = if config.enable_batch {
            WriteMode::Batch
        } else {
            WriteMode::Sync
        };
        Ok(WalWriter {
            dir: config.dir.clone(),
            segment,
            config,
            mode,
            next_seq: 1,
            pending: Vec::new(),
            pending_since: None,
            current_range: None,
            segment_ranges: SegmentRanges::new(),
            closed: false,
            counters: WalCounters::default(),
        })
    }

    /// Resume a WAL after a recovery scan determined `resume`.
    pub fn resume(config: WalConfig, resume: ResumePoint) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let path = config.dir.join(segment_file_name(resume.active_segment_number));
        let segment = if path.exists() {
            WalSegment::open_append(&path, resume.active_segment_number, resume.active_segment_len)?
        } else {
            WalSegment::create(&config.dir, resume.active_segment_number)?
        };
        let mode = if config.enable_batch {
            WriteMode::Batch
        } else {
            WriteMode::Sync
        };
        Ok(WalWriter {
            dir: config.dir.clone(),
            segment,
            config,
            mode,
            next_seq: resume.next_seq,
            pending: Vec::new(),
            pending_since: None,
            current_range: None,
            segment_ranges: resume.segment_ranges,
            closed: false,
            counters: WalCounters::default(),
        })
    }

    /// A snapshot of operational counters.
    pub fn counters(&self) -> WalCounters {
        self.counters
    }

    /// Append `payload`, assigning it the next sequence number under this
    /// call (the WAL's lock is whatever external mutex guards `&mut self`).
    /// Reservation happens before any I/O and is never rolled back.
    pub fn append(&mut self, payload: &[u8]) -> Result<i64> {
        if self.closed {
            return Err(Error::Closed);
        }
        let offset = self.next_seq;
        self.next_seq += 1;

        let (flags, bytes) = maybe_compress(&self.config, payload);
        let record = WalRecord::new(offset, flags, bytes);
        let encoded = record.to_bytes();

        match self.mode {
            WriteMode::Sync => {
                self.write_one(offset, &encoded)?;
                self.segment.sync()?;
                self.counters.fsyncs += 1;
            }
            WriteMode::Batch => {
                if self.pending.is_empty() {
                    self.pending_since = Some(Instant::now());
                }
                self.pending.push((offset, encoded));
                if self.pending.len() >= self.config.batch_size
                    || self
                        .pending_since
                        .is_some_and(|t| t.elapsed() >= self.config.batch_interval)
                {
                    self.flush()?;
                }
            }
        }
        Ok(offset)
    }

    /// Flush the in-memory batch if one is due by time, without requiring a
    /// new append. Intended to be called by a background ticker.
    pub fn poll_flush(&mut self) -> Result<()> {
        if self.mode == WriteMode::Batch
            && self
                .pending_since
                .is_some_and(|t| t.elapsed() >= self.config.batch_interval)
        {
            self.flush()?;
        }
        Ok(())
    }

    /// Write every buffered record to the active segment and fsync once.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        for (offset, encoded) in &pending {
            self.write_one(*offset, encoded)?;
        }
        self.segment.sync()?;
        self.counters.fsyncs += 1;
        self.pending_since = None;
        Ok(())
    }

    fn write_one(&mut self, offset: i64, encoded: &[u8]) -> Result<()> {
        if self.segment.size() + encoded.len() as u64 > self.config.max_file_size {
            self.rotate_segment()?;
        }
        self.segment.append(encoded)?;
        self.counters.bytes_written += encoded.len() as u64;
        self.counters.records_appended += 1;
        self.current_range = Some(match self.current_range {
            Some((min, _)) => (min, offset),
            None => (offset, offset),
        });
        Ok(())
    }

    /// Finalize the active segment and start a new one.
    pub fn rotate_segment(&mut self) -> Result<()> {
        self.close_active_segment()?;
        let next_number = self.segment.number() + 1;
        self.segment = WalSegment::create(&self.dir, next_number)?;
        fsync_dir(&self.dir)?;
        self.counters.segments_rotated += 1;
        Ok(())
    }

    fn close_active_segment(&mut self) -> Result<()> {
        self.segment.close()?;
        if let Some(range) = self.current_range.take() {
            self.segment_ranges.insert(self.segment.number(), range);
        }
        Ok(())
    }

    /// Delete whole segments whose `max_seq < min_seq`, never the active
    /// segment, fsyncing the directory afterward. Returns the count deleted.
    pub fn truncate_before(&mut self, min_seq: i64) -> Result<usize> {
        let active = self.segment.number();
        let mut deleted = 0usize;
        let doomed: Vec<u64> = self
            .segment_ranges
            .iter()
            .filter(|(&number, &(_, max))| number != active && max < min_seq)
            .map(|(&number, _)| number)
            .collect();
        for number in doomed {
            let path = self.dir.join(segment_file_name(number));
            if path.exists() {
                fs::remove_file(path)?;
            }
            self.segment_ranges.remove(&number);
            deleted += 1;
        }
        if deleted > 0 {
            fsync_dir(&self.dir)?;
            self.counters.segments_truncated += deleted as u64;
        }
        Ok(deleted)
    }

    /// Flush any pending batch, finalize the active segment, and mark the
    /// writer closed. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.close_active_segment()?;
        self.closed = true;
        Ok(())
    }

    /// `true` once [`WalWriter::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The active segment's numeric identity.
    pub fn active_segment_number(&self) -> u64 {
        self.segment.number()
    }

    /// List every `*.wal` file currently on disk, sorted by number.
    pub fn list_segments(&self) -> Result<Vec<(u64, PathBuf)>> {
        Ok(list_segment_paths(&self.dir)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg(dir: &Path) -> WalConfig {
        WalConfig {
            dir: dir.to_path_buf(),
            max_file_size: 1024,
            enable_batch: false,
            batch_size: 3,
            batch_interval: std::time::Duration::from_millis(100),
            enable_compress: false,
            compress_min_bytes: 16,
            compress_min_ratio: 0.9,
        }
    }

    #[test]
    fn sync_mode_assigns_increasing_seqs() {
        let dir = tempdir().unwrap();
        let mut w = WalWriter::create_new(cfg(dir.path())).unwrap();
        let a = w.append(b"x").unwrap();
        let b = w.append(b"y").unwrap();
        let c = w.append(b"z").unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(w.counters().fsyncs, 3);
    }

    #[test]
    fn batch_mode_flushes_on_size_threshold() {
        let dir = tempdir().unwrap();
        let mut config = cfg(dir.path());
        config.enable_batch = true;
        config.batch_size = 3;
        config.batch_interval = std::time::Duration::from_secs(3600);
        let mut w = WalWriter::create_new(config).unwrap();
        w.append(b"x").unwrap();
        w.append(b"y").unwrap();
        assert_eq!(w.counters().fsyncs, 0);
        w.append(b"z").unwrap();
        assert_eq!(w.counters().fsyncs, 1);
        assert_eq!(w.counters().records_appended, 3);
    }

    #[test]
    fn rotation_creates_new_segment_past_max_file_size() {
        let dir = tempdir().unwrap();
        let mut config = cfg(dir.path());
        config.max_file_size = 64;
        let mut w = WalWriter::create_new(config).unwrap();
        for _ in 0..10 {
            w.append(b"0123456789").unwrap();
        }
        assert!(w.counters().segments_rotated >= 1);
        let segments = w.list_segments().unwrap();
        assert!(segments.len() >= 2);
    }

    #[test]
    fn truncate_before_never_deletes_active_segment() {
        let dir = tempdir().unwrap();
        let mut config = cfg(dir.path());
        config.max_file_size = 32;
        let mut w = WalWriter::create_new(config).unwrap();
        for _ in 0..10 {
            w.append(b"0123456789").unwrap();
        }
        let active = w.active_segment_number();
        w.truncate_before(i64::MAX).unwrap();
        assert!(w.list_segments().unwrap().iter().any(|(n, _)| *n == active));
    }

    #[test]
    fn append_after_close_is_an_error() {
        let dir = tempdir().unwrap();
        let mut w = WalWriter::create_new(cfg(dir.path())).unwrap();
        w.close().unwrap();
        assert!(matches!(w.append(b"x"), Err(Error::Closed)));
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut w = WalWriter::create_new(cfg(dir.path())).unwrap();
        w.close().unwrap();
        w.close().unwrap();
    }
}
