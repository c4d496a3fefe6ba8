//! WAL recovery: enumerate segments, validate and scan records, truncate an
//! incomplete tail, and report the point a [`crate::writer::WalWriter`]
//! should resume from.

use std::path::PathBuf;

use tracing::warn;

use crate::config::WalConfig;
use crate::error::Result;
use crate::format::{FormatError, SegmentHeader, SEGMENT_HEADER_SIZE};
use crate::segment::{list_segment_paths, WalSegment};
use crate::writer::{ResumePoint, SegmentRanges};

/// One surviving record plus the segment it was read from, in on-disk file
/// order.
#[derive(Debug, Clone)]
pub struct RecoveredRecord {
    /// Segment file this record was read from.
    pub segment: u64,
    /// Assigned sequence number.
    pub offset: i64,
    /// `flags` bit 0 set iff the payload is gzip-compressed.
    pub flags: u8,
    /// The (possibly compressed) payload bytes as stored.
    pub payload: Vec<u8>,
}

/// Where, if anywhere, a corrupt tail was found and truncated.
#[derive(Debug, Clone, Copy)]
pub struct TruncateInfo {
    /// Segment the tear was found in.
    pub segment: u64,
    /// Byte offset (past the header) the file was truncated to.
    pub byte_offset: u64,
}

/// The result of a full recovery scan.
#[derive(Debug, Clone)]
pub struct Recovered {
    /// Every surviving record, in file-then-offset order — the WAL-replay
    /// stream §4.8 step 1 describes.
    pub records: Vec<RecoveredRecord>,
    /// Next sequence number a resumed writer should assign.
    pub next_seq: i64,
    /// Set iff a torn/corrupt tail was found and truncated away.
    pub truncated: Option<TruncateInfo>,
    /// The point a [`crate::writer::WalWriter`] should resume appending
    /// from.
    pub resume: ResumePoint,
}

/// Scan every `*.wal` file in `config.dir`, validating headers and records,
/// truncating the first malformed or incomplete record found to the last
/// known-good byte offset. Missing directory is treated as an empty, fresh
/// WAL.
pub fn recover(config: &WalConfig) -> Result<Recovered> {
    let segments = list_segment_paths(&config.dir)?;
    if segments.is_empty() {
        return Ok(Recovered {
            records: Vec::new(),
            next_seq: 1,
            truncated: None,
            resume: ResumePoint {
                next_seq: 1,
                active_segment_number: 0,
                active_segment_len: 0,
                segment_ranges: SegmentRanges::new(),
            },
        });
    }

    let mut records = Vec::new();
    let mut segment_ranges = SegmentRanges::new();
    let mut max_seq: i64 = 0;
    let mut truncated = None;
    let mut active_segment_number = 0u64;
    let mut active_segment_len = 0u64;

    for (number, path) in &segments {
        let (seg_records, seg_min_max, seg_truncated, final_len) = scan_one(*number, path)?;
        if let Some((min, max)) = seg_min_max {
            segment_ranges.insert(*number, (min, max));
            max_seq = max_seq.max(max);
        }
        records.extend(seg_records);
        active_segment_number = *number;
        active_segment_len = final_len;
        if let Some(info) = seg_truncated {
            truncated = Some(info);
            // A torn record only ever occurs in the file that was open at
            // crash time; later files, if any exist, were written by a
            // process that never should have rotated past a torn segment.
            // Stop scanning regardless, treating this as the active file.
            break;
        }
    }

    let next_seq = max_seq + 1;
    Ok(Recovered {
        records,
        next_seq,
        truncated,
        resume: ResumePoint {
            next_seq,
            active_segment_number,
            active_segment_len,
            segment_ranges,
        },
    })
}

type ScanResult = (
    Vec<RecoveredRecord>,
    Option<(i64, i64)>,
    Option<TruncateInfo>,
    u64,
);

fn scan_one(number: u64, path: &PathBuf) -> Result<ScanResult> {
    let mut segment = WalSegment::open_read(path, number)?;
    let body = segment.read_body()?;

    // Validate the file header separately from the body scan; a bad magic
    // leaves no usable records in this file.
    let header_path_ok = {
        use std::io::Read as _;
        let mut f = std::fs::File::open(path)?;
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        let read = f.read(&mut header_bytes)?;
        read == SEGMENT_HEADER_SIZE && SegmentHeader::from_bytes(&header_bytes).is_ok()
    };
    if !header_path_ok {
        warn!(segment = number, "wal segment has an invalid header, treating as empty");
        let mut seg = WalSegment::open_append(path, number, SEGMENT_HEADER_SIZE as u64)?;
        seg.truncate(SEGMENT_HEADER_SIZE as u64)?;
        return Ok((
            Vec::new(),
            None,
            Some(TruncateInfo {
                segment: number,
                byte_offset: 0,
            }),
            SEGMENT_HEADER_SIZE as u64,
        ));
    }

    let mut records = Vec::new();
    let mut consumed = 0usize;
    let mut min_seq: Option<i64> = None;
    let mut max_seq: Option<i64> = None;
    let mut truncated = None;

    loop {
        if consumed == body.len() {
            break;
        }
        match crate::format::WalRecord::from_bytes(&body[consumed..]) {
            Ok((record, used)) => {
                min_seq = Some(min_seq.map_or(record.offset, |m: i64| m.min(record.offset)));
                max_seq = Some(max_seq.map_or(record.offset, |m: i64| m.max(record.offset)));
                records.push(RecoveredRecord {
                    segment: number,
                    offset: record.offset,
                    flags: record.flags,
                    payload: record.payload,
                });
                consumed += used;
            }
            Err(FormatError::InsufficientData { .. })
            | Err(FormatError::ChecksumMismatch { .. })
            | Err(FormatError::LengthOutOfBounds(_)) => {
                warn!(
                    segment = number,
                    byte_offset = consumed,
                    "truncating wal segment at corrupt or incomplete record"
                );
                truncated = Some(TruncateInfo {
                    segment: number,
                    byte_offset: consumed as u64,
                });
                break;
            }
            Err(FormatError::BadMagic(_)) => unreachable!("record decode never checks magic"),
        }
    }

    let final_len = SEGMENT_HEADER_SIZE as u64 + consumed as u64;
    if truncated.is_some() {
        let mut seg = WalSegment::open_append(path, number, final_len)?;
        seg.truncate(final_len)?;
    }

    Ok((
        records,
        min_seq.zip(max_seq),
        truncated,
        final_len,
    ))
}
