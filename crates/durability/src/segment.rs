//! A single on-disk WAL segment file: a thin wrapper around a `File`
//! tracking its own write position and numeric identity.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::format::{SegmentHeader, SEGMENT_HEADER_SIZE};

/// An open WAL segment file, either being appended to or freshly created.
#[derive(Debug)]
pub struct WalSegment {
    file: File,
    number: u64,
    path: PathBuf,
    write_position: u64,
    closed: bool,
}

/// Format a segment's file name from its numeric identity.
pub fn segment_file_name(number: u64) -> String {
    format!("{number:06}.wal")
}

/// Parse a segment's numeric identity from a file name, if it matches the
/// `NNNNNN.wal` pattern.
pub fn parse_segment_number(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".wal")?;
    stem.parse().ok()
}

impl WalSegment {
    /// Create a brand-new, empty segment with an open (zero-CRC) header.
    pub fn create(dir: &Path, number: u64) -> Result<Self> {
        let path = dir.join(segment_file_name(number));
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(&SegmentHeader::new_open().to_bytes())?;
        file.sync_all()?;
        Ok(WalSegment {
            file,
            number,
            path,
            write_position: SEGMENT_HEADER_SIZE as u64,
            closed: false,
        })
    }

    /// Reopen an existing segment for further appends, seeking to
    /// `resume_at` (the end of its last known-good record).
    pub fn open_append(path: &Path, number: u64, resume_at: u64) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        file.seek(SeekFrom::Start(resume_at))?;
        Ok(WalSegment {
            file,
            number,
            path: path.to_path_buf(),
            write_position: resume_at,
            closed: false,
        })
    }

    /// Reopen an existing segment read-only, for recovery scanning.
    pub fn open_read(path: &Path, number: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let write_position = file.metadata()?.len();
        Ok(WalSegment {
            file,
            number,
            path: path.to_path_buf(),
            write_position,
            closed: false,
        })
    }

    /// This segment's numeric identity.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// The segment's file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size (header + all appended bytes).
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Append raw already-encoded record bytes; does not fsync.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.file.seek(SeekFrom::Start(self.write_position))?;
        self.file.write_all(bytes)?;
        self.write_position += bytes.len() as u64;
        Ok(())
    }

    /// fsync the file's data and metadata.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Read the whole file's content past the header, for CRC computation
    /// or recovery scanning.
    pub fn read_body(&mut self) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Finalize: compute the file CRC over the body and write it into the
    /// header's CRC slot, then fsync. Called on rotation and on close.
    pub fn finalize(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let body = self.read_body()?;
        let crc = crc32c::crc32c(&body);
        let header = SegmentHeader { file_crc: crc };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Truncate the file to `new_len` bytes (used by recovery to drop a
    /// corrupt tail) and fsync.
    pub fn truncate(&mut self, new_len: u64) -> Result<()> {
        self.file.set_len(new_len)?;
        self.file.sync_all()?;
        self.write_position = new_len;
        Ok(())
    }

    /// Close the segment, finalizing it first. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.finalize()?;
        self.closed = true;
        Ok(())
    }

    /// `true` once [`WalSegment::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// List `*.wal` files in `dir`, sorted by numeric prefix (ascending).
pub fn list_segment_paths(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(number) = parse_segment_number(name) {
            out.push((number, entry.path()));
        }
    }
    out.sort_by_key(|(n, _)| *n);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn segment_file_name_and_parse_round_trip() {
        assert_eq!(segment_file_name(7), "000007.wal");
        assert_eq!(parse_segment_number("000007.wal"), Some(7));
        assert_eq!(parse_segment_number("not-a-segment.txt"), None);
    }

    #[test]
    fn create_writes_open_header() {
        let dir = tempdir().unwrap();
        let seg = WalSegment::create(dir.path(), 0).unwrap();
        assert_eq!(seg.size(), SEGMENT_HEADER_SIZE as u64);
        assert!(!seg.is_closed());
    }

    #[test]
    fn finalize_writes_nonzero_file_crc() {
        let dir = tempdir().unwrap();
        let mut seg = WalSegment::create(dir.path(), 0).unwrap();
        seg.append(b"some record bytes").unwrap();
        seg.finalize().unwrap();

        let mut raw = File::open(seg.path()).unwrap();
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        raw.read_exact(&mut header_bytes).unwrap();
        let header = SegmentHeader::from_bytes(&header_bytes).unwrap();
        assert_ne!(header.file_crc, 0);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut seg = WalSegment::create(dir.path(), 0).unwrap();
        seg.close().unwrap();
        seg.close().unwrap();
        assert!(seg.is_closed());
    }

    #[test]
    fn list_segment_paths_sorted_numerically() {
        let dir = tempdir().unwrap();
        WalSegment::create(dir.path(), 2).unwrap();
        WalSegment::create(dir.path(), 0).unwrap();
        WalSegment::create(dir.path(), 1).unwrap();
        let listed = list_segment_paths(dir.path()).unwrap();
        let numbers: Vec<_> = listed.into_iter().map(|(n, _)| n).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }
}
