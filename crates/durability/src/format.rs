//! On-disk WAL layout (§4.2, §6).
//!
//! ```text
//! file  := header record*
//! header:= magic:u32be file_crc:u32be                         (8 bytes)
//! record:= offset:i64be crc32c:u32be length:i32be flags:u8 payload:[u8; length]
//! ```
//!
//! The 17-byte record header and 8-byte segment header are each fixed size,
//! split into their own small structs below.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use thiserror::Error;

/// File magic: ASCII `"WALF"`.
pub const SEGMENT_MAGIC: u32 = 0x5741_4C46;

/// `magic:u32 | file_crc:u32`.
pub const SEGMENT_HEADER_SIZE: usize = 8;

/// `offset:i64 | crc32c:u32 | length:i32 | flags:u8`.
pub const RECORD_HEADER_SIZE: usize = 17;

/// Largest payload `recover_files` accepts before treating the record as
/// corrupt, per §4.2.
pub const MAX_RECORD_LENGTH: usize = 100 * 1024 * 1024;

/// `flags` bit 0: payload is gzip-compressed.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Errors decoding a segment header or WAL record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// Fewer bytes were available than the structure requires.
    #[error("insufficient data: need {need}, have {have}")]
    InsufficientData {
        /// Bytes the structure requires.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },
    /// The magic number did not match [`SEGMENT_MAGIC`].
    #[error("bad magic: {0:#x}")]
    BadMagic(u32),
    /// `crc32c` over the payload did not match the recorded CRC.
    #[error("checksum mismatch: expected {expected:#x}, computed {computed:#x}")]
    ChecksumMismatch {
        /// CRC recorded in the record header.
        expected: u32,
        /// CRC recomputed over the payload actually read.
        computed: u32,
    },
    /// `length` fell outside `[0, MAX_RECORD_LENGTH]`.
    #[error("length {0} out of bounds")]
    LengthOutOfBounds(i32),
}

/// The 8-byte segment file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// File CRC over every byte past the header; zero while the file is the
    /// active (still-being-appended-to) segment.
    pub file_crc: u32,
}

impl SegmentHeader {
    /// A header for a freshly created, still-open segment.
    pub fn new_open() -> Self {
        SegmentHeader { file_crc: 0 }
    }

    /// Serialize to exactly [`SEGMENT_HEADER_SIZE`] bytes.
    pub fn to_bytes(self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);
        cursor.write_u32::<BigEndian>(SEGMENT_MAGIC).unwrap();
        cursor.write_u32::<BigEndian>(self.file_crc).unwrap();
        buf
    }

    /// Parse a header from its first `SEGMENT_HEADER_SIZE` bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < SEGMENT_HEADER_SIZE {
            return Err(FormatError::InsufficientData {
                need: SEGMENT_HEADER_SIZE,
                have: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let magic = cursor.read_u32::<BigEndian>().unwrap();
        if magic != SEGMENT_MAGIC {
            return Err(FormatError::BadMagic(magic));
        }
        let file_crc = cursor.read_u32::<BigEndian>().unwrap();
        Ok(SegmentHeader { file_crc })
    }
}

/// One WAL record: an `offset`-stamped, CRC-protected append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// The WAL-assigned monotonic sequence number for this record.
    pub offset: i64,
    /// `flags` bit 0 set iff `payload` is gzip-compressed on disk.
    pub flags: u8,
    /// The (possibly compressed) payload bytes.
    pub payload: Vec<u8>,
}

impl WalRecord {
    /// Construct a record, computing nothing yet — `to_bytes` computes the
    /// CRC at encode time.
    pub fn new(offset: i64, flags: u8, payload: Vec<u8>) -> Self {
        WalRecord {
            offset,
            flags,
            payload,
        }
    }

    /// `true` iff [`FLAG_COMPRESSED`] is set.
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Serialize `offset | crc32c | length | flags | payload`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let crc = crc32c::crc32c(&self.payload);
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + self.payload.len());
        buf.write_i64::<BigEndian>(self.offset).unwrap();
        buf.write_u32::<BigEndian>(crc).unwrap();
        buf.write_i32::<BigEndian>(self.payload.len() as i32)
            .unwrap();
        buf.write_u8(self.flags).unwrap();
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one record from the front of `buf`, returning it along with
    /// the number of bytes consumed.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize), FormatError> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Err(FormatError::InsufficientData {
                need: RECORD_HEADER_SIZE,
                have: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        let offset = cursor.read_i64::<BigEndian>().unwrap();
        let crc = cursor.read_u32::<BigEndian>().unwrap();
        let length = cursor.read_i32::<BigEndian>().unwrap();
        let flags = cursor.read_u8().unwrap();

        if length < 0 || length as usize > MAX_RECORD_LENGTH {
            return Err(FormatError::LengthOutOfBounds(length));
        }
        let length = length as usize;
        let total = RECORD_HEADER_SIZE + length;
        if buf.len() < total {
            return Err(FormatError::InsufficientData {
                need: total,
                have: buf.len(),
            });
        }
        let mut payload = vec![0u8; length];
        cursor.read_exact(&mut payload).unwrap();

        let computed = crc32c::crc32c(&payload);
        if computed != crc {
            return Err(FormatError::ChecksumMismatch {
                expected: crc,
                computed,
            });
        }

        Ok((
            WalRecord {
                offset,
                flags,
                payload,
            },
            total,
        ))
    }
}
