//! Durability-layer error type, composed into [`progressdb_core::Error`] at
//! the crate boundary.

use thiserror::Error;

use crate::format::FormatError;

/// Errors specific to WAL segment I/O and recovery.
#[derive(Debug, Error)]
pub enum Error {
    /// Wraps a filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A segment header or record failed to decode.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Append was attempted after [`crate::writer::WalWriter::close`].
    #[error("wal is closed")]
    Closed,

    /// A corrupt tail was found during recovery; earlier records in the
    /// returned stream are still valid.
    #[error("corrupt tail at segment {segment}, byte offset {byte_offset}")]
    CorruptTail {
        /// Numeric segment file the corruption was found in.
        segment: u64,
        /// Byte offset within that segment where the corruption starts.
        byte_offset: u64,
    },
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for progressdb_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Closed => progressdb_core::Error::WalClosed,
            Error::CorruptTail {
                segment,
                byte_offset,
            } => progressdb_core::Error::WalCorrupt {
                offset: byte_offset,
                detail: format!("segment {segment}"),
            },
            other => progressdb_core::Error::WalCorrupt {
                offset: 0,
                detail: other.to_string(),
            },
        }
    }
}
