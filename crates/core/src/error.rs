//! Error taxonomy shared by every layer of the ingest core.
//!
//! Each layer crate (`storage`, `durability`, `concurrency`, `engine`) defines
//! its own narrower error enum and converts into this one at its public
//! boundary.

use thiserror::Error;

/// Convenience alias used throughout the core crates.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy named in the error-handling design: each variant here
/// maps to one row of that table, not to an arbitrary string.
#[derive(Debug, Error)]
pub enum Error {
    /// `TryEnqueue` observed a full channel. Non-retryable at the call site;
    /// the caller should surface backpressure upstream.
    #[error("queue is full")]
    QueueFull,

    /// Enqueue was attempted after `Close()` flipped the closed flag.
    #[error("queue is closed")]
    QueueClosed,

    /// A blocking enqueue's deadline elapsed before the channel had room.
    #[error("enqueue deadline elapsed")]
    Timeout,

    /// A WAL record failed its CRC or length check during recovery scan.
    #[error("wal corruption at offset {offset}: {detail}")]
    WalCorrupt {
        /// Byte offset within the segment file where corruption was found.
        offset: u64,
        /// Human-readable detail (short; for logs, not control flow).
        detail: String,
    },

    /// Append attempted after the WAL was closed.
    #[error("wal is closed")]
    WalClosed,

    /// The unified key parser rejected a byte sequence.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A handler or queue-op decoder rejected a payload.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The underlying KV engine reported a failure applying a batch.
    #[error("kv engine error: {0}")]
    KvError(String),

    /// A handler transform rejected its input op.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// The identifier validator rejected a string (handler id, thread id, ...).
    #[error("invalid identifier {0:?}: must match [A-Za-z0-9._-]{{1,256}}")]
    InvalidIdentifier(String),

    /// Startup found a `system:version` stamp incompatible with this build.
    #[error("schema version mismatch: on-disk={on_disk}, supported={supported}")]
    SchemaMismatch {
        /// Version recorded on disk.
        on_disk: u32,
        /// Version this build supports.
        supported: u32,
    },

    /// Wraps an I/O failure from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `true` for errors that are expected during normal operation and that
    /// callers may choose to retry or ignore (as opposed to corruption).
    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::QueueFull | Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings_are_stable() {
        assert_eq!(Error::QueueFull.to_string(), "queue is full");
        assert_eq!(Error::QueueClosed.to_string(), "queue is closed");
        assert_eq!(Error::WalClosed.to_string(), "wal is closed");
        assert!(Error::InvalidKey("x".into()).to_string().contains('x'));
    }

    #[test]
    fn is_capacity_only_for_queue_full() {
        assert!(Error::QueueFull.is_capacity());
        assert!(Error::Timeout.is_capacity());
        assert!(!Error::QueueClosed.is_capacity());
    }
}
