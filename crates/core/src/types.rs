//! Primitive newtypes shared across the ingest core.
//!
//! These give the otherwise-bare integers in the data model (`thread_ts`,
//! `msg_ts`, `seq`, `enq_seq`, `wal_offset`) distinct types so a caller can't
//! pass a `Seq` where an `EnqSeq` is expected.

use crate::error::{Error, Result};

/// Zero-padded width of a timestamp segment in a formatted key.
pub const TS_PAD: usize = 20;

/// Zero-padded width of a sequence segment in a formatted key.
///
/// The source carries both a 6- and a 9-digit variant across revisions
/// (Open Question (b)); this build picks 9, wide enough for `u64::MAX`
/// truncated to fit within realistic per-thread message counts while still
/// being fixed-width.
pub const SEQ_PAD: usize = 9;

/// Identifiers (`user_id`, `handler_id`, thread/message ids as strings) must
/// match this character class and length bound.
pub fn validate_identifier(s: &str) -> Result<()> {
    if s.is_empty() || s.len() > 256 {
        return Err(Error::InvalidIdentifier(s.to_string()));
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    {
        return Err(Error::InvalidIdentifier(s.to_string()));
    }
    Ok(())
}

/// A thread's creation timestamp in nanoseconds, doubling as its stable
/// ordinal (Open Question (c): this build uses timestamps, not opaque ids).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadTs(pub i64);

/// A message's creation timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsgTs(pub i64);

/// A per-thread monotonic sequence number, assigned at apply time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seq(pub u64);

/// A process-global monotonic sequence number, assigned at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnqSeq(pub u64);

/// A batch-level monotonic sequence number, assigned at drain time. Commit
/// order into the KV equals `ApplySeq` order, never handler-finish order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApplySeq(pub u64);

/// The sequence number the WAL assigned to a record, or `-1` if the queue is
/// memory-only and no WAL record backs the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalOffset(pub i64);

impl WalOffset {
    /// Sentinel for "no WAL record backs this item".
    pub const NONE: WalOffset = WalOffset(-1);

    /// `true` when this offset refers to an actual WAL record.
    pub fn is_durable(self) -> bool {
        self.0 >= 0
    }
}

impl Seq {
    /// The next sequence number after this one.
    pub fn next(self) -> Seq {
        Seq(self.0 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation_accepts_spec_charset() {
        assert!(validate_identifier("message.create").is_ok());
        assert!(validate_identifier("user-123_ABC.9").is_ok());
    }

    #[test]
    fn identifier_validation_rejects_empty_and_oversized() {
        assert!(validate_identifier("").is_err());
        let too_long = "a".repeat(257);
        assert!(validate_identifier(&too_long).is_err());
    }

    #[test]
    fn identifier_validation_rejects_invalid_chars() {
        assert!(validate_identifier("bad key").is_err());
        assert!(validate_identifier("bad:key").is_err());
    }

    #[test]
    fn wal_offset_none_is_not_durable() {
        assert!(!WalOffset::NONE.is_durable());
        assert!(WalOffset(0).is_durable());
    }
}
