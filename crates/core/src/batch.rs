//! `BatchEntry`: the prepared-write record a handler transform produces and
//! the applier consumes.
//!
//! A handler never touches the KV directly — it reads (for reaction/update
//! flows) and returns a list of `BatchEntry` describing what should be
//! written. This is what lets the applier apply an entire `ApplyBatch` as one
//! atomic KV batch regardless of which handler produced which entry.

use crate::types::{EnqSeq, WalOffset};
use serde_json::Value as Json;
use std::collections::HashMap;

/// The write intent produced by a handler transform, before the applier
/// resolves it against current KV state (thread `last_seq`, latest message
/// version, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEntryKind {
    /// Create or edit a message. The applier assigns the final `seq` from
    /// the thread's `last_seq` counter and writes the version chain.
    MessageUpsert {
        /// Owning thread.
        thread_ts: i64,
        /// Message identity.
        msg_ts: i64,
        /// Author recorded on this version (unchanged on edits if absent).
        author: Option<String>,
        /// Replacement body for this version.
        body: Json,
        /// Reply target, set only on create.
        reply_to: Option<i64>,
        /// Event timestamp for this version (create or update time).
        ts: i64,
    },
    /// Soft-delete a message.
    MessageDelete {
        /// Owning thread.
        thread_ts: i64,
        /// Message identity.
        msg_ts: i64,
        /// Timestamp of the delete.
        ts: i64,
    },
    /// Add a reaction to the latest version of a message.
    ReactionAdd {
        /// Owning thread.
        thread_ts: i64,
        /// Target message.
        msg_ts: i64,
        /// Reacting identity.
        identity: String,
        /// Emoji applied.
        emoji: String,
    },
    /// Remove a reaction from the latest version of a message.
    ReactionDelete {
        /// Owning thread.
        thread_ts: i64,
        /// Target message.
        msg_ts: i64,
        /// Reacting identity whose reaction is removed.
        identity: String,
    },
    /// Create or update a thread's metadata record.
    ThreadUpsert {
        /// Thread identity.
        thread_ts: i64,
        /// `true` for `thread.create`; relations are only (re)written then.
        is_create: bool,
        /// Title, set on create and on update when changed.
        title: Option<String>,
        /// Author, set only on create.
        author: Option<String>,
        /// Event timestamp.
        ts: i64,
        /// Envelope-encryption metadata minted by the handler's
        /// `HandlerContext::mint_dek` call on create, if encryption is
        /// enabled. Always `None` on update.
        kms: Option<crate::model::KmsEnvelope>,
    },
    /// Soft-delete a thread.
    ThreadDelete {
        /// Thread identity.
        thread_ts: i64,
        /// Timestamp of the delete.
        ts: i64,
    },
}

impl BatchEntryKind {
    /// `true` for entries the applier routes through the message path
    /// (resolve thread, bump `last_seq`, write version chain, bump indexes).
    pub fn is_message_entry(&self) -> bool {
        matches!(
            self,
            BatchEntryKind::MessageUpsert { .. }
                | BatchEntryKind::MessageDelete { .. }
                | BatchEntryKind::ReactionAdd { .. }
                | BatchEntryKind::ReactionDelete { .. }
        )
    }

    /// The owning thread's ordinal, common to every entry kind.
    pub fn thread_ts(&self) -> i64 {
        match self {
            BatchEntryKind::MessageUpsert { thread_ts, .. }
            | BatchEntryKind::MessageDelete { thread_ts, .. }
            | BatchEntryKind::ReactionAdd { thread_ts, .. }
            | BatchEntryKind::ReactionDelete { thread_ts, .. }
            | BatchEntryKind::ThreadUpsert { thread_ts, .. }
            | BatchEntryKind::ThreadDelete { thread_ts, .. } => *thread_ts,
        }
    }

    /// The `(thread_ts, id)` pair a caller supplied at submit time, matching
    /// `SubmitRequest::id` (a message's `msg_ts` for message-shaped entries,
    /// the thread's own `thread_ts` for thread-shaped entries) — used to
    /// resolve the in-flight tracker once this entry's batch commits.
    pub fn provisional_key(&self) -> (String, String) {
        let thread_ts = self.thread_ts();
        let id = match self {
            BatchEntryKind::MessageUpsert { msg_ts, .. }
            | BatchEntryKind::MessageDelete { msg_ts, .. }
            | BatchEntryKind::ReactionAdd { msg_ts, .. }
            | BatchEntryKind::ReactionDelete { msg_ts, .. } => *msg_ts,
            BatchEntryKind::ThreadUpsert { .. } | BatchEntryKind::ThreadDelete { .. } => thread_ts,
        };
        (thread_ts.to_string(), id.to_string())
    }
}

/// A single prepared write, stamped with the enqueue sequence of the item
/// that produced it (for `max_enq` computation) and the WAL offset to `ack`
/// once the owning `ApplyBatch` commits.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// The write intent itself.
    pub kind: BatchEntryKind,
    /// Enqueue sequence of the originating queue item.
    pub enq_seq: EnqSeq,
    /// WAL offset to acknowledge on successful apply, `WalOffset::NONE` in
    /// memory-only mode.
    pub wal_offset: WalOffset,
}

/// A drained, sequenced unit of work handed from the ingestor to the apply
/// loop. All of `entries` commit to the KV as a single atomic batch.
#[derive(Debug, Clone)]
pub struct ApplyBatch {
    /// Batch-level monotonic sequence; commit order equals `apply_seq` order.
    pub apply_seq: u64,
    /// The prepared writes, in the order their handlers produced them.
    pub entries: Vec<BatchEntry>,
    /// The maximum `enq_seq` across `entries`, used for tie-break diagnostics.
    pub max_enq: EnqSeq,
}

impl ApplyBatch {
    /// Build an `ApplyBatch`, computing `max_enq` from `entries`.
    ///
    /// # Panics
    /// Panics if `entries` is empty — callers must not submit empty batches.
    pub fn new(apply_seq: u64, entries: Vec<BatchEntry>) -> Self {
        let max_enq = entries
            .iter()
            .map(|e| e.enq_seq)
            .max()
            .expect("ApplyBatch must have at least one entry");
        ApplyBatch {
            apply_seq,
            entries,
            max_enq,
        }
    }

    /// WAL offsets that should be acknowledged once this batch commits.
    pub fn durable_offsets(&self) -> impl Iterator<Item = WalOffset> + '_ {
        self.entries
            .iter()
            .map(|e| e.wal_offset)
            .filter(|o| o.is_durable())
    }
}

/// Reaction state carried on a message's latest version, keyed by reacting
/// identity.
pub type ReactionMap = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(enq: u64, wal: i64) -> BatchEntry {
        BatchEntry {
            kind: BatchEntryKind::ThreadDelete {
                thread_ts: 1,
                ts: 1,
            },
            enq_seq: EnqSeq(enq),
            wal_offset: WalOffset(wal),
        }
    }

    #[test]
    fn max_enq_is_computed_correctly() {
        let batch = ApplyBatch::new(1, vec![entry(3, 0), entry(7, 1), entry(5, 2)]);
        assert_eq!(batch.max_enq, EnqSeq(7));
    }

    #[test]
    fn durable_offsets_skips_none() {
        let batch = ApplyBatch::new(1, vec![entry(1, -1), entry(2, 4)]);
        let offsets: Vec<_> = batch.durable_offsets().collect();
        assert_eq!(offsets, vec![WalOffset(4)]);
    }

    #[test]
    #[should_panic]
    fn new_panics_on_empty_entries() {
        let _ = ApplyBatch::new(1, vec![]);
    }

    #[test]
    fn provisional_key_uses_msg_ts_for_message_entries_and_thread_ts_for_thread_entries() {
        let message = BatchEntryKind::MessageUpsert {
            thread_ts: 1,
            msg_ts: 200,
            author: None,
            body: serde_json::json!({}),
            reply_to: None,
            ts: 1,
        };
        assert_eq!(message.provisional_key(), ("1".to_string(), "200".to_string()));

        let thread = BatchEntryKind::ThreadDelete { thread_ts: 1, ts: 1 };
        assert_eq!(thread.provisional_key(), ("1".to_string(), "1".to_string()));
    }
}
