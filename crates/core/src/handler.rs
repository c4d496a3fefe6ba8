//! The queue-op wire model and the handler transform trait.
//!
//! A `QueueOp` is what rides through the intake queue, the WAL, and (on
//! replay) recovery's synthetic enqueues. A `Handler` turns one `QueueOp`
//! into zero-or-more `BatchEntry` records; it is pure except for the two
//! reads permitted by §4.5 (latest message/thread lookup, and the KMS call
//! on thread create).

use std::collections::HashMap;

use crate::batch::BatchEntry;
use crate::error::Result;
use crate::model::{Message, Thread};
use crate::types::{EnqSeq, WalOffset};

/// The eight canonical handler ids, in the order the ingestor registers them.
pub const HANDLER_MESSAGE_CREATE: &str = "message.create";
pub const HANDLER_MESSAGE_UPDATE: &str = "message.update";
pub const HANDLER_MESSAGE_DELETE: &str = "message.delete";
pub const HANDLER_REACTION_ADD: &str = "reaction.add";
pub const HANDLER_REACTION_DELETE: &str = "reaction.delete";
pub const HANDLER_THREAD_CREATE: &str = "thread.create";
pub const HANDLER_THREAD_UPDATE: &str = "thread.update";
pub const HANDLER_THREAD_DELETE: &str = "thread.delete";

/// All eight canonical handler ids, for registration-completeness checks.
pub const ALL_HANDLER_IDS: [&str; 8] = [
    HANDLER_MESSAGE_CREATE,
    HANDLER_MESSAGE_UPDATE,
    HANDLER_MESSAGE_DELETE,
    HANDLER_REACTION_ADD,
    HANDLER_REACTION_DELETE,
    HANDLER_THREAD_CREATE,
    HANDLER_THREAD_UPDATE,
    HANDLER_THREAD_DELETE,
];

/// A single item carried by the intake queue, the WAL payload, and recovery's
/// synthetic replay enqueues.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOp {
    /// Selects which `Handler` processes this op.
    pub handler: String,
    /// Owning thread, as a string for wire-framing purposes (see §6); the
    /// decoded `Payload` carries the typed `i64` ordinal.
    pub thread_ts: String,
    /// Target entity id (message or thread timestamp, as a string).
    pub id: String,
    /// Encoded `Payload` bytes, decoded by the handler.
    pub payload: Vec<u8>,
    /// Event timestamp in nanoseconds.
    pub ts: i64,
    /// Process-global enqueue sequence.
    pub enq_seq: EnqSeq,
    /// WAL offset this op was durably recorded at, `WalOffset::NONE` if the
    /// queue is memory-only.
    pub wal_offset: WalOffset,
    /// Small side-channel of string metadata (tracing ids, client id, ...).
    pub extras: HashMap<String, String>,
}

/// Read access a handler needs to resolve reaction/update flows and to
/// decide whether a thread already exists. Implemented by the engine crate
/// against the live KV state; test doubles may implement it directly.
pub trait HandlerContext: Send + Sync {
    /// Look up a thread's current metadata record.
    fn get_thread(&self, thread_ts: i64) -> Result<Option<Thread>>;

    /// Look up a message's latest applied version.
    fn get_latest_message(&self, thread_ts: i64, msg_ts: i64) -> Result<Option<Message>>;

    /// Mint a wrapped DEK for a newly created thread, if encryption is
    /// enabled. Returns `Ok(None)` when encryption is disabled.
    fn mint_dek(&self, thread_ts: i64) -> Result<Option<crate::model::KmsEnvelope>>;
}

/// A handler transform: pure with respect to external state except for the
/// two reads `HandlerContext` exposes. Errors here are `HandlerError`s; the
/// ingestor drops the offending item and continues.
pub trait Handler: Send + Sync {
    /// Decode `op.payload` and produce the batch entries it implies.
    fn transform(&self, op: &QueueOp, ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_handler_ids_are_unique_and_match_constants() {
        let mut sorted = ALL_HANDLER_IDS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ALL_HANDLER_IDS.len());
    }
}
