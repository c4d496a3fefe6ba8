//! Entity bodies for threads, messages, and their append-only version history.
//!
//! These are the typed payloads carried inside [`crate::payload::Payload`]
//! and inside [`crate::batch::BatchEntry`]; the key codec in
//! `progressdb-storage` turns `(thread_ts, msg_ts, seq, ...)` into bytes, but
//! never needs to know the shape of `body`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Envelope-encryption metadata recorded on a thread once its DEK has been
/// minted by the KMS collaborator. The core never sees the plaintext DEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsEnvelope {
    /// Opaque key identifier assigned by the KMS collaborator.
    pub key_id: String,
    /// Base64-encoded wrapped (encrypted) data-encryption key.
    pub wrapped_dek_b64: String,
    /// Identifier of the key-encryption key that wrapped the DEK.
    pub kek_id: String,
    /// Version of the KEK used, for rotation bookkeeping.
    pub kek_version: u32,
}

/// A thread's metadata record, stored at `t:<thread_ts>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Creation timestamp in nanoseconds; the thread's stable ordinal.
    pub thread_ts: i64,
    /// Human-readable title.
    pub title: String,
    /// Identifier of the thread's creator.
    pub author: String,
    /// Creation timestamp (duplicated from `thread_ts` for readability).
    pub created_ts: i64,
    /// Timestamp of the most recent update.
    pub updated_ts: i64,
    /// Highest per-thread sequence number assigned so far.
    pub last_seq: u64,
    /// `true` once the thread has been soft-deleted.
    pub deleted: bool,
    /// Timestamp of the soft-delete, if any.
    pub deleted_ts: Option<i64>,
    /// Envelope-encryption metadata, present only when encryption is enabled.
    pub kms: Option<KmsEnvelope>,
}

impl Thread {
    /// A freshly created, non-deleted thread with `last_seq = 0`.
    pub fn new(thread_ts: i64, title: String, author: String, now: i64) -> Self {
        Thread {
            thread_ts,
            title,
            author,
            created_ts: now,
            updated_ts: now,
            last_seq: 0,
            deleted: false,
            deleted_ts: None,
            kms: None,
        }
    }
}

/// A message's current snapshot, stored at `t:<thread_ts>:m:<msg_ts>:<seq>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Owning thread's ordinal.
    pub thread_ts: i64,
    /// Creation timestamp in nanoseconds.
    pub msg_ts: i64,
    /// Per-thread sequence number assigned at apply time.
    pub seq: u64,
    /// Identifier of the message's author.
    pub author: String,
    /// Opaque message body (the wire format never interprets this).
    pub body: serde_json::Value,
    /// Timestamp of the parent message this one replies to, if any.
    pub reply_to: Option<i64>,
    /// Map of reacting identity to emoji.
    pub reactions: HashMap<String, String>,
    /// `true` once the message has been soft-deleted.
    pub deleted: bool,
    /// Timestamp of this version (create, update, or delete).
    pub ts: i64,
}

/// An append-only version record, stored at `v:<msg_ts>:<version_ts>:<version_seq>`.
/// Versions are never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// The message this version belongs to.
    pub msg_ts: i64,
    /// Timestamp this version was produced.
    pub version_ts: i64,
    /// Monotonic per-message version counter (ties broken by WAL order).
    pub version_seq: u64,
    /// Full snapshot of the message at this version.
    pub snapshot: Message,
}

/// The tombstone body written for a soft-deleted message (and stored as the
/// final version so readers iterating the version chain see the delete).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTomb {
    /// Owning thread's ordinal.
    pub thread_ts: i64,
    /// Identity of the message being tombstoned.
    pub msg_ts: i64,
    /// Timestamp of the delete.
    pub deleted_ts: i64,
}

/// The tombstone body written at a thread's `del:` marker on soft-delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadTomb {
    /// Identity of the thread being tombstoned.
    pub thread_ts: i64,
    /// Timestamp of the delete.
    pub deleted_ts: i64,
}
