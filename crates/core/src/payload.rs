//! Tagged payload sum type.
//!
//! The design notes call for replacing the source's `map[string]any` +
//! per-handler retyping with a tagged sum type decoded once. The WAL framing
//! (see `progressdb-durability`/`progressdb-concurrency`) stays raw bytes
//! end-to-end; handlers are the only place a `Payload` gets materialized.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// Body of a `message.create` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreate {
    /// Owning thread's ordinal.
    pub thread_ts: i64,
    /// Creation timestamp of the new message.
    pub msg_ts: i64,
    /// Identifier of the message's author.
    pub author: String,
    /// Opaque message body.
    pub body: Json,
    /// Timestamp of the parent message, if this is a reply.
    pub reply_to: Option<i64>,
}

/// Body of a `message.update` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    /// Owning thread's ordinal.
    pub thread_ts: i64,
    /// Identity of the message being edited.
    pub msg_ts: i64,
    /// Replacement body.
    pub body: Json,
}

/// Body of a `message.delete` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelete {
    /// Owning thread's ordinal.
    pub thread_ts: i64,
    /// Identity of the message being soft-deleted.
    pub msg_ts: i64,
}

/// Body of a `reaction.add` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionAdd {
    /// Owning thread's ordinal.
    pub thread_ts: i64,
    /// Target message's identity.
    pub msg_ts: i64,
    /// Identity of the reacting user.
    pub identity: String,
    /// Emoji (or emoji shortcode) applied.
    pub emoji: String,
}

/// Body of a `reaction.delete` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDelete {
    /// Owning thread's ordinal.
    pub thread_ts: i64,
    /// Target message's identity.
    pub msg_ts: i64,
    /// Identity of the reacting user whose reaction is removed.
    pub identity: String,
}

/// Body of a `thread.create` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadCreate {
    /// Creation timestamp of the new thread.
    pub thread_ts: i64,
    /// Human-readable title.
    pub title: String,
    /// Identifier of the thread's creator.
    pub author: String,
}

/// Body of a `thread.update` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadUpdate {
    /// Thread being updated.
    pub thread_ts: i64,
    /// Replacement title, if changed.
    pub title: Option<String>,
}

/// Body of a `thread.delete` op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDelete {
    /// Thread being soft-deleted.
    pub thread_ts: i64,
}

/// The decoded body of a queue item, dispatched on `handler_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Payload {
    /// `message.create`
    MessageCreate(MessageCreate),
    /// `message.update`
    MessageUpdate(MessageUpdate),
    /// `message.delete`
    MessageDelete(MessageDelete),
    /// `reaction.add`
    ReactionAdd(ReactionAdd),
    /// `reaction.delete`
    ReactionDelete(ReactionDelete),
    /// `thread.create`
    ThreadCreate(ThreadCreate),
    /// `thread.update`
    ThreadUpdate(ThreadUpdate),
    /// `thread.delete`
    ThreadDelete(ThreadDelete),
}

impl Payload {
    /// The canonical `handler_id` this payload variant dispatches to.
    pub fn handler_id(&self) -> &'static str {
        match self {
            Payload::MessageCreate(_) => "message.create",
            Payload::MessageUpdate(_) => "message.update",
            Payload::MessageDelete(_) => "message.delete",
            Payload::ReactionAdd(_) => "reaction.add",
            Payload::ReactionDelete(_) => "reaction.delete",
            Payload::ThreadCreate(_) => "thread.create",
            Payload::ThreadUpdate(_) => "thread.update",
            Payload::ThreadDelete(_) => "thread.delete",
        }
    }

    /// Encode to the bytes carried inside a `QueueOp`'s payload field.
    pub fn encode(&self) -> Vec<u8> {
        // unwrap: Payload contains only JSON-representable types.
        serde_json::to_vec(self).expect("payload is always JSON-serializable")
    }

    /// Decode a `QueueOp` payload. Failures here are `InvalidPayload`: the
    /// item is dropped per the handler-transform contract in §4.5.
    pub fn decode(bytes: &[u8]) -> Result<Payload> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidPayload(format!("payload decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_id_matches_variant() {
        let p = Payload::ThreadCreate(ThreadCreate {
            thread_ts: 1,
            title: "t".into(),
            author: "a".into(),
        });
        assert_eq!(p.handler_id(), "thread.create");
    }

    #[test]
    fn encode_decode_round_trips() {
        let p = Payload::MessageCreate(MessageCreate {
            thread_ts: 1,
            msg_ts: 2,
            author: "a".into(),
            body: serde_json::json!({"text": "hi"}),
            reply_to: None,
        });
        let bytes = p.encode();
        let back = Payload::decode(&bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Payload::decode(b"not json").is_err());
    }
}
