//! The eight canonical handler transforms (§4.5, §6 "Handler interface").
//!
//! Each handler decodes its op's `Payload` variant, performs the one or two
//! permitted reads via `HandlerContext`, and returns the `BatchEntry` list
//! the applier will later commit. A handler never touches the KV directly.

use std::sync::Arc;

use progressdb_core::batch::{BatchEntry, BatchEntryKind};
use progressdb_core::error::{Error, Result};
use progressdb_core::handler::{
    Handler, HandlerContext, QueueOp, HANDLER_MESSAGE_CREATE, HANDLER_MESSAGE_DELETE,
    HANDLER_MESSAGE_UPDATE, HANDLER_REACTION_ADD, HANDLER_REACTION_DELETE, HANDLER_THREAD_CREATE,
    HANDLER_THREAD_DELETE, HANDLER_THREAD_UPDATE,
};
use progressdb_core::payload::Payload;
use progressdb_core::types::validate_identifier;
use progressdb_concurrency::HandlerRegistry;

fn decode(op: &QueueOp, expected: &'static str) -> Result<Payload> {
    let payload = Payload::decode(&op.payload)?;
    if payload.handler_id() != expected {
        return Err(Error::InvalidPayload(format!(
            "op routed to {expected} carried a {} payload",
            payload.handler_id()
        )));
    }
    Ok(payload)
}

fn entry(kind: BatchEntryKind, op: &QueueOp) -> BatchEntry {
    BatchEntry {
        kind,
        enq_seq: op.enq_seq,
        wal_offset: op.wal_offset,
    }
}

/// `message.create`
pub struct MessageCreateHandler;
impl Handler for MessageCreateHandler {
    fn transform(&self, op: &QueueOp, _ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>> {
        let Payload::MessageCreate(p) = decode(op, HANDLER_MESSAGE_CREATE)? else {
            unreachable!()
        };
        validate_identifier(&p.author)?;
        Ok(vec![entry(
            BatchEntryKind::MessageUpsert {
                thread_ts: p.thread_ts,
                msg_ts: p.msg_ts,
                author: Some(p.author),
                body: p.body,
                reply_to: p.reply_to,
                ts: op.ts,
            },
            op,
        )])
    }
}

/// `message.update`
pub struct MessageUpdateHandler;
impl Handler for MessageUpdateHandler {
    fn transform(&self, op: &QueueOp, ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>> {
        let Payload::MessageUpdate(p) = decode(op, HANDLER_MESSAGE_UPDATE)? else {
            unreachable!()
        };
        ctx.get_latest_message(p.thread_ts, p.msg_ts)?
            .ok_or_else(|| Error::HandlerError(format!("unknown message {}", p.msg_ts)))?;
        Ok(vec![entry(
            BatchEntryKind::MessageUpsert {
                thread_ts: p.thread_ts,
                msg_ts: p.msg_ts,
                author: None,
                body: p.body,
                reply_to: None,
                ts: op.ts,
            },
            op,
        )])
    }
}

/// `message.delete`
pub struct MessageDeleteHandler;
impl Handler for MessageDeleteHandler {
    fn transform(&self, op: &QueueOp, ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>> {
        let Payload::MessageDelete(p) = decode(op, HANDLER_MESSAGE_DELETE)? else {
            unreachable!()
        };
        let existing = ctx
            .get_latest_message(p.thread_ts, p.msg_ts)?
            .ok_or_else(|| Error::HandlerError(format!("unknown message {}", p.msg_ts)))?;
        if existing.deleted {
            return Err(Error::HandlerError(format!(
                "message {} already deleted",
                p.msg_ts
            )));
        }
        Ok(vec![entry(
            BatchEntryKind::MessageDelete {
                thread_ts: p.thread_ts,
                msg_ts: p.msg_ts,
                ts: op.ts,
            },
            op,
        )])
    }
}

/// `reaction.add`
pub struct ReactionAddHandler;
impl Handler for ReactionAddHandler {
    fn transform(&self, op: &QueueOp, ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>> {
        let Payload::ReactionAdd(p) = decode(op, HANDLER_REACTION_ADD)? else {
            unreachable!()
        };
        validate_identifier(&p.identity)?;
        ctx.get_latest_message(p.thread_ts, p.msg_ts)?
            .ok_or_else(|| Error::HandlerError(format!("unknown message {}", p.msg_ts)))?;
        Ok(vec![entry(
            BatchEntryKind::ReactionAdd {
                thread_ts: p.thread_ts,
                msg_ts: p.msg_ts,
                identity: p.identity,
                emoji: p.emoji,
            },
            op,
        )])
    }
}

/// `reaction.delete`
pub struct ReactionDeleteHandler;
impl Handler for ReactionDeleteHandler {
    fn transform(&self, op: &QueueOp, ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>> {
        let Payload::ReactionDelete(p) = decode(op, HANDLER_REACTION_DELETE)? else {
            unreachable!()
        };
        ctx.get_latest_message(p.thread_ts, p.msg_ts)?
            .ok_or_else(|| Error::HandlerError(format!("unknown message {}", p.msg_ts)))?;
        Ok(vec![entry(
            BatchEntryKind::ReactionDelete {
                thread_ts: p.thread_ts,
                msg_ts: p.msg_ts,
                identity: p.identity,
            },
            op,
        )])
    }
}

/// `thread.create`
pub struct ThreadCreateHandler;
impl Handler for ThreadCreateHandler {
    fn transform(&self, op: &QueueOp, ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>> {
        let Payload::ThreadCreate(p) = decode(op, HANDLER_THREAD_CREATE)? else {
            unreachable!()
        };
        validate_identifier(&p.author)?;
        if ctx.get_thread(p.thread_ts)?.is_some() {
            return Err(Error::HandlerError(format!(
                "thread {} already exists",
                p.thread_ts
            )));
        }
        let kms = ctx.mint_dek(p.thread_ts)?;
        Ok(vec![entry(
            BatchEntryKind::ThreadUpsert {
                thread_ts: p.thread_ts,
                is_create: true,
                title: Some(p.title),
                author: Some(p.author),
                ts: op.ts,
                kms,
            },
            op,
        )])
    }
}

/// `thread.update`
pub struct ThreadUpdateHandler;
impl Handler for ThreadUpdateHandler {
    fn transform(&self, op: &QueueOp, ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>> {
        let Payload::ThreadUpdate(p) = decode(op, HANDLER_THREAD_UPDATE)? else {
            unreachable!()
        };
        ctx.get_thread(p.thread_ts)?
            .ok_or_else(|| Error::HandlerError(format!("unknown thread {}", p.thread_ts)))?;
        Ok(vec![entry(
            BatchEntryKind::ThreadUpsert {
                thread_ts: p.thread_ts,
                is_create: false,
                title: p.title,
                author: None,
                ts: op.ts,
                kms: None,
            },
            op,
        )])
    }
}

/// `thread.delete`
pub struct ThreadDeleteHandler;
impl Handler for ThreadDeleteHandler {
    fn transform(&self, op: &QueueOp, ctx: &dyn HandlerContext) -> Result<Vec<BatchEntry>> {
        let Payload::ThreadDelete(p) = decode(op, HANDLER_THREAD_DELETE)? else {
            unreachable!()
        };
        let thread = ctx
            .get_thread(p.thread_ts)?
            .ok_or_else(|| Error::HandlerError(format!("unknown thread {}", p.thread_ts)))?;
        if thread.deleted {
            return Err(Error::HandlerError(format!(
                "thread {} already deleted",
                p.thread_ts
            )));
        }
        Ok(vec![entry(
            BatchEntryKind::ThreadDelete {
                thread_ts: p.thread_ts,
                ts: op.ts,
            },
            op,
        )])
    }
}

/// Build a registry with all eight canonical handlers registered.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(HANDLER_MESSAGE_CREATE, Arc::new(MessageCreateHandler));
    registry.register(HANDLER_MESSAGE_UPDATE, Arc::new(MessageUpdateHandler));
    registry.register(HANDLER_MESSAGE_DELETE, Arc::new(MessageDeleteHandler));
    registry.register(HANDLER_REACTION_ADD, Arc::new(ReactionAddHandler));
    registry.register(HANDLER_REACTION_DELETE, Arc::new(ReactionDeleteHandler));
    registry.register(HANDLER_THREAD_CREATE, Arc::new(ThreadCreateHandler));
    registry.register(HANDLER_THREAD_UPDATE, Arc::new(ThreadUpdateHandler));
    registry.register(HANDLER_THREAD_DELETE, Arc::new(ThreadDeleteHandler));
    debug_assert!(registry.is_complete());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use progressdb_core::model::{KmsEnvelope, Message, Thread};
    use progressdb_core::types::{EnqSeq, WalOffset};
    use std::collections::HashMap;

    struct FakeContext {
        thread: Option<Thread>,
        message: Option<Message>,
    }
    impl HandlerContext for FakeContext {
        fn get_thread(&self, _thread_ts: i64) -> Result<Option<Thread>> {
            Ok(self.thread.clone())
        }
        fn get_latest_message(&self, _thread_ts: i64, _msg_ts: i64) -> Result<Option<Message>> {
            Ok(self.message.clone())
        }
        fn mint_dek(&self, _thread_ts: i64) -> Result<Option<KmsEnvelope>> {
            Ok(None)
        }
    }

    fn op(handler: &str, payload: Payload) -> QueueOp {
        QueueOp {
            handler: handler.to_string(),
            thread_ts: "1".to_string(),
            id: "1".to_string(),
            payload: payload.encode(),
            ts: 100,
            enq_seq: EnqSeq(1),
            wal_offset: WalOffset::NONE,
            extras: HashMap::new(),
        }
    }

    #[test]
    fn message_create_produces_upsert_with_new_author() {
        let p = Payload::MessageCreate(progressdb_core::payload::MessageCreate {
            thread_ts: 1,
            msg_ts: 2,
            author: "alice".into(),
            body: serde_json::json!({"text": "hi"}),
            reply_to: None,
        });
        let ctx = FakeContext { thread: None, message: None };
        let entries = MessageCreateHandler
            .transform(&op(HANDLER_MESSAGE_CREATE, p), &ctx)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].kind, BatchEntryKind::MessageUpsert { .. }));
    }

    #[test]
    fn message_update_rejects_unknown_message() {
        let p = Payload::MessageUpdate(progressdb_core::payload::MessageUpdate {
            thread_ts: 1,
            msg_ts: 2,
            body: serde_json::json!({}),
        });
        let ctx = FakeContext { thread: None, message: None };
        assert!(MessageUpdateHandler
            .transform(&op(HANDLER_MESSAGE_UPDATE, p), &ctx)
            .is_err());
    }

    #[test]
    fn thread_create_rejects_already_existing_thread() {
        let p = Payload::ThreadCreate(progressdb_core::payload::ThreadCreate {
            thread_ts: 1,
            title: "t".into(),
            author: "alice".into(),
        });
        let ctx = FakeContext {
            thread: Some(Thread::new(1, "t".into(), "alice".into(), 1)),
            message: None,
        };
        assert!(ThreadCreateHandler
            .transform(&op(HANDLER_THREAD_CREATE, p), &ctx)
            .is_err());
    }

    #[test]
    fn decode_rejects_mismatched_payload_kind() {
        let p = Payload::ThreadCreate(progressdb_core::payload::ThreadCreate {
            thread_ts: 1,
            title: "t".into(),
            author: "alice".into(),
        });
        let ctx = FakeContext { thread: None, message: None };
        // Payload is a thread.create but routed as message.create.
        assert!(MessageCreateHandler
            .transform(&op(HANDLER_MESSAGE_CREATE, p), &ctx)
            .is_err());
    }

    #[test]
    fn default_registry_registers_all_eight_handlers() {
        let registry = default_registry();
        assert!(registry.is_complete());
    }
}
