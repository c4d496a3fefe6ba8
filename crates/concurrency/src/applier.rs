//! The applier: turns one `ApplyBatch` into a single atomic KV write,
//! maintaining secondary (`idx:t:...:ms:...`), relational (`rel:...`), and
//! temp-index (`temp_idx:...`) rows alongside the primary record.

use std::sync::Arc;

use progressdb_core::batch::{ApplyBatch, BatchEntryKind};
use progressdb_core::model::{Message, MessageTomb, Thread, ThreadTomb, Version};
use progressdb_core::{Error, Result};
use progressdb_storage::{
    final_message_key, message_versions_prefix, soft_delete_marker_key, temp_index_key,
    thread_meta_key, thread_ms_index_key, thread_to_user_key, user_to_thread_key,
    Batch as KvBatch, KvEngine,
};

use crate::inflight::{InflightOutcome, InflightTracker};

/// Applies `ApplyBatch`es to a [`KvEngine`], one atomic write per batch,
/// resolving each entry's provisional in-flight key once the batch commits.
pub struct Applier {
    kv: Arc<dyn KvEngine>,
    inflight: Arc<InflightTracker>,
}

fn decode_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::KvError(format!("corrupt stored record: {e}")))
}

fn encode_json<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("stored records are always JSON-serializable")
}

impl Applier {
    /// Build an applier over `kv`, resolving in-flight waiters through
    /// `inflight` on every successful apply.
    pub fn new(kv: Arc<dyn KvEngine>, inflight: Arc<InflightTracker>) -> Self {
        Applier { kv, inflight }
    }

    fn read_thread(&self, thread_ts: i64) -> Result<Option<Thread>> {
        match self
            .kv
            .get(thread_meta_key(thread_ts).as_bytes())
            .map_err(|e| Error::KvError(e.to_string()))?
        {
            Some(bytes) => Ok(Some(decode_json(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The latest sequenced version of a message, if any, along with the key
    /// it is currently stored under (so it can be replaced in place).
    fn read_latest_message(&self, thread_ts: i64, msg_ts: i64) -> Result<Option<(String, Message)>> {
        let prefix = message_versions_prefix(thread_ts, msg_ts);
        let upper = progressdb_storage::prefix_upper_bound(prefix.as_bytes());
        let rows = self
            .kv
            .scan(prefix.as_bytes(), upper.as_deref())
            .map_err(|e| Error::KvError(e.to_string()))?;
        match rows.into_iter().last() {
            Some((key, value)) => {
                let key = String::from_utf8(key)
                    .map_err(|_| Error::KvError("non-utf8 message key".into()))?;
                Ok(Some((key, decode_json(&value)?)))
            }
            None => Ok(None),
        }
    }

    fn read_ms_index(&self, thread_ts: i64, kind: &str) -> Result<Option<i64>> {
        let key = thread_ms_index_key(thread_ts, kind)?;
        match self.kv.get(key.as_bytes()).map_err(|e| Error::KvError(e.to_string()))? {
            Some(bytes) => {
                let s = String::from_utf8(bytes).map_err(|_| Error::KvError("non-utf8 index value".into()))?;
                s.parse().map(Some).map_err(|_| Error::KvError("non-numeric index value".into()))
            }
            None => Ok(None),
        }
    }

    /// Unconditionally set `idx:t:<thread_ts>:ms:<kind>` to `value`.
    fn set_ms_index(&self, wb: &mut KvBatch, thread_ts: i64, kind: &str, value: i64) -> Result<()> {
        let key = thread_ms_index_key(thread_ts, kind)?;
        wb.put(key.into_bytes(), value.to_string().into_bytes());
        Ok(())
    }

    /// Set `idx:t:<thread_ts>:ms:start` the first time only.
    fn set_ms_start_if_absent(&self, wb: &mut KvBatch, thread_ts: i64, msg_ts: i64) -> Result<()> {
        if self.read_ms_index(thread_ts, "start")?.is_none() {
            self.set_ms_index(wb, thread_ts, "start", msg_ts)?;
        }
        Ok(())
    }

    /// Set `idx:t:<thread_ts>:ms:end` only if `msg_ts` extends it.
    fn extend_ms_end(&self, wb: &mut KvBatch, thread_ts: i64, msg_ts: i64) -> Result<()> {
        let current = self.read_ms_index(thread_ts, "end")?;
        if current.map_or(true, |c| msg_ts > c) {
            self.set_ms_index(wb, thread_ts, "end", msg_ts)?;
        }
        Ok(())
    }

    fn stage_message_upsert(
        &self,
        wb: &mut KvBatch,
        thread_ts: i64,
        msg_ts: i64,
        author: Option<String>,
        body: serde_json::Value,
        reply_to: Option<i64>,
        ts: i64,
    ) -> Result<u64> {
        let mut thread = self
            .read_thread(thread_ts)?
            .ok_or_else(|| Error::HandlerError(format!("unknown thread {thread_ts}")))?;
        let existing = self.read_latest_message(thread_ts, msg_ts)?;
        thread.last_seq += 1;
        let seq = thread.last_seq;
        thread.updated_ts = ts;

        let resolved_author = author
            .or_else(|| existing.as_ref().map(|(_, m)| m.author.clone()))
            .unwrap_or_default();
        let reactions = existing
            .as_ref()
            .map(|(_, m)| m.reactions.clone())
            .unwrap_or_default();
        let is_create = existing.is_none();

        let message = Message {
            thread_ts,
            msg_ts,
            seq,
            author: resolved_author,
            body: body.clone(),
            reply_to,
            reactions,
            deleted: false,
            ts,
        };

        if let Some((old_key, _)) = &existing {
            wb.delete(old_key.clone().into_bytes());
        }
        let new_key = final_message_key(thread_ts, msg_ts, seq);
        wb.put(new_key.into_bytes(), encode_json(&message));
        wb.put(
            progressdb_storage::version_key(msg_ts, ts, seq).into_bytes(),
            encode_json(&Version {
                msg_ts,
                version_ts: ts,
                version_seq: seq,
                snapshot: message,
            }),
        );

        if is_create {
            self.set_ms_start_if_absent(wb, thread_ts, msg_ts)?;
            self.set_ms_index(wb, thread_ts, "lc", ts)?;
        } else {
            self.set_ms_index(wb, thread_ts, "lu", ts)?;
        }
        self.extend_ms_end(wb, thread_ts, msg_ts)?;

        wb.put(thread_meta_key(thread_ts).into_bytes(), encode_json(&thread));
        Ok(seq)
    }

    fn stage_message_delete(&self, wb: &mut KvBatch, thread_ts: i64, msg_ts: i64, ts: i64) -> Result<()> {
        let Some((key, mut message)) = self.read_latest_message(thread_ts, msg_ts)? else {
            return Err(Error::HandlerError(format!(
                "cannot delete unknown message {thread_ts}:{msg_ts}"
            )));
        };
        message.deleted = true;
        message.ts = ts;
        wb.put(key.clone().into_bytes(), encode_json(&message));
        wb.put(
            soft_delete_marker_key(&key).into_bytes(),
            encode_json(&MessageTomb {
                thread_ts,
                msg_ts,
                deleted_ts: ts,
            }),
        );
        self.set_ms_index(wb, thread_ts, "lu", ts)?;
        Ok(())
    }

    fn stage_reaction(
        &self,
        wb: &mut KvBatch,
        thread_ts: i64,
        msg_ts: i64,
        identity: &str,
        emoji: Option<&str>,
    ) -> Result<()> {
        let Some((key, mut message)) = self.read_latest_message(thread_ts, msg_ts)? else {
            return Err(Error::HandlerError(format!(
                "cannot react to unknown message {thread_ts}:{msg_ts}"
            )));
        };
        match emoji {
            Some(emoji) => {
                message.reactions.insert(identity.to_string(), emoji.to_string());
            }
            None => {
                message.reactions.remove(identity);
            }
        }
        wb.put(key.into_bytes(), encode_json(&message));
        Ok(())
    }

    fn stage_thread_upsert(
        &self,
        wb: &mut KvBatch,
        thread_ts: i64,
        is_create: bool,
        title: Option<String>,
        author: Option<String>,
        ts: i64,
        kms: Option<progressdb_core::model::KmsEnvelope>,
    ) -> Result<()> {
        let thread = if is_create {
            let mut t = Thread::new(
                thread_ts,
                title.unwrap_or_default(),
                author.clone().unwrap_or_default(),
                ts,
            );
            t.kms = kms;
            if let Some(user_id) = &author {
                let u2t = user_to_thread_key(user_id, thread_ts)?;
                let t2u = thread_to_user_key(thread_ts, user_id)?;
                wb.put(u2t.clone().into_bytes(), Vec::new());
                wb.put(t2u.clone().into_bytes(), Vec::new());
                // Staged alongside the relation rows in the same atomic
                // batch; recovery's promotion pass confirms and clears
                // these rather than rebuilding anything, since the batch
                // already committed both together.
                self.stage_temp_index(wb, "user_threads", &u2t)?;
                self.stage_temp_index(wb, "thread_users", &t2u)?;
            }
            t
        } else {
            let mut t = self
                .read_thread(thread_ts)?
                .ok_or_else(|| Error::HandlerError(format!("unknown thread {thread_ts}")))?;
            if let Some(title) = title {
                t.title = title;
            }
            t.updated_ts = ts;
            t
        };
        wb.put(thread_meta_key(thread_ts).into_bytes(), encode_json(&thread));
        Ok(())
    }

    fn stage_thread_delete(&self, wb: &mut KvBatch, thread_ts: i64, ts: i64) -> Result<()> {
        let mut thread = self
            .read_thread(thread_ts)?
            .ok_or_else(|| Error::HandlerError(format!("unknown thread {thread_ts}")))?;
        thread.deleted = true;
        thread.deleted_ts = Some(ts);
        thread.updated_ts = ts;
        let key = thread_meta_key(thread_ts);
        wb.put(key.clone().into_bytes(), encode_json(&thread));
        wb.put(
            soft_delete_marker_key(&key).into_bytes(),
            encode_json(&ThreadTomb {
                thread_ts,
                deleted_ts: ts,
            }),
        );
        Ok(())
    }

    /// Stage one `ApplyBatch` entry's effects into a KV write batch without
    /// yet committing. Staged writes beyond this entry in the same batch see
    /// whatever was written here only after the whole batch commits — each
    /// call reads *committed* state, one pass per entry. Returns the final
    /// per-thread `seq` assigned, for entry kinds that assign one.
    fn stage_entry(&self, wb: &mut KvBatch, kind: &BatchEntryKind) -> Result<Option<u64>> {
        match kind {
            BatchEntryKind::MessageUpsert {
                thread_ts,
                msg_ts,
                author,
                body,
                reply_to,
                ts,
            } => self
                .stage_message_upsert(wb, *thread_ts, *msg_ts, author.clone(), body.clone(), *reply_to, *ts)
                .map(Some),
            BatchEntryKind::MessageDelete { thread_ts, msg_ts, ts } => {
                self.stage_message_delete(wb, *thread_ts, *msg_ts, *ts)?;
                Ok(None)
            }
            BatchEntryKind::ReactionAdd {
                thread_ts,
                msg_ts,
                identity,
                emoji,
            } => {
                self.stage_reaction(wb, *thread_ts, *msg_ts, identity, Some(emoji))?;
                Ok(None)
            }
            BatchEntryKind::ReactionDelete {
                thread_ts,
                msg_ts,
                identity,
            } => {
                self.stage_reaction(wb, *thread_ts, *msg_ts, identity, None)?;
                Ok(None)
            }
            BatchEntryKind::ThreadUpsert {
                thread_ts,
                is_create,
                title,
                author,
                ts,
                kms,
            } => {
                self.stage_thread_upsert(wb, *thread_ts, *is_create, title.clone(), author.clone(), *ts, kms.clone())?;
                Ok(None)
            }
            BatchEntryKind::ThreadDelete { thread_ts, ts } => {
                self.stage_thread_delete(wb, *thread_ts, *ts)?;
                Ok(None)
            }
        }
    }

    /// Also stage a `temp_idx:` row recording that `target_key` needs
    /// promotion at next recovery, per §4.8 step 3.
    pub fn stage_temp_index(&self, wb: &mut KvBatch, index_type: &str, target_key: &str) -> Result<()> {
        wb.put(temp_index_key(index_type, target_key)?.into_bytes(), Vec::new());
        Ok(())
    }

    /// Apply an entire `ApplyBatch` as one atomic KV write. A `HandlerError`
    /// from any one entry aborts the whole batch — the caller is expected to
    /// have already filtered handler-rejected ops out before building the
    /// batch; an error surfacing here means committed state itself is
    /// inconsistent with what a handler assumed, which is not retryable.
    ///
    /// On success, resolves each entry's provisional in-flight key with the
    /// `seq` its handler's write landed at (or this batch's `apply_seq` for
    /// entry kinds that don't assign one), waking any caller blocked on
    /// `InflightTracker::add`.
    pub fn apply(&self, batch: &ApplyBatch) -> Result<()> {
        let mut wb = KvBatch::new();
        let mut resolutions = Vec::with_capacity(batch.entries.len());
        for entry in &batch.entries {
            let seq = self.stage_entry(&mut wb, &entry.kind)?;
            resolutions.push((entry.kind.provisional_key(), seq.unwrap_or(batch.apply_seq)));
        }
        self.kv.apply(wb, true).map_err(|e| Error::KvError(e.to_string()))?;
        for (key, seq) in resolutions {
            self.inflight.resolve(&key, InflightOutcome::Applied { seq });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progressdb_core::batch::BatchEntry;
    use progressdb_core::types::{EnqSeq, WalOffset};
    use progressdb_storage::MemKv;

    fn thread_entry(thread_ts: i64) -> BatchEntry {
        BatchEntry {
            kind: BatchEntryKind::ThreadUpsert {
                thread_ts,
                is_create: true,
                title: Some("hello".into()),
                author: Some("alice".into()),
                ts: 1,
                kms: None,
            },
            enq_seq: EnqSeq(1),
            wal_offset: WalOffset::NONE,
        }
    }

    fn message_entry(thread_ts: i64, msg_ts: i64, enq: u64) -> BatchEntry {
        BatchEntry {
            kind: BatchEntryKind::MessageUpsert {
                thread_ts,
                msg_ts,
                author: Some("alice".into()),
                body: serde_json::json!({"text": "hi"}),
                reply_to: None,
                ts: 2,
            },
            enq_seq: EnqSeq(enq),
            wal_offset: WalOffset::NONE,
        }
    }

    fn applier() -> (Applier, Arc<MemKv>) {
        let kv = Arc::new(MemKv::new());
        (Applier::new(kv.clone(), InflightTracker::new()), kv)
    }

    #[test]
    fn thread_create_then_message_create_round_trips() {
        let (applier, kv) = applier();
        applier
            .apply(&ApplyBatch::new(1, vec![thread_entry(100)]))
            .unwrap();
        applier
            .apply(&ApplyBatch::new(2, vec![message_entry(100, 200, 2)]))
            .unwrap();

        let thread: Thread =
            decode_json(&kv.get(thread_meta_key(100).as_bytes()).unwrap().unwrap()).unwrap();
        assert_eq!(thread.last_seq, 1);

        let key = final_message_key(100, 200, 1);
        let msg: Message = decode_json(&kv.get(key.as_bytes()).unwrap().unwrap()).unwrap();
        assert_eq!(msg.seq, 1);
        assert!(!msg.deleted);
    }

    #[test]
    fn message_update_replaces_prior_final_key() {
        let (applier, kv) = applier();
        applier
            .apply(&ApplyBatch::new(1, vec![thread_entry(1)]))
            .unwrap();
        applier
            .apply(&ApplyBatch::new(2, vec![message_entry(1, 2, 1)]))
            .unwrap();
        applier
            .apply(&ApplyBatch::new(3, vec![message_entry(1, 2, 2)]))
            .unwrap();

        assert!(kv.get(final_message_key(1, 2, 1).as_bytes()).unwrap().is_none());
        assert!(kv.get(final_message_key(1, 2, 2).as_bytes()).unwrap().is_some());
    }

    #[test]
    fn message_delete_marks_deleted_and_writes_tombstone() {
        let (applier, kv) = applier();
        applier.apply(&ApplyBatch::new(1, vec![thread_entry(1)])).unwrap();
        applier
            .apply(&ApplyBatch::new(2, vec![message_entry(1, 2, 1)]))
            .unwrap();
        let delete = BatchEntry {
            kind: BatchEntryKind::MessageDelete {
                thread_ts: 1,
                msg_ts: 2,
                ts: 3,
            },
            enq_seq: EnqSeq(3),
            wal_offset: WalOffset::NONE,
        };
        applier.apply(&ApplyBatch::new(3, vec![delete])).unwrap();

        let key = final_message_key(1, 2, 1);
        let msg: Message = decode_json(&kv.get(key.as_bytes()).unwrap().unwrap()).unwrap();
        assert!(msg.deleted);
        assert!(kv
            .get(soft_delete_marker_key(&key).as_bytes())
            .unwrap()
            .is_some());
    }

    #[test]
    fn reaction_add_then_delete_round_trips_without_new_version() {
        let (applier, kv) = applier();
        applier.apply(&ApplyBatch::new(1, vec![thread_entry(1)])).unwrap();
        applier
            .apply(&ApplyBatch::new(2, vec![message_entry(1, 2, 1)]))
            .unwrap();

        let add = BatchEntry {
            kind: BatchEntryKind::ReactionAdd {
                thread_ts: 1,
                msg_ts: 2,
                identity: "bob".into(),
                emoji: "👍".into(),
            },
            enq_seq: EnqSeq(3),
            wal_offset: WalOffset::NONE,
        };
        applier.apply(&ApplyBatch::new(3, vec![add])).unwrap();
        let key = final_message_key(1, 2, 1);
        let msg: Message = decode_json(&kv.get(key.as_bytes()).unwrap().unwrap()).unwrap();
        assert_eq!(msg.reactions.get("bob"), Some(&"👍".to_string()));

        let del = BatchEntry {
            kind: BatchEntryKind::ReactionDelete {
                thread_ts: 1,
                msg_ts: 2,
                identity: "bob".into(),
            },
            enq_seq: EnqSeq(4),
            wal_offset: WalOffset::NONE,
        };
        applier.apply(&ApplyBatch::new(4, vec![del])).unwrap();
        let msg: Message = decode_json(&kv.get(key.as_bytes()).unwrap().unwrap()).unwrap();
        assert!(!msg.reactions.contains_key("bob"));
    }

    #[test]
    fn message_upsert_on_unknown_thread_is_a_handler_error() {
        let (applier, _kv) = applier();
        let err = applier.apply(&ApplyBatch::new(1, vec![message_entry(1, 2, 1)]));
        assert!(matches!(err, Err(Error::HandlerError(_))));
    }

    #[test]
    fn thread_delete_sets_deleted_flag() {
        let (applier, kv) = applier();
        applier.apply(&ApplyBatch::new(1, vec![thread_entry(1)])).unwrap();
        let del = BatchEntry {
            kind: BatchEntryKind::ThreadDelete { thread_ts: 1, ts: 9 },
            enq_seq: EnqSeq(2),
            wal_offset: WalOffset::NONE,
        };
        applier.apply(&ApplyBatch::new(2, vec![del])).unwrap();
        let thread: Thread =
            decode_json(&kv.get(thread_meta_key(1).as_bytes()).unwrap().unwrap()).unwrap();
        assert!(thread.deleted);
        assert_eq!(thread.deleted_ts, Some(9));

        let marker_key = soft_delete_marker_key(&thread_meta_key(1));
        let tomb: progressdb_core::model::ThreadTomb =
            decode_json(&kv.get(marker_key.as_bytes()).unwrap().unwrap()).unwrap();
        assert_eq!(tomb.thread_ts, 1);
        assert_eq!(tomb.deleted_ts, 9);
    }

    #[test]
    fn apply_resolves_the_inflight_waiter_for_each_entry() {
        let kv = Arc::new(MemKv::new());
        let inflight = InflightTracker::new();
        let applier = Applier::new(kv, inflight.clone());
        let rx = inflight.add(("100".to_string(), "100".to_string()));

        applier
            .apply(&ApplyBatch::new(1, vec![thread_entry(100)]))
            .unwrap();

        let outcome = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert!(matches!(outcome, InflightOutcome::Applied { .. }));
        assert!(!inflight.is_inflight(&("100".to_string(), "100".to_string())));
    }
}
