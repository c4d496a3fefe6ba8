//! The `HandlerContext` implementation handlers see at transform time: the
//! two reads §4.5 permits (latest thread/message lookup) plus the KMS
//! mint-on-create call, all against live committed KV state.

use std::sync::Arc;

use progressdb_core::error::{Error, Result};
use progressdb_core::handler::HandlerContext;
use progressdb_core::kms::KmsProvider;
use progressdb_core::model::{KmsEnvelope, Message, Thread};
use progressdb_storage::{message_versions_prefix, prefix_upper_bound, thread_meta_key, KvEngine};

/// Reads committed KV state on a handler's behalf; optionally wraps a
/// [`KmsProvider`] for `thread.create`'s DEK-minting call.
pub struct KvHandlerContext {
    kv: Arc<dyn KvEngine>,
    kms: Option<Arc<dyn KmsProvider>>,
}

impl KvHandlerContext {
    /// Build a context with no KMS collaborator configured (encryption
    /// disabled).
    pub fn new(kv: Arc<dyn KvEngine>) -> Self {
        KvHandlerContext { kv, kms: None }
    }

    /// Build a context with a KMS collaborator configured (encryption
    /// enabled).
    pub fn with_kms(kv: Arc<dyn KvEngine>, kms: Arc<dyn KmsProvider>) -> Self {
        KvHandlerContext { kv, kms: Some(kms) }
    }
}

impl HandlerContext for KvHandlerContext {
    fn get_thread(&self, thread_ts: i64) -> Result<Option<Thread>> {
        match self
            .kv
            .get(thread_meta_key(thread_ts).as_bytes())
            .map_err(|e| Error::KvError(e.to_string()))?
        {
            Some(bytes) => {
                let thread = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::KvError(format!("corrupt thread record: {e}")))?;
                Ok(Some(thread))
            }
            None => Ok(None),
        }
    }

    fn get_latest_message(&self, thread_ts: i64, msg_ts: i64) -> Result<Option<Message>> {
        let prefix = message_versions_prefix(thread_ts, msg_ts);
        let upper = prefix_upper_bound(prefix.as_bytes());
        let rows = self
            .kv
            .scan(prefix.as_bytes(), upper.as_deref())
            .map_err(|e| Error::KvError(e.to_string()))?;
        match rows.into_iter().last() {
            Some((_, value)) => {
                let message = serde_json::from_slice(&value)
                    .map_err(|e| Error::KvError(format!("corrupt message record: {e}")))?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    fn mint_dek(&self, thread_ts: i64) -> Result<Option<KmsEnvelope>> {
        match &self.kms {
            Some(kms) => kms.create_dek_for_thread(thread_ts).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progressdb_core::model::Thread;
    use progressdb_storage::MemKv;

    #[test]
    fn get_thread_returns_none_when_absent() {
        let kv = Arc::new(MemKv::new());
        let ctx = KvHandlerContext::new(kv);
        assert!(ctx.get_thread(1).unwrap().is_none());
    }

    #[test]
    fn get_thread_reads_back_a_written_record() {
        let kv = Arc::new(MemKv::new());
        let thread = Thread::new(1, "hi".into(), "alice".into(), 1);
        kv.set(
            thread_meta_key(1).as_bytes(),
            &serde_json::to_vec(&thread).unwrap(),
        )
        .unwrap();
        let ctx = KvHandlerContext::new(kv);
        assert_eq!(ctx.get_thread(1).unwrap(), Some(thread));
    }

    #[test]
    fn mint_dek_without_kms_returns_none() {
        let kv = Arc::new(MemKv::new());
        let ctx = KvHandlerContext::new(kv);
        assert_eq!(ctx.mint_dek(1).unwrap(), None);
    }
}
