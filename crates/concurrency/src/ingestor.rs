//! The ingestor: a worker pool draining the intake queue into bounded
//! batches, dispatching each item to its registered handler, and submitting
//! the resulting `BatchEntry` records to the applier in strict `apply_seq`
//! order regardless of which worker finished its handler work first.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use progressdb_core::batch::ApplyBatch;
use progressdb_core::handler::{Handler, HandlerContext, QueueOp};
use progressdb_core::Result;
use tracing::{debug, warn};

use crate::applier::Applier;
use crate::inflight::{InflightOutcome, InflightTracker};
use crate::queue::IntakeQueue;

/// Maps a `handler_id` to its transform implementation.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: std::collections::HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Register `handler` under `id`, replacing any prior registration.
    pub fn register(&mut self, id: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert(id.to_string(), handler);
    }

    /// Look up the handler registered for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(id).cloned()
    }

    /// `true` iff every one of `progressdb_core::ALL_HANDLER_IDS` has a
    /// registration — the completeness check the engine crate runs at
    /// startup.
    pub fn is_complete(&self) -> bool {
        progressdb_core::ALL_HANDLER_IDS
            .iter()
            .all(|id| self.handlers.contains_key(*id))
    }
}

struct SequencerState {
    next_expected: u64,
    pending: BTreeMap<u64, ApplyBatch>,
}

/// Buffers out-of-order-completed `ApplyBatch`es and applies them strictly
/// in `apply_seq` order, acknowledging each entry's WAL offset once its
/// batch commits.
pub struct Sequencer {
    state: Mutex<SequencerState>,
    applier: Applier,
    queue: Arc<IntakeQueue>,
}

impl Sequencer {
    /// Build a sequencer starting at `apply_seq = 1`.
    pub fn new(applier: Applier, queue: Arc<IntakeQueue>) -> Self {
        Sequencer {
            state: Mutex::new(SequencerState {
                next_expected: 1,
                pending: BTreeMap::new(),
            }),
            applier,
            queue,
        }
    }

    /// Submit a completed batch. If it is not next in line, it is buffered;
    /// otherwise it (and any now-contiguous successors) apply immediately,
    /// under the same lock, so commit order is always `apply_seq` order.
    pub fn submit(&self, batch: ApplyBatch) -> Result<()> {
        let mut state = self.state.lock();
        state.pending.insert(batch.apply_seq, batch);
        while let Some(next) = state.pending.remove(&state.next_expected) {
            let offsets: Vec<_> = next.durable_offsets().collect();
            debug!(apply_seq = next.apply_seq, entries = next.entries.len(), "applying batch");
            self.applier.apply(&next)?;
            for offset in offsets {
                // Ack failures here are not fatal to correctness: the WAL
                // still holds the record and a later ack for the same
                // low-water-mark will retry the truncation.
                let _ = self.queue.ack(offset);
            }
            state.next_expected += 1;
        }
        Ok(())
    }
}

/// Worker-pool configuration for batch assembly.
#[derive(Debug, Clone, Copy)]
pub struct IngestorConfig {
    /// Maximum ops drained into one batch before it is handed off.
    pub batch_size: usize,
    /// Maximum time to wait for a batch to fill before handing off whatever
    /// was collected.
    pub batch_interval: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        IngestorConfig {
            batch_size: 64,
            batch_interval: Duration::from_millis(10),
        }
    }
}

/// The ingestor: owns the handler registry and drives worker threads that
/// drain `queue`, transform ops, and submit to `sequencer`.
pub struct Ingestor {
    queue: Arc<IntakeQueue>,
    registry: HandlerRegistry,
    ctx: Arc<dyn HandlerContext>,
    sequencer: Arc<Sequencer>,
    config: IngestorConfig,
    next_apply_seq: AtomicU64,
    inflight: Arc<InflightTracker>,
}

impl Ingestor {
    /// Build an ingestor. `sequencer` should be constructed over the same
    /// `queue` and an `Applier` sharing the same `KvEngine` the rest of the
    /// system reads from. `inflight` should be the same tracker callers
    /// registered a provisional key with at submit time, so a handler
    /// rejection here can wake them with `InflightOutcome::Rejected`.
    pub fn new(
        queue: Arc<IntakeQueue>,
        registry: HandlerRegistry,
        ctx: Arc<dyn HandlerContext>,
        sequencer: Arc<Sequencer>,
        config: IngestorConfig,
        inflight: Arc<InflightTracker>,
    ) -> Arc<Self> {
        Arc::new(Ingestor {
            queue,
            registry,
            ctx,
            sequencer,
            config,
            next_apply_seq: AtomicU64::new(1),
            inflight,
        })
    }

    /// Spawn `num_workers` threads draining the queue until it disconnects
    /// (i.e. the queue and every sender are dropped).
    pub fn spawn_workers(self: &Arc<Self>, num_workers: usize) -> Vec<JoinHandle<()>> {
        (0..num_workers)
            .map(|_| {
                let this = Arc::clone(self);
                std::thread::spawn(move || this.worker_loop())
            })
            .collect()
    }

    fn worker_loop(self: Arc<Self>) {
        let receiver = self.queue.receiver();
        loop {
            let mut batch_ops = Vec::new();
            let deadline = Instant::now() + self.config.batch_interval;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(remaining) {
                    Ok(op) => {
                        batch_ops.push(op);
                        if batch_ops.len() >= self.config.batch_size {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        if !batch_ops.is_empty() {
                            self.process_batch(batch_ops);
                        }
                        return;
                    }
                }
            }
            if !batch_ops.is_empty() {
                self.process_batch(batch_ops);
            }
        }
    }

    /// Run one drain-transform-submit cycle synchronously; exposed for
    /// deterministic tests that don't want to race a background thread.
    pub fn process_batch(&self, ops: Vec<QueueOp>) {
        let apply_seq = self.next_apply_seq.fetch_add(1, Ordering::SeqCst);
        let mut entries = Vec::new();
        for op in ops {
            match self.registry.get(&op.handler) {
                Some(handler) => match handler.transform(&op, self.ctx.as_ref()) {
                    Ok(mut produced) => entries.append(&mut produced),
                    Err(e) => {
                        warn!(handler = %op.handler, error = %e, "handler rejected op, dropping");
                        self.inflight.resolve(
                            &(op.thread_ts.clone(), op.id.clone()),
                            InflightOutcome::Rejected { detail: e.to_string() },
                        );
                        let _ = self.queue.ack(op.wal_offset);
                    }
                },
                None => {
                    warn!(handler = %op.handler, "no handler registered, dropping op");
                    self.inflight.resolve(
                        &(op.thread_ts.clone(), op.id.clone()),
                        InflightOutcome::Rejected {
                            detail: format!("no handler registered for {}", op.handler),
                        },
                    );
                    let _ = self.queue.ack(op.wal_offset);
                }
            }
        }
        if entries.is_empty() {
            return;
        }
        let batch = ApplyBatch::new(apply_seq, entries);
        if let Err(e) = self.sequencer.submit(batch) {
            warn!(apply_seq, error = %e, "failed to apply batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progressdb_core::batch::{BatchEntry, BatchEntryKind};
    use progressdb_core::error::Result as CoreResult;
    use progressdb_core::model::{KmsEnvelope, Message, Thread};
    use progressdb_core::types::{EnqSeq, WalOffset};
    use progressdb_storage::MemKv;
    use std::collections::HashMap;

    struct NullContext;
    impl HandlerContext for NullContext {
        fn get_thread(&self, _thread_ts: i64) -> CoreResult<Option<Thread>> {
            Ok(None)
        }
        fn get_latest_message(&self, _thread_ts: i64, _msg_ts: i64) -> CoreResult<Option<Message>> {
            Ok(None)
        }
        fn mint_dek(&self, _thread_ts: i64) -> CoreResult<Option<KmsEnvelope>> {
            Ok(None)
        }
    }

    struct EchoThreadCreateHandler;
    impl Handler for EchoThreadCreateHandler {
        fn transform(&self, op: &QueueOp, _ctx: &dyn HandlerContext) -> CoreResult<Vec<BatchEntry>> {
            let thread_ts: i64 = op.thread_ts.parse().unwrap();
            Ok(vec![BatchEntry {
                kind: BatchEntryKind::ThreadUpsert {
                    thread_ts,
                    is_create: true,
                    title: Some("t".into()),
                    author: Some("a".into()),
                    ts: op.ts,
                    kms: None,
                },
                enq_seq: op.enq_seq,
                wal_offset: op.wal_offset,
            }])
        }
    }

    struct RejectingHandler;
    impl Handler for RejectingHandler {
        fn transform(&self, _op: &QueueOp, _ctx: &dyn HandlerContext) -> CoreResult<Vec<BatchEntry>> {
            Err(progressdb_core::Error::HandlerError("nope".into()))
        }
    }

    fn op(handler: &str, thread_ts: &str, enq: u64) -> QueueOp {
        QueueOp {
            handler: handler.to_string(),
            thread_ts: thread_ts.to_string(),
            id: thread_ts.to_string(),
            payload: Vec::new(),
            ts: 1,
            enq_seq: EnqSeq(enq),
            wal_offset: WalOffset::NONE,
            extras: HashMap::new(),
        }
    }

    #[test]
    fn process_batch_applies_via_registered_handler() {
        let kv = Arc::new(MemKv::new());
        let queue = Arc::new(IntakeQueue::memory_only(8));
        let applier = Applier::new(kv.clone(), InflightTracker::new());
        let sequencer = Arc::new(Sequencer::new(applier, queue.clone()));
        let mut registry = HandlerRegistry::new();
        registry.register("thread.create", Arc::new(EchoThreadCreateHandler));
        let ingestor = Ingestor::new(
            queue,
            registry,
            Arc::new(NullContext),
            sequencer,
            IngestorConfig::default(),
            InflightTracker::new(),
        );

        ingestor.process_batch(vec![op("thread.create", "42", 1)]);

        let key = progressdb_storage::thread_meta_key(42);
        assert!(kv.get(key.as_bytes()).unwrap().is_some());
    }

    #[test]
    fn process_batch_drops_ops_with_no_registered_handler() {
        let kv = Arc::new(MemKv::new());
        let queue = Arc::new(IntakeQueue::memory_only(8));
        let applier = Applier::new(kv, InflightTracker::new());
        let sequencer = Arc::new(Sequencer::new(applier, queue.clone()));
        let registry = HandlerRegistry::new();
        let ingestor = Ingestor::new(
            queue,
            registry,
            Arc::new(NullContext),
            sequencer,
            IngestorConfig::default(),
            InflightTracker::new(),
        );

        // Should not panic despite no handler being registered.
        ingestor.process_batch(vec![op("unknown.op", "1", 1)]);
    }

    #[test]
    fn process_batch_resolves_inflight_waiter_as_rejected_when_no_handler_registered() {
        let kv = Arc::new(MemKv::new());
        let queue = Arc::new(IntakeQueue::memory_only(8));
        let inflight = InflightTracker::new();
        let applier = Applier::new(kv, inflight.clone());
        let sequencer = Arc::new(Sequencer::new(applier, queue.clone()));
        let registry = HandlerRegistry::new();
        let rx = inflight.add(("1".to_string(), "1".to_string()));
        let ingestor = Ingestor::new(
            queue,
            registry,
            Arc::new(NullContext),
            sequencer,
            IngestorConfig::default(),
            inflight,
        );

        ingestor.process_batch(vec![op("unknown.op", "1", 1)]);

        let outcome = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert!(matches!(outcome, InflightOutcome::Rejected { .. }));
    }

    #[test]
    fn process_batch_drops_ops_whose_handler_errors() {
        let kv = Arc::new(MemKv::new());
        let queue = Arc::new(IntakeQueue::memory_only(8));
        let applier = Applier::new(kv, InflightTracker::new());
        let sequencer = Arc::new(Sequencer::new(applier, queue.clone()));
        let mut registry = HandlerRegistry::new();
        registry.register("thread.create", Arc::new(RejectingHandler));
        let ingestor = Ingestor::new(
            queue,
            registry,
            Arc::new(NullContext),
            sequencer,
            IngestorConfig::default(),
            InflightTracker::new(),
        );

        ingestor.process_batch(vec![op("thread.create", "1", 1)]);
    }

    #[test]
    fn sequencer_applies_out_of_order_submissions_in_apply_seq_order() {
        let kv = Arc::new(MemKv::new());
        let queue = Arc::new(IntakeQueue::memory_only(8));
        let applier = Applier::new(kv.clone(), InflightTracker::new());
        let sequencer = Sequencer::new(applier, queue);

        let entry = |thread_ts: i64, ts: i64| BatchEntry {
            kind: BatchEntryKind::ThreadUpsert {
                thread_ts,
                is_create: true,
                title: None,
                author: None,
                ts,
                kms: None,
            },
            enq_seq: EnqSeq(1),
            wal_offset: WalOffset::NONE,
        };

        // Submit apply_seq 2 before apply_seq 1; it must buffer, not apply,
        // until 1 arrives.
        sequencer.submit(ApplyBatch::new(2, vec![entry(2, 20)])).unwrap();
        assert!(kv
            .get(progressdb_storage::thread_meta_key(2).as_bytes())
            .unwrap()
            .is_none());

        sequencer.submit(ApplyBatch::new(1, vec![entry(1, 10)])).unwrap();
        assert!(kv
            .get(progressdb_storage::thread_meta_key(1).as_bytes())
            .unwrap()
            .is_some());
        assert!(kv
            .get(progressdb_storage::thread_meta_key(2).as_bytes())
            .unwrap()
            .is_some());
    }
}
