//! The bounded intake queue: an MPMC channel in front of the ingestor,
//! optionally WAL-backed so an op is durable before it becomes visible to a
//! worker.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use progressdb_core::types::{EnqSeq, WalOffset};
use progressdb_core::{Error, QueueOp, Result};
use progressdb_durability::{WalConfig, WalWriter};

use crate::wire;

/// A not-yet-assigned-sequence request to enqueue.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Selects which handler processes this op.
    pub handler: String,
    /// Owning thread, as a string ordinal.
    pub thread_ts: String,
    /// Target entity id.
    pub id: String,
    /// Encoded `Payload` bytes.
    pub payload: Vec<u8>,
    /// Event timestamp in nanoseconds.
    pub ts: i64,
    /// Side-channel string metadata.
    pub extras: HashMap<String, String>,
}

/// A snapshot of queue operational counters, the concurrency crate's analogue
/// of the durability crate's `WalCounters`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    /// Total ops successfully enqueued.
    pub enqueued: u64,
    /// Total `TryEnqueue` calls that observed a full channel.
    pub dropped_full: u64,
    /// Total ops acknowledged (applied) so far.
    pub acked: u64,
    /// Ops durably recorded but not yet acknowledged.
    pub outstanding: usize,
}

/// The bounded intake queue. Cloning is cheap (it's a handle); workers pull
/// from [`IntakeQueue::receiver`].
pub struct IntakeQueue {
    sender: Sender<QueueOp>,
    receiver: Receiver<QueueOp>,
    wal: Option<Mutex<WalWriter>>,
    closed: AtomicBool,
    next_enq_seq: AtomicU64,
    outstanding: Mutex<BTreeSet<i64>>,
    enqueued: AtomicU64,
    dropped_full: AtomicU64,
    acked: AtomicU64,
    /// Count of enqueuers currently between their `closed` check and their
    /// channel send, so `close` can wait for them to finish before it closes
    /// the WAL out from under an in-flight `persist`.
    inflight_enqueues: AtomicUsize,
}

/// Marks one enqueuer as in-flight for the lifetime of the guard; `close`
/// spins on [`IntakeQueue::inflight_enqueues`] reaching zero before
/// finalizing the WAL.
struct EnqueueGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> EnqueueGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        EnqueueGuard { counter }
    }
}

impl Drop for EnqueueGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl IntakeQueue {
    /// Build a memory-only queue of the given capacity (no WAL backing).
    pub fn memory_only(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        IntakeQueue {
            sender,
            receiver,
            wal: None,
            closed: AtomicBool::new(false),
            next_enq_seq: AtomicU64::new(1),
            outstanding: Mutex::new(BTreeSet::new()),
            enqueued: AtomicU64::new(0),
            dropped_full: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            inflight_enqueues: AtomicUsize::new(0),
        }
    }

    /// Build a WAL-backed queue: opens (or resumes) the WAL rooted at
    /// `wal_config.dir`. Returns any records recovered from a prior run
    /// alongside the queue, for replay by recovery before workers start.
    pub fn wal_backed(
        capacity: usize,
        wal_config: WalConfig,
    ) -> Result<(Self, progressdb_durability::Recovered)> {
        let (recovered, writer) =
            progressdb_durability::open(wal_config).map_err(progressdb_core::Error::from)?;
        let next_enq_seq = recovered
            .records
            .iter()
            .filter_map(|r| wire::decode(&r.payload).ok())
            .map(|op| op.enq_seq.0)
            .max()
            .map(|m| m + 1)
            .unwrap_or(1);
        let (sender, receiver) = bounded(capacity);
        let outstanding: BTreeSet<i64> = recovered.records.iter().map(|r| r.offset).collect();
        let queue = IntakeQueue {
            sender,
            receiver,
            wal: Some(Mutex::new(writer)),
            closed: AtomicBool::new(false),
            next_enq_seq: AtomicU64::new(next_enq_seq),
            outstanding: Mutex::new(outstanding),
            enqueued: AtomicU64::new(0),
            dropped_full: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            inflight_enqueues: AtomicUsize::new(0),
        };
        Ok((queue, recovered))
    }

    fn build_op(&self, req: SubmitRequest) -> QueueOp {
        let enq_seq = EnqSeq(self.next_enq_seq.fetch_add(1, Ordering::SeqCst));
        QueueOp {
            handler: req.handler,
            thread_ts: req.thread_ts,
            id: req.id,
            payload: req.payload,
            ts: req.ts,
            enq_seq,
            wal_offset: WalOffset::NONE,
            extras: req.extras,
        }
    }

    fn persist(&self, op: &mut QueueOp) -> Result<()> {
        if let Some(wal) = &self.wal {
            let bytes = wire::encode(op);
            let mut writer = wal.lock();
            let offset = writer.append(&bytes).map_err(progressdb_core::Error::from)?;
            op.wal_offset = WalOffset(offset);
            self.outstanding.lock().insert(offset);
        }
        Ok(())
    }

    /// Non-blocking enqueue: returns `Error::QueueFull` immediately if the
    /// channel is at capacity, after the op has already been made durable
    /// (if WAL-backed) — the WAL append happens before the channel send.
    pub fn try_enqueue(&self, req: SubmitRequest) -> Result<EnqSeq> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }
        let _guard = EnqueueGuard::enter(&self.inflight_enqueues);
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }
        let mut op = self.build_op(req);
        self.persist(&mut op)?;
        let enq_seq = op.enq_seq;
        match self.sender.try_send(op) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(enq_seq)
            }
            Err(TrySendError::Full(_)) => {
                self.dropped_full.fetch_add(1, Ordering::Relaxed);
                Err(Error::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::QueueClosed),
        }
    }

    /// Blocking enqueue, honoring an optional deadline: with `None` this
    /// blocks indefinitely for channel capacity; with `Some(deadline)` it
    /// returns `Error::Timeout` once `deadline` elapses. The op is durable
    /// before this call can block on channel space.
    pub fn enqueue(&self, req: SubmitRequest, deadline: Option<Instant>) -> Result<EnqSeq> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }
        let _guard = EnqueueGuard::enter(&self.inflight_enqueues);
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }
        let mut op = self.build_op(req);
        self.persist(&mut op)?;
        let enq_seq = op.enq_seq;
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.sender.send_timeout(op, remaining).map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => Error::Timeout,
                    SendTimeoutError::Disconnected(_) => Error::QueueClosed,
                })?;
            }
            None => {
                self.sender.send(op).map_err(|_| Error::QueueClosed)?;
            }
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(enq_seq)
    }

    /// A clone of the receiving end, for worker threads to pull from.
    pub fn receiver(&self) -> Receiver<QueueOp> {
        self.receiver.clone()
    }

    /// Acknowledge a durable offset as applied, advancing the WAL's
    /// truncation low-water-mark. No-op for `WalOffset::NONE`.
    pub fn ack(&self, offset: WalOffset) -> Result<()> {
        if !offset.is_durable() {
            return Ok(());
        }
        let min_seq = {
            let mut outstanding = self.outstanding.lock();
            outstanding.remove(&offset.0);
            outstanding.iter().next().copied().unwrap_or(i64::MAX)
        };
        self.acked.fetch_add(1, Ordering::Relaxed);
        if let Some(wal) = &self.wal {
            wal.lock()
                .truncate_before(min_seq)
                .map_err(progressdb_core::Error::from)?;
        }
        Ok(())
    }

    /// Stop accepting new enqueues, wait for every enqueuer already past the
    /// `closed` check to finish its send, then finalize the WAL. Items
    /// already on the channel continue to drain normally; callers should
    /// wait for [`IntakeQueue::is_drained`] before dropping the queue — a
    /// finalized WAL segment no longer accepts `append`, so anything still
    /// mid-`persist` when this returned would otherwise race the close.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        while self.inflight_enqueues.load(Ordering::SeqCst) > 0 {
            std::thread::yield_now();
        }
        if let Some(wal) = &self.wal {
            let _ = wal.lock().close();
        }
    }

    /// `true` once every durably-recorded op has been acknowledged.
    pub fn is_drained(&self) -> bool {
        self.outstanding.lock().is_empty()
    }

    /// A point-in-time snapshot of queue counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            outstanding: self.outstanding.lock().len(),
        }
    }
}
