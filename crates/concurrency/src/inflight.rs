//! The in-flight tracker (§4.4): lets a caller that just enqueued a
//! provisional write wait for its eventual apply, keyed by the
//! `(thread_ts, id)` pair the caller already knows before any sequence is
//! assigned.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// Identifies a provisional write before it has an assigned `seq`.
pub type ProvisionalKey = (String, String);

/// The outcome an in-flight waiter is notified with.
#[derive(Debug, Clone)]
pub enum InflightOutcome {
    /// The op applied successfully, with the final per-thread `seq`.
    Applied { seq: u64 },
    /// The op's handler rejected it; this is a `HandlerError`, not a bug.
    Rejected { detail: String },
}

struct Waiter {
    sender: Sender<InflightOutcome>,
}

/// Tracks provisional keys currently awaiting apply, and wakes waiters once
/// the apply loop resolves them.
#[derive(Default)]
pub struct InflightTracker {
    waiters: Mutex<HashMap<ProvisionalKey, Vec<Waiter>>>,
}

impl InflightTracker {
    /// Construct an empty tracker.
    pub fn new() -> Arc<Self> {
        Arc::new(InflightTracker::default())
    }

    /// Register interest in `key`, returning a receiver that will fire once
    /// [`InflightTracker::resolve`] is called for this key.
    pub fn add(&self, key: ProvisionalKey) -> Receiver<InflightOutcome> {
        let (tx, rx) = bounded(1);
        self.waiters
            .lock()
            .entry(key)
            .or_default()
            .push(Waiter { sender: tx });
        rx
    }

    /// `true` if any caller is currently waiting on `key`.
    pub fn is_inflight(&self, key: &ProvisionalKey) -> bool {
        self.waiters.lock().contains_key(key)
    }

    /// Notify and remove every waiter registered for `key`.
    pub fn resolve(&self, key: &ProvisionalKey, outcome: InflightOutcome) {
        if let Some(waiters) = self.waiters.lock().remove(key) {
            for waiter in waiters {
                // A waiter that already gave up (receiver dropped) is fine
                // to ignore — there is nobody left to notify.
                let _ = waiter.sender.send(outcome.clone());
            }
        }
    }

    /// Number of distinct keys currently tracked, for diagnostics/tests.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// `true` iff no keys are currently tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
