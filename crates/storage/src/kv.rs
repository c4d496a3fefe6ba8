//! The ordered, byte-keyed KV engine abstraction: a pluggable backend the
//! rest of the crate depends on but does not implement in full. This crate
//! ships [`MemKv`], an in-memory reference implementation, so the rest of
//! the workspace builds and tests standalone.

use progressdb_core::error::Result;

/// A single staged write inside a [`Batch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or overwrite `key` with `value`.
    Put(Vec<u8>, Vec<u8>),
    /// Remove `key`, if present.
    Delete(Vec<u8>),
}

/// A sequence of writes applied atomically by [`KvEngine::apply`].
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// An empty batch.
    pub fn new() -> Self {
        Batch::default()
    }

    /// Stage a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
        self
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete(key.into()));
        self
    }

    /// `true` if no operations have been staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The staged operations, in insertion order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// An ordered, byte-keyed local store: point get/set/delete, atomic batch
/// apply, and prefix/range iteration honoring lower-inclusive /
/// upper-exclusive bounds.
pub trait KvEngine: Send + Sync {
    /// Point read.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Point write, outside of a batch (used by bookkeeping paths that don't
    /// need cross-key atomicity, e.g. WAL offset watermarks).
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Point delete, outside of a batch.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply every operation in `batch` atomically. `sync` requests an
    /// fsync-equivalent durability barrier before returning.
    fn apply(&self, batch: Batch, sync: bool) -> Result<()>;

    /// Iterate keys in `[lower, upper)` byte order (`upper = None` means
    /// unbounded). Used for prefix scans via a shared-prefix upper bound.
    fn scan(&self, lower: &[u8], upper: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Release any resources held by the engine. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Compute the exclusive upper bound for a prefix scan over `prefix`: the
/// smallest byte string greater than every string starting with `prefix`.
/// Returns `None` if `prefix` is all `0xFF` bytes (no finite upper bound).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    for i in (0..upper.len()).rev() {
        if upper[i] != 0xFF {
            upper[i] += 1;
            upper.truncate(i + 1);
            return Some(upper);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_upper_bound_increments_last_non_ff_byte() {
        assert_eq!(prefix_upper_bound(b"abc"), Some(b"abd".to_vec()));
    }

    #[test]
    fn prefix_upper_bound_handles_trailing_ff() {
        assert_eq!(prefix_upper_bound(&[b'a', 0xFF]), Some(vec![b'b']));
    }

    #[test]
    fn prefix_upper_bound_none_for_all_ff() {
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn batch_tracks_emptiness() {
        let mut b = Batch::new();
        assert!(b.is_empty());
        b.put(b"k".to_vec(), b"v".to_vec());
        assert!(!b.is_empty());
    }
}
