//! `MemKv`: an in-memory, ordered reference implementation of [`KvEngine`].
//!
//! Backed by a `BTreeMap` under a `parking_lot::RwLock`. Good enough to
//! exercise every ordering guarantee the core promises; not a durability
//! story of its own — that is the WAL's job.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use progressdb_core::error::Result;

use crate::kv::{Batch, BatchOp, KvEngine};

/// An in-memory ordered KV engine.
#[derive(Debug, Default)]
pub struct MemKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    /// A fresh, empty store.
    pub fn new() -> Self {
        MemKv {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of live keys. Test/diagnostic helper.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// `true` if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvEngine for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn apply(&self, batch: Batch, _sync: bool) -> Result<()> {
        let mut guard = self.map.write();
        for op in batch.ops() {
            match op {
                BatchOp::Put(k, v) => {
                    guard.insert(k.clone(), v.clone());
                }
                BatchOp::Delete(k) => {
                    guard.remove(k);
                }
            }
        }
        Ok(())
    }

    fn scan(&self, lower: &[u8], upper: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.map.read();
        let iter = guard.range(lower.to_vec()..);
        let out = match upper {
            Some(u) => iter
                .take_while(|(k, _)| k.as_slice() < u)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => iter.map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        Ok(out)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
