//! Per-operation execution context
//!
//! A [`Context`] buffers every write of one operation in a [`CacheStore`]
//! layered over the durable store. Reads see the buffered writes. The owner
//! calls [`Context::commit`] when the operation succeeded and simply drops
//! the context when it failed, so a failed operation leaves no trace.
//!
//! Contexts nest: [`Context::branch`] layers another buffer on top, used to
//! run notification hooks whose writes are kept only if the hook succeeds.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

use crate::{
    storage::{BatchOp, KvStore},
    types::BlockInfo,
    Result,
};

/// Write buffer over a parent store
pub struct CacheStore<'a> {
    parent: &'a mut dyn KvStore,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> CacheStore<'a> {
    /// Buffer writes on top of `parent`
    pub fn new(parent: &'a mut dyn KvStore) -> Self {
        Self {
            parent,
            writes: BTreeMap::new(),
        }
    }

    /// Number of buffered writes
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Flush buffered writes into the parent as one batch
    pub fn commit(self) -> Result<usize> {
        let CacheStore { parent, writes } = self;
        let count = writes.len();
        if count > 0 {
            let batch: Vec<BatchOp> = writes.into_iter().collect();
            parent.write_batch(batch)?;
        }
        Ok(count)
    }
}

impl KvStore for CacheStore<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(buffered) => Ok(buffered.clone()),
            None => self.parent.get(key),
        }
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.writes.insert(key, Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.parent.scan_prefix(prefix)?.into_iter().collect();

        for (key, value) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }
}

impl std::fmt::Debug for CacheStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("pending_writes", &self.writes.len())
            .finish()
    }
}

/// Store access and block metadata for one operation
#[derive(Debug)]
pub struct Context<'a> {
    store: CacheStore<'a>,
    block: BlockInfo,
}

impl<'a> Context<'a> {
    /// Start an operation over `parent` in `block`
    pub fn new(parent: &'a mut dyn KvStore, block: BlockInfo) -> Self {
        Self {
            store: CacheStore::new(parent),
            block,
        }
    }

    /// Block being executed
    pub fn block(&self) -> BlockInfo {
        self.block
    }

    /// Current block height
    pub fn height(&self) -> u64 {
        self.block.height
    }

    /// Layer a nested write buffer over this context
    pub fn branch(&mut self) -> Context<'_> {
        Context {
            store: CacheStore::new(&mut self.store),
            block: self.block,
        }
    }

    /// Apply buffered writes to the parent
    pub fn commit(self) -> Result<usize> {
        self.store.commit()
    }

    /// Number of buffered writes
    pub fn pending_writes(&self) -> usize {
        self.store.pending_writes()
    }

    /// Read-only view of the store, including buffered writes
    pub fn store(&self) -> &dyn KvStore {
        &self.store
    }

    /// Read and decode a value
    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and write a value
    pub fn set<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.store.put(key, bytes)
    }

    /// Write a key with no value (index entries)
    pub fn set_marker(&mut self, key: Vec<u8>) -> Result<()> {
        self.store.put(key, Vec::new())
    }

    /// True if the key exists
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.store.get(key)?.is_some())
    }

    /// Remove a key
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.store.delete(key)
    }

    /// Keys under `prefix`, ascending
    pub fn keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .store
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Decoded pairs under `prefix`, ascending
    pub fn scan<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>> {
        self.store
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, bytes)| Ok((key, bincode::deserialize(&bytes)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    #[test]
    fn test_dropped_context_writes_nothing() {
        let mut store = MemStore::new();
        {
            let mut ctx = Context::new(&mut store, BlockInfo::at(1));
            ctx.set(b"k".to_vec(), &5u64).unwrap();
            assert_eq!(ctx.get::<u64>(b"k").unwrap(), Some(5));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_commit_applies_writes() {
        let mut store = MemStore::new();
        store.put(b"old".to_vec(), vec![1]).unwrap();

        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        ctx.set(b"k".to_vec(), &5u64).unwrap();
        ctx.delete(b"old").unwrap();
        assert_eq!(ctx.commit().unwrap(), 2);

        assert_eq!(store.get(b"old").unwrap(), None);
        assert!(store.get(b"k").unwrap().is_some());
    }

    #[test]
    fn test_scan_merges_buffer_and_parent() {
        let mut store = MemStore::new();
        store.put(b"p/1".to_vec(), vec![1]).unwrap();
        store.put(b"p/2".to_vec(), vec![2]).unwrap();

        let mut ctx = Context::new(&mut store, BlockInfo::at(1));
        ctx.delete(b"p/1").unwrap();
        ctx.set_marker(b"p/3".to_vec()).unwrap();

        let keys = ctx.keys(b"p/").unwrap();
        assert_eq!(keys, vec![b"p/2".to_vec(), b"p/3".to_vec()]);
    }

    #[test]
    fn test_branch_commits_into_outer_buffer_only() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockInfo::at(3));

        {
            let mut branch = ctx.branch();
            branch.set(b"kept".to_vec(), &1u64).unwrap();
            branch.commit().unwrap();
        }
        {
            let mut branch = ctx.branch();
            branch.set(b"discarded".to_vec(), &2u64).unwrap();
        }

        assert!(ctx.has(b"kept").unwrap());
        assert!(!ctx.has(b"discarded").unwrap());
        drop(ctx);
        assert!(store.is_empty());
    }
}
