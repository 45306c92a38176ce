//! Storage layer
//!
//! The ledger sees one flat, ordered key-value space (see [`crate::keys`] for
//! the layout). Two backends implement it:
//!
//! - [`MemStore`] - `BTreeMap`, used by tests and ephemeral nodes
//! - [`RocksStore`] - RocksDB, column family `state`
//!
//! Writes from one operation reach a backend through
//! [`KvStore::write_batch`], which RocksDB applies atomically.

use crate::{
    config::{RocksDBConfig, StorageBackend},
    error::{Error, Result},
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Column family holding all ledger state
const CF_STATE: &str = "state";

/// A pending write: `Some(value)` to put, `None` to delete
pub type BatchOp = (Vec<u8>, Option<Vec<u8>>);

/// Ordered key-value store
pub trait KvStore: Send {
    /// Read a value
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a value
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Remove a value
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// All pairs whose key starts with `prefix`, in ascending key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply a set of writes. Backends that can, apply them atomically.
    fn write_batch(&mut self, batch: Vec<BatchOp>) -> Result<()> {
        for (key, value) in batch {
            match value {
                Some(value) => self.put(key, value)?,
                None => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.data.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// RocksDB-backed store
pub struct RocksStore {
    db: DB,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(path: &Path, tuning: &RocksDBConfig) -> Result<Self> {
        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(tuning.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(tuning.max_write_buffer_number);
        db_opts.set_target_file_size_base(tuning.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(tuning.max_background_jobs);
        db_opts.set_level_zero_file_num_compaction_trigger(
            tuning.level0_file_num_compaction_trigger,
        );
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if tuning.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_STATE,
            Self::cf_options_state(),
        )];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB state store");

        Ok(Self { db })
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // State is read on every operation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_state(&self) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(CF_STATE)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_STATE)))
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_state()?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let cf = self.cf_state()?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let cf = self.cf_state()?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_state()?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut pairs = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            pairs.push((key.to_vec(), value.to_vec()));
        }
        Ok(pairs)
    }

    fn write_batch(&mut self, ops: Vec<BatchOp>) -> Result<()> {
        let cf = self.cf_state()?;
        let mut batch = WriteBatch::default();
        let count = ops.len();

        for (key, value) in ops {
            match value {
                Some(value) => batch.put_cf(&cf, key, value),
                None => batch.delete_cf(&cf, key),
            }
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(writes = count, "Batch committed");
        Ok(())
    }
}

/// Open the store selected by `config`
pub fn open_store(config: &Config) -> Result<Box<dyn KvStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory state store");
            Ok(Box::new(MemStore::new()))
        }
        StorageBackend::RocksDb => Ok(Box::new(RocksStore::open(
            &config.data_dir,
            &config.storage.rocksdb,
        )?)),
    }
}

/// SHA-256 over every key/value pair in key order
///
/// Nodes replaying the same blocks must arrive at the same hash.
pub fn app_hash(store: &dyn KvStore) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    for (key, value) in store.scan_prefix(&[])? {
        hasher.update((key.len() as u32).to_be_bytes());
        hasher.update(&key);
        hasher.update((value.len() as u32).to_be_bytes());
        hasher.update(&value);
    }
    Ok(hasher.finalize().into())
}
