//! RocksDB storage layer
//!
//! One column family per [`Bucket`]; every [`Transaction`] becomes a single
//! `WriteBatch`, so a commit lands entirely or not at all.

use super::{Bucket, Database, Transaction, WriteOp};
use crate::error::{DagError, Result};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Database path
    pub path: PathBuf,

    /// Write buffer size (64MB default)
    pub write_buffer_size: usize,

    /// Max open files (1000 default)
    pub max_open_files: i32,

    /// Sync every batch to the write-ahead log
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/dag"),
            write_buffer_size: 64 * 1024 * 1024, // 64MB
            max_open_files: 1000,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

pub struct RocksDbStore {
    db: Arc<DB>,
    config: RocksDbConfig,
}

impl RocksDbStore {
    /// Open or create a store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = RocksDbConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        };
        Self::open_with_config(config)
    }

    pub fn open_with_config(config: RocksDbConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_open_files(config.max_open_files);
        opts.set_compression_type(DBCompressionType::Lz4);

        if config.enable_statistics {
            opts.enable_statistics();
        }

        opts.set_max_background_jobs(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Bucket::ALL
            .iter()
            .map(|b| ColumnFamilyDescriptor::new(b.name(), opts.clone()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.path, cf_descriptors)
            .map_err(|e| DagError::Storage(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self { db: Arc::new(db), config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf_handle(&self, bucket: Bucket) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(bucket.name())
            .ok_or_else(|| DagError::Storage(format!("Column family not found: {}", bucket)))
    }

    /// Flush pending writes
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| DagError::Storage(format!("Flush error: {}", e)))
    }

    /// Compact the database
    pub fn compact(&self) {
        self.db.compact_range::<&[u8], &[u8]>(None, None);
    }

    /// Approximate on-disk size of all buckets
    pub fn db_size(&self) -> Result<u64> {
        let mut total_size = 0u64;
        for bucket in Bucket::ALL {
            let cf = self.cf_handle(bucket)?;
            if let Ok(Some(size)) = self.db.property_int_value_cf(cf, "rocksdb.total-sst-files-size") {
                total_size += size;
            }
        }
        Ok(total_size)
    }
}

impl Database for RocksDbStore {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(bucket)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| DagError::Storage(format!("Read error: {}", e)))
    }

    fn scan(&self, bucket: Bucket) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(bucket)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) =
                item.map_err(|e| DagError::Storage(format!("Iterator error: {}", e)))?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn write(&self, tx: Transaction) -> Result<()> {
        let start = Instant::now();
        let ops = tx.len();

        let mut batch = WriteBatch::default();
        for op in tx.into_ops() {
            match op {
                WriteOp::Put { bucket, key, value } => {
                    batch.put_cf(self.cf_handle(bucket)?, key, value);
                }
                WriteOp::Delete { bucket, key } => {
                    batch.delete_cf(self.cf_handle(bucket)?, key);
                }
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| DagError::Storage(format!("Write error: {}", e)))?;

        trace!(ops, elapsed_us = start.elapsed().as_micros() as u64, "batch written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksDbStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksDbStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_store_creation() {
        let (store, temp_dir) = create_test_store();
        assert_eq!(store.path(), temp_dir.path());
    }

    #[test]
    fn test_batch_put_and_delete() {
        let (store, _temp_dir) = create_test_store();

        let mut tx = Transaction::new();
        tx.put(Bucket::Blocks, vec![0, 0, 0, 1], vec![9, 9]);
        tx.put(Bucket::Tips, vec![0, 0, 0, 1], vec![1]);
        store.write(tx).unwrap();

        assert_eq!(store.get(Bucket::Blocks, &[0, 0, 0, 1]).unwrap(), Some(vec![9, 9]));
        assert!(store.get(Bucket::Orders, &[0, 0, 0, 1]).unwrap().is_none());

        let mut tx = Transaction::new();
        tx.delete(Bucket::Tips, vec![0, 0, 0, 1]);
        store.write(tx).unwrap();
        assert!(store.scan(Bucket::Tips).unwrap().is_empty());
    }

    #[test]
    fn test_scan_is_key_ordered() {
        let (store, _temp_dir) = create_test_store();
        let mut tx = Transaction::new();
        for order in [3u32, 1, 2] {
            tx.put(Bucket::Orders, order.to_be_bytes().to_vec(), vec![order as u8]);
        }
        store.write(tx).unwrap();

        let values: Vec<u8> = store.scan(Bucket::Orders).unwrap().into_iter().map(|(_, v)| v[0]).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }
}
