//! Storage module for persistent DAG data
//!
//! Everything the DAG persists goes through the [`Database`] trait: named
//! buckets of byte keys and values, read directly and written in atomic
//! [`Transaction`]s.
//! - RocksDB backend with one column family per bucket
//! - In-memory backend for tests and ephemeral nodes

pub mod codec;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocksdb;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use self::rocksdb::{RocksDbConfig, RocksDbStore};

use crate::error::Result;
use std::fmt;

/// Storage buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    /// id -> encoded block record
    Blocks,
    /// hash -> id
    BlockIndex,
    /// order -> id
    Orders,
    /// tip id -> main flag
    Tips,
    /// id -> blue flag, blocks merged by the virtual block (PHANTOM)
    DiffAnticone,
    /// id -> selected-parent data (GHOSTDAG)
    Ghostdag,
    /// id -> opaque block state
    BlockState,
    /// DAG wide metadata
    Info,
    /// hash -> serialized block body, used by the node's provider
    Payloads,
}

impl Bucket {
    pub const ALL: [Bucket; 9] = [
        Bucket::Blocks,
        Bucket::BlockIndex,
        Bucket::Orders,
        Bucket::Tips,
        Bucket::DiffAnticone,
        Bucket::Ghostdag,
        Bucket::BlockState,
        Bucket::Info,
        Bucket::Payloads,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Bucket::Blocks => "blocks",
            Bucket::BlockIndex => "block_index",
            Bucket::Orders => "orders",
            Bucket::Tips => "tips",
            Bucket::DiffAnticone => "diff_anticone",
            Bucket::Ghostdag => "ghostdag",
            Bucket::BlockState => "block_state",
            Bucket::Info => "info",
            Bucket::Payloads => "payloads",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed key of the DAG info record
pub const INFO_KEY: &[u8] = b"dag_info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { bucket: Bucket, key: Vec<u8>, value: Vec<u8> },
    Delete { bucket: Bucket, key: Vec<u8> },
}

/// Ordered list of writes applied atomically
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    ops: Vec<WriteOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, bucket: Bucket, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put { bucket, key: key.into(), value: value.into() });
    }

    pub fn delete(&mut self, bucket: Bucket, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete { bucket, key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Key/value store with named buckets and atomic batches
pub trait Database: Send + Sync {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Every entry of `bucket` in key order
    fn scan(&self, bucket: Bucket) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every op of `tx` or none of them
    fn write(&self, tx: Transaction) -> Result<()>;
}

impl dyn Database + '_ {
    /// Build a transaction with `f` and write it
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        let mut tx = Transaction::new();
        f(&mut tx)?;
        if tx.is_empty() {
            return Ok(());
        }
        self.write(tx)
    }

    /// Read-only access scoped to `f`
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Database) -> Result<T>,
    {
        f(self)
    }
}
