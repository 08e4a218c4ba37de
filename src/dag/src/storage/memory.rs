//! In-memory [`Database`] backend

use super::{Bucket, Database, Transaction, WriteOp};
use crate::error::{DagError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// BTreeMap backed store. Writes are atomic under the table lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Bucket, Table>>,
    writes: AtomicU64,
    fail_next: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions written so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Make the next `write` fail without applying anything
    pub fn fail_next_write(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn len(&self, bucket: Bucket) -> usize {
        self.tables.read().get(&bucket).map_or(0, |t| t.len())
    }
}

impl Database for MemoryStore {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tables.read().get(&bucket).and_then(|t| t.get(key).cloned()))
    }

    fn scan(&self, bucket: Bucket) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .tables
            .read()
            .get(&bucket)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn write(&self, tx: Transaction) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DagError::Storage("injected write failure".to_string()));
        }
        let mut tables = self.tables.write();
        for op in tx.into_ops() {
            match op {
                WriteOp::Put { bucket, key, value } => {
                    tables.entry(bucket).or_default().insert(key, value);
                }
                WriteOp::Delete { bucket, key } => {
                    if let Some(t) = tables.get_mut(&bucket) {
                        t.remove(&key);
                    }
                }
            }
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
