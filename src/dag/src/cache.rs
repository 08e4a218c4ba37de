//! Block payload cache
//!
//! Payloads are owned outside the DAG. The cache keeps recently used ones
//! by block id and falls back to the [`BlockDataProvider`] after eviction.

use crate::data::{BlockData, BlockDataProvider};
use crate::error::{DagError, Result};
use crate::hash::{BlockId, Hash};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CachedPayload {
    data: Arc<dyn BlockData>,
    touched: Instant,
}

#[derive(Default)]
pub struct PayloadCache {
    entries: DashMap<BlockId, CachedPayload>,
}

impl PayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: BlockId, data: Arc<dyn BlockData>) {
        self.entries.insert(id, CachedPayload { data, touched: Instant::now() });
    }

    /// Cached payload, refreshing its last-touched time
    pub fn get(&self, id: BlockId) -> Option<Arc<dyn BlockData>> {
        self.entries.get_mut(&id).map(|mut entry| {
            entry.touched = Instant::now();
            Arc::clone(&entry.data)
        })
    }

    /// Cached payload or a reload through `provider`. A block known to the
    /// DAG whose payload cannot be produced is an invariant violation.
    pub fn get_or_load(&self, id: BlockId, hash: &Hash, provider: &dyn BlockDataProvider) -> Result<Arc<dyn BlockData>> {
        if let Some(data) = self.get(id) {
            return Ok(data);
        }
        let data = provider
            .get_block_data(hash)
            .ok_or_else(|| DagError::Fatal(format!("payload of block {} is unavailable", hash)))?;
        self.insert(id, Arc::clone(&data));
        Ok(data)
    }

    pub fn remove(&self, id: BlockId) {
        self.entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop payloads untouched for longer than `ttl`; returns how many
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        self.evict_older_than(Instant::now(), ttl)
    }

    pub(crate) fn evict_older_than(&self, now: Instant, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.touched) <= ttl);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CandidateBlock, MemoryProvider};

    #[test]
    fn test_load_through_provider() {
        let provider = MemoryProvider::new();
        let block = CandidateBlock::genesis(Hash::digest(b"g"));
        let hash = block.hash;
        provider.insert(Arc::new(block));

        let cache = PayloadCache::new();
        assert!(cache.get(0).is_none());
        let data = cache.get_or_load(0, &hash, &provider).unwrap();
        assert_eq!(data.hash(), hash);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_missing_payload_is_fatal() {
        let cache = PayloadCache::new();
        let err = cache
            .get_or_load(3, &Hash::digest(b"gone"), &MemoryProvider::new())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_eviction_by_age() {
        let cache = PayloadCache::new();
        cache.insert(1, Arc::new(CandidateBlock::genesis(Hash::digest(b"a"))));
        cache.insert(2, Arc::new(CandidateBlock::genesis(Hash::digest(b"b"))));

        assert_eq!(cache.evict_expired(Duration::from_secs(60)), 0);
        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(cache.evict_older_than(later, Duration::from_secs(60)), 2);
        assert!(cache.is_empty());
    }
}
