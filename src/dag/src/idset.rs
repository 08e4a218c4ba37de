//! Order-stable id and hash sets
//!
//! `IdSet` is the adjacency representation used throughout the DAG: a block
//! owns sets of *ids*, never the referenced blocks. Iteration follows
//! insertion order; deterministic orders are obtained through the explicit
//! `sort_*` helpers.

use crate::hash::{BlockId, Hash};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Mapping from block id to an arbitrary payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSet<V = ()> {
    map: IndexMap<BlockId, V>,
}

impl<V> Default for IdSet<V> {
    fn default() -> Self {
        IdSet { map: IndexMap::new() }
    }
}

impl IdSet<()> {
    pub fn add(&mut self, id: BlockId) -> bool {
        self.map.insert(id, ()).is_none()
    }

    pub fn from_ids<I: IntoIterator<Item = BlockId>>(ids: I) -> Self {
        let mut set = IdSet::new();
        for id in ids {
            set.add(id);
        }
        set
    }
}

impl<V> IdSet<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        IdSet { map: IndexMap::with_capacity(capacity) }
    }

    /// Insert or replace the payload for `id`
    pub fn add_pair(&mut self, id: BlockId, value: V) {
        self.map.insert(id, value);
    }

    /// Remove `id` keeping the relative order of the remaining entries
    pub fn remove(&mut self, id: BlockId) -> Option<V> {
        self.map.shift_remove(&id)
    }

    pub fn has(&self, id: BlockId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn get(&self, id: BlockId) -> Option<&V> {
        self.map.get(&id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut V> {
        self.map.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn first(&self) -> Option<BlockId> {
        self.map.keys().next().copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.map.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &V)> + '_ {
        self.map.iter().map(|(k, v)| (*k, v))
    }

    /// Adds every entry of `other` not already present
    pub fn union(&mut self, other: &IdSet<V>)
    where
        V: Clone,
    {
        for (id, v) in other.iter() {
            if !self.has(id) {
                self.add_pair(id, v.clone());
            }
        }
    }

    pub fn intersection<W>(&self, other: &IdSet<W>) -> IdSet<V>
    where
        V: Clone,
    {
        self.filtered(|id| other.has(id))
    }

    pub fn difference<W>(&self, other: &IdSet<W>) -> IdSet<V>
    where
        V: Clone,
    {
        self.filtered(|id| !other.has(id))
    }

    /// True if every id of `other` is in `self`
    pub fn contain<W>(&self, other: &IdSet<W>) -> bool {
        other.ids().all(|id| self.has(id))
    }

    /// Same id set, regardless of order and payloads
    pub fn is_equal<W>(&self, other: &IdSet<W>) -> bool {
        self.len() == other.len() && self.contain(other)
    }

    pub fn sort_by_id(&self, descending: bool) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self.ids().collect();
        if descending {
            ids.sort_unstable_by(|a, b| b.cmp(a));
        } else {
            ids.sort_unstable();
        }
        ids
    }

    /// Sorts ids ascending by a caller supplied key (height, hash, priority...)
    pub fn sort_by_key<K, F>(&self, mut key: F) -> Vec<BlockId>
    where
        K: Ord,
        F: FnMut(BlockId, &V) -> K,
    {
        let mut keyed: Vec<(K, BlockId)> = self.iter().map(|(id, v)| (key(id, v), id)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    pub fn sort_by<F>(&self, mut compare: F) -> Vec<BlockId>
    where
        F: FnMut(BlockId, BlockId) -> Ordering,
    {
        let mut ids: Vec<BlockId> = self.ids().collect();
        ids.sort_by(|a, b| compare(*a, *b));
        ids
    }

    fn filtered<F: Fn(BlockId) -> bool>(&self, keep: F) -> IdSet<V>
    where
        V: Clone,
    {
        let mut out = IdSet::new();
        for (id, v) in self.iter() {
            if keep(id) {
                out.add_pair(id, v.clone());
            }
        }
        out
    }
}

impl FromIterator<BlockId> for IdSet<()> {
    fn from_iter<I: IntoIterator<Item = BlockId>>(iter: I) -> Self {
        IdSet::from_ids(iter)
    }
}

/// Order-stable set of block hashes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHashSet {
    set: IndexSet<Hash>,
}

impl BlockHashSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hash: Hash) -> bool {
        self.set.insert(hash)
    }

    pub fn remove(&mut self, hash: &Hash) -> bool {
        self.set.shift_remove(hash)
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.set.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn first(&self) -> Option<&Hash> {
        self.set.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hash> + '_ {
        self.set.iter()
    }

    pub fn union(&mut self, other: &BlockHashSet) {
        for h in other.iter() {
            self.set.insert(*h);
        }
    }

    pub fn contain(&self, other: &BlockHashSet) -> bool {
        other.iter().all(|h| self.has(h))
    }

    pub fn is_equal(&self, other: &BlockHashSet) -> bool {
        self.len() == other.len() && self.contain(other)
    }

    /// Hashes sorted by their byte (hex string) order
    pub fn sort(&self) -> Vec<Hash> {
        let mut out: Vec<Hash> = self.set.iter().copied().collect();
        out.sort_unstable();
        out
    }
}

impl FromIterator<Hash> for BlockHashSet {
    fn from_iter<I: IntoIterator<Item = Hash>>(iter: I) -> Self {
        BlockHashSet { set: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_is_stable() {
        let set = IdSet::from_ids([5, 1, 3]);
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![5, 1, 3]);
        assert_eq!(set.sort_by_id(false), vec![1, 3, 5]);
        assert_eq!(set.sort_by_id(true), vec![5, 3, 1]);
    }

    #[test]
    fn test_set_algebra() {
        let mut a = IdSet::from_ids([1, 2, 3]);
        let b = IdSet::from_ids([2, 3, 4]);

        assert_eq!(a.intersection(&b).sort_by_id(false), vec![2, 3]);
        assert_eq!(a.difference(&b).sort_by_id(false), vec![1]);
        assert!(!a.contain(&b));

        a.union(&b);
        assert_eq!(a.len(), 4);
        assert!(a.contain(&b));
        assert!(a.is_equal(&IdSet::from_ids([4, 3, 2, 1])));
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut set = IdSet::from_ids([7, 8, 9]);
        set.remove(8);
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![7, 9]);
        assert_eq!(set.first(), Some(7));
    }

    #[test]
    fn test_sort_by_payload_key() {
        let mut set: IdSet<u32> = IdSet::new();
        set.add_pair(1, 30);
        set.add_pair(2, 10);
        set.add_pair(3, 20);
        assert_eq!(set.sort_by_key(|_, v| *v), vec![2, 3, 1]);
    }

    #[test]
    fn test_hash_set_equality() {
        let a: BlockHashSet = [Hash::digest(b"a"), Hash::digest(b"b")].into_iter().collect();
        let b: BlockHashSet = [Hash::digest(b"b"), Hash::digest(b"a")].into_iter().collect();
        assert!(a.is_equal(&b));
        assert_eq!(a.sort(), b.sort());
    }
}
