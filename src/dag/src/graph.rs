//! DAG arena and traversals
//!
//! `DagGraph` is the sole owner of every [`Block`]. Adjacency is stored as
//! id sets, so removal (rollback) is a plain map deletion plus unlinking
//! the child id from the parents.

use crate::block::Block;
use crate::error::{DagError, Result};
use crate::hash::{BlockId, Hash, MAX_ID};
use crate::idset::IdSet;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// DAG graph structure
#[derive(Debug, Default)]
pub struct DagGraph {
    /// Block storage (id -> Block)
    blocks: HashMap<BlockId, Block>,

    /// Hash index (hash -> id)
    index: HashMap<Hash, BlockId>,

    /// Total order (order -> id)
    orders: Vec<BlockId>,

    /// Frontier of blocks without children
    tips: IdSet,

    genesis: Option<Hash>,

    next_id: BlockId,
}

impl DagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    /// Block that must exist. A miss is an invariant violation.
    pub fn expect_block(&self, id: BlockId) -> Result<&Block> {
        self.blocks
            .get(&id)
            .ok_or_else(|| DagError::Fatal(format!("block id {} is not tracked", id)))
    }

    pub(crate) fn expect_block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.blocks
            .get_mut(&id)
            .ok_or_else(|| DagError::Fatal(format!("block id {} is not tracked", id)))
    }

    pub fn get_id(&self, hash: &Hash) -> Option<BlockId> {
        self.index.get(hash).copied()
    }

    pub fn get_by_hash(&self, hash: &Hash) -> Option<&Block> {
        self.get_id(hash).and_then(|id| self.block(id))
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn hash_of(&self, id: BlockId) -> Option<Hash> {
        self.block(id).map(|b| b.hash)
    }

    /// Number of blocks ever inserted (and not rolled back)
    pub fn total(&self) -> u32 {
        self.next_id
    }

    pub fn next_id(&self) -> BlockId {
        self.next_id
    }

    pub fn genesis(&self) -> Option<Hash> {
        self.genesis
    }

    pub fn tips(&self) -> &IdSet {
        &self.tips
    }

    pub(crate) fn tips_mut(&mut self) -> &mut IdSet {
        &mut self.tips
    }

    pub(crate) fn set_tips(&mut self, tips: IdSet) {
        self.tips = tips;
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.values()
    }

    /// Add a fully built block to the arena
    pub(crate) fn insert_block(&mut self, block: Block) {
        if block.is_genesis() && self.genesis.is_none() {
            self.genesis = Some(block.hash);
        }
        self.next_id = self.next_id.max(block.id + 1);
        self.index.insert(block.hash, block.id);
        self.blocks.insert(block.id, block);
    }

    /// Remove the most recently inserted block and unlink it from its parents
    pub(crate) fn remove_block(&mut self, id: BlockId) -> Option<Block> {
        let block = self.blocks.remove(&id)?;
        self.index.remove(&block.hash);
        for parent in block.parents.ids() {
            if let Some(p) = self.blocks.get_mut(&parent) {
                p.children.remove(id);
            }
        }
        if id + 1 == self.next_id {
            self.next_id = id;
        }
        if self.blocks.is_empty() {
            self.genesis = None;
        }
        Some(block)
    }

    pub(crate) fn link(&mut self, parent: BlockId, child: BlockId) -> Result<()> {
        self.expect_block_mut(parent)?.children.add(child);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Order index
    // ------------------------------------------------------------------

    pub fn order_len(&self) -> u32 {
        self.orders.len() as u32
    }

    pub fn block_at_order(&self, order: u32) -> Option<BlockId> {
        self.orders.get(order as usize).copied()
    }

    /// Append `id` to the total order
    pub(crate) fn assign_order(&mut self, id: BlockId) -> Result<u32> {
        let order = self.orders.len() as u32;
        self.expect_block_mut(id)?.order = order;
        self.orders.push(id);
        Ok(order)
    }

    /// Drop every order at or above `len`, returning the removed tail
    pub(crate) fn truncate_orders(&mut self, len: u32) -> Vec<BlockId> {
        let len = (len as usize).min(self.orders.len());
        let tail = self.orders.split_off(len);
        for id in &tail {
            if let Some(b) = self.blocks.get_mut(id) {
                b.order = MAX_ID;
            }
        }
        tail
    }

    /// Reinstate a tail removed by [`truncate_orders`](Self::truncate_orders)
    pub(crate) fn restore_orders(&mut self, len: u32, tail: Vec<BlockId>) {
        for id in self.truncate_orders(len) {
            if let Some(b) = self.blocks.get_mut(&id) {
                b.order = MAX_ID;
            }
        }
        for id in tail {
            if let Some(b) = self.blocks.get_mut(&id) {
                b.order = self.orders.len() as u32;
                self.orders.push(id);
            }
        }
    }

    /// Rebuild the order index from the per-block `order` fields after load
    pub(crate) fn rebuild_order_index(&mut self) -> Result<()> {
        let mut ordered: Vec<(u32, BlockId)> = self
            .blocks
            .values()
            .filter(|b| b.is_ordered())
            .map(|b| (b.order, b.id))
            .collect();
        ordered.sort_unstable();
        for (expected, (order, id)) in ordered.iter().enumerate() {
            if *order as usize != expected {
                return Err(DagError::Corruption(format!(
                    "order gap: block {} has order {}, expected {}",
                    id, order, expected
                )));
            }
        }
        self.orders = ordered.into_iter().map(|(_, id)| id).collect();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Traversals
    // ------------------------------------------------------------------

    /// True if `ancestor` is in the strict past of `descendant`.
    ///
    /// Backward BFS from `descendant`, never descending to a layer at or
    /// below the ancestor's.
    pub fn is_dag_ancestor(&self, ancestor: BlockId, descendant: BlockId) -> bool {
        if ancestor == descendant {
            return false;
        }
        let (Some(a), Some(d)) = (self.block(ancestor), self.block(descendant)) else {
            return false;
        };
        if a.layer >= d.layer {
            return false;
        }
        if d.parents.has(ancestor) {
            return true;
        }

        let mut visited = HashSet::new();
        let mut queue: VecDeque<BlockId> = d.parents.ids().collect();
        while let Some(id) = queue.pop_front() {
            if id == ancestor {
                return true;
            }
            let Some(b) = self.block(id) else { continue };
            if b.layer <= a.layer {
                continue;
            }
            for p in b.parents.ids() {
                if visited.insert(p) {
                    queue.push_back(p);
                }
            }
        }
        false
    }

    /// Blocks newly introduced by merging `parents` on top of `selected`:
    /// the past of the other parents (themselves included) that is not in
    /// the past of `selected`. Unsorted.
    pub fn merge_set(&self, selected: BlockId, parents: &[BlockId]) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut visited: HashSet<BlockId> = HashSet::new();
        visited.insert(selected);

        let mut queue: VecDeque<BlockId> = VecDeque::new();
        for &p in parents {
            if p != selected && visited.insert(p) {
                queue.push_back(p);
            }
        }
        while let Some(id) = queue.pop_front() {
            if self.is_dag_ancestor(id, selected) {
                continue;
            }
            out.push(id);
            if let Some(b) = self.block(id) {
                for p in b.parents.ids() {
                    if visited.insert(p) {
                        queue.push_back(p);
                    }
                }
            }
        }
        out
    }

    /// All descendants of `id`
    pub fn future_set(&self, id: BlockId) -> IdSet {
        let mut future = IdSet::new();
        let mut queue: VecDeque<BlockId> = VecDeque::new();
        if let Some(b) = self.block(id) {
            queue.extend(b.children.ids());
        }
        while let Some(cur) = queue.pop_front() {
            if !future.add(cur) {
                continue;
            }
            if let Some(b) = self.block(cur) {
                queue.extend(b.children.ids().filter(|c| !future.has(*c)));
            }
        }
        future
    }

    /// Blocks that are neither ancestors nor descendants of `id`.
    ///
    /// Walks backward from the tips and from the parents of the future set
    /// in descending layer order. A block is in the anticone iff every
    /// child is already known to be in the future or in the anticone, so a
    /// branch stops as soon as it reaches the past of `id`. Blocks in
    /// `exclude` are never classified.
    pub fn anticone(&self, id: BlockId, exclude: Option<&IdSet>) -> IdSet {
        let future = self.future_set(id);
        let mut anticone = IdSet::new();
        let mut queued: HashSet<BlockId> = HashSet::new();
        let mut heap: BinaryHeap<(u32, BlockId)> = BinaryHeap::new();

        let mut push = |candidate: BlockId, heap: &mut BinaryHeap<(u32, BlockId)>| {
            if candidate == id || future.has(candidate) || !queued.insert(candidate) {
                return;
            }
            if let Some(b) = self.block(candidate) {
                heap.push((b.layer, candidate));
            }
        };

        for tip in self.tips.ids() {
            push(tip, &mut heap);
        }
        for f in future.ids() {
            if let Some(b) = self.block(f) {
                for p in b.parents.ids() {
                    push(p, &mut heap);
                }
            }
        }

        while let Some((_, cur)) = heap.pop() {
            if exclude.is_some_and(|ex| ex.has(cur)) {
                continue;
            }
            let Some(b) = self.block(cur) else { continue };
            if b.children.ids().all(|c| future.has(c) || anticone.has(c)) {
                anticone.add(cur);
                for p in b.parents.ids() {
                    push(p, &mut heap);
                }
            }
        }
        anticone
    }

    pub fn max_layer(&self) -> u32 {
        self.tips
            .ids()
            .filter_map(|t| self.block(t))
            .map(|b| b.layer)
            .max()
            .unwrap_or(0)
    }

    /// Export the DAG as a petgraph graph (edges parent -> child)
    pub fn export(&self) -> DiGraph<Hash, ()> {
        let mut graph = DiGraph::with_capacity(self.blocks.len(), self.blocks.len());
        let mut ids: Vec<BlockId> = self.blocks.keys().copied().collect();
        ids.sort_unstable();

        let mut nodes: HashMap<BlockId, NodeIndex> = HashMap::with_capacity(ids.len());
        for id in &ids {
            if let Some(b) = self.block(*id) {
                nodes.insert(*id, graph.add_node(b.hash));
            }
        }
        for id in &ids {
            let Some(b) = self.block(*id) else { continue };
            for p in b.parents.ids() {
                if let (Some(&from), Some(&to)) = (nodes.get(&p), nodes.get(id)) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        graph
    }
}
