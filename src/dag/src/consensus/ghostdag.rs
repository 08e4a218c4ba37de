//! GHOSTDAG blue/red classification
//!
//! Every block gets a [`GhostdagData`]: its selected parent (greatest blue
//! work, ties to the smaller hash), the blocks its merge introduces split
//! into a k-cluster of blues and the remaining reds, and the resulting blue
//! score and blue work. The virtual block is the same computation over the
//! current tip set; its selected-parent chain is the main chain.

use super::chain::{linearize, ChainUndo, MainChain, OrderChanges};
use super::{AlgorithmKind, BlueInfo, ConsensusAlgorithm, DiffAnticone, WorkSource};
use crate::error::{DagError, Result};
use crate::graph::DagGraph;
use crate::hash::{BlockId, Hash, MAX_ID};
use crate::idset::IdSet;
use crate::storage::codec::{decode_id_key, id_key};
use crate::storage::{Bucket, Database, Transaction};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

pub type KType = u16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostdagData {
    /// `MAX_ID` for genesis
    pub selected_parent: BlockId,
    pub blue_score: u64,
    pub blue_work: BigUint,
    /// Selected parent first, then the remaining blues in ascending order
    pub mergeset_blues: Vec<BlockId>,
    pub mergeset_reds: Vec<BlockId>,
    /// Anticone size of each merged blue within this block's blue set
    pub blues_anticone_sizes: BTreeMap<BlockId, KType>,
}

impl GhostdagData {
    pub fn genesis() -> Self {
        GhostdagData {
            selected_parent: MAX_ID,
            blue_score: 0,
            blue_work: BigUint::zero(),
            mergeset_blues: Vec::new(),
            mergeset_reds: Vec::new(),
            blues_anticone_sizes: BTreeMap::new(),
        }
    }

    fn new_with_selected_parent(selected_parent: BlockId) -> Self {
        let mut data = Self::genesis();
        data.selected_parent = selected_parent;
        data.mergeset_blues.push(selected_parent);
        data.blues_anticone_sizes.insert(selected_parent, 0);
        data
    }

    fn add_blue(&mut self, block: BlockId, anticone_size: KType, sizes: &HashMap<BlockId, KType>) {
        self.mergeset_blues.push(block);
        self.blues_anticone_sizes.insert(block, anticone_size);
        for (blue, size) in sizes {
            self.blues_anticone_sizes.insert(*blue, size + 1);
        }
    }

    fn add_red(&mut self, block: BlockId) {
        self.mergeset_reds.push(block);
    }

    pub fn is_genesis(&self) -> bool {
        self.selected_parent == MAX_ID
    }

    /// Merged blues other than the selected parent
    pub fn merged_blues(&self) -> &[BlockId] {
        self.mergeset_blues.get(1..).unwrap_or(&[])
    }

    pub fn mergeset_size(&self) -> usize {
        self.mergeset_blues.len() + self.mergeset_reds.len()
    }
}

enum Coloring {
    Blue { anticone_size: KType, sizes: HashMap<BlockId, KType> },
    Red,
}

#[derive(Serialize, Deserialize)]
struct GhostdagState {
    k: KType,
    main_tip: BlockId,
}

struct GhostdagUndo {
    block: BlockId,
    chain: ChainUndo,
    virtual_data: Option<GhostdagData>,
}

pub struct Ghostdag {
    k: KType,
    data: HashMap<BlockId, GhostdagData>,
    virtual_data: Option<GhostdagData>,
    chain: MainChain,
    /// Blocks whose data has not been committed yet
    staged: IdSet,
    last: Option<GhostdagUndo>,
    loaded_tip: Option<BlockId>,
}

impl Ghostdag {
    pub fn new(k: KType) -> Self {
        Ghostdag {
            k,
            data: HashMap::new(),
            virtual_data: None,
            chain: MainChain::new(),
            staged: IdSet::new(),
            last: None,
            loaded_tip: None,
        }
    }

    pub fn k(&self) -> KType {
        self.k
    }

    pub fn ghostdag_data(&self, id: BlockId) -> Option<&GhostdagData> {
        self.data.get(&id)
    }

    pub fn virtual_data(&self) -> Option<&GhostdagData> {
        self.virtual_data.as_ref()
    }

    fn get(&self, id: BlockId) -> Result<&GhostdagData> {
        self.data
            .get(&id)
            .ok_or_else(|| DagError::Fatal(format!("no ghostdag data for block id {}", id)))
    }

    fn sort_key(&self, graph: &DagGraph, id: BlockId) -> Result<(BigUint, Reverse<Hash>)> {
        let hash = graph.expect_block(id)?.hash;
        Ok((self.get(id)?.blue_work.clone(), Reverse(hash)))
    }

    fn sort_blocks(&self, graph: &DagGraph, blocks: Vec<BlockId>) -> Result<Vec<BlockId>> {
        let mut keyed = Vec::with_capacity(blocks.len());
        for id in blocks {
            keyed.push((self.sort_key(graph, id)?, id));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }

    fn find_selected_parent(&self, graph: &DagGraph, parents: &[BlockId]) -> Result<BlockId> {
        let mut best: Option<((BigUint, Reverse<Hash>), BlockId)> = None;
        for &p in parents {
            let key = self.sort_key(graph, p)?;
            if best.as_ref().map_or(true, |(k, _)| key > *k) {
                best = Some((key, p));
            }
        }
        best.map(|(_, id)| id)
            .ok_or_else(|| DagError::Fatal("selected parent of an empty parent set".to_string()))
    }

    /// Classification of a block with the given parents. Pure: reads only
    /// already classified ancestors.
    pub fn ghostdag(&self, graph: &DagGraph, parents: &[BlockId], works: &dyn WorkSource) -> Result<GhostdagData> {
        if parents.is_empty() {
            return Ok(GhostdagData::genesis());
        }
        let selected_parent = self.find_selected_parent(graph, parents)?;
        let mut new_data = GhostdagData::new_with_selected_parent(selected_parent);

        let mergeset = self.sort_blocks(graph, graph.merge_set(selected_parent, parents))?;
        for candidate in mergeset {
            match self.check_blue_candidate(graph, &new_data, candidate)? {
                Coloring::Blue { anticone_size, sizes } => new_data.add_blue(candidate, anticone_size, &sizes),
                Coloring::Red => new_data.add_red(candidate),
            }
        }

        let parent_data = self.get(selected_parent)?;
        new_data.blue_score = parent_data.blue_score + new_data.mergeset_blues.len() as u64;
        let mut blue_work = parent_data.blue_work.clone();
        for &blue in &new_data.mergeset_blues {
            let hash = graph.expect_block(blue)?.hash;
            blue_work += works.work_of(blue, &hash)?;
        }
        new_data.blue_work = blue_work;
        Ok(new_data)
    }

    fn check_blue_candidate(
        &self,
        graph: &DagGraph,
        new_data: &GhostdagData,
        candidate: BlockId,
    ) -> Result<Coloring> {
        // The selected parent is always blue, so k + 1 blues is the cap.
        if new_data.mergeset_blues.len() == usize::from(self.k) + 1 {
            return Ok(Coloring::Red);
        }

        let mut sizes: HashMap<BlockId, KType> = HashMap::new();
        let mut anticone_size: KType = 0;
        let mut chain_block: Option<BlockId> = None;
        let mut chain_data = new_data;

        loop {
            if let Some(cb) = chain_block {
                if graph.is_dag_ancestor(cb, candidate) {
                    return Ok(Coloring::Blue { anticone_size, sizes });
                }
            }

            for &blue in &chain_data.mergeset_blues {
                if graph.is_dag_ancestor(blue, candidate) {
                    continue;
                }
                let blue_size = self.blue_anticone_size(blue, new_data)?;
                sizes.insert(blue, blue_size);

                anticone_size += 1;
                if anticone_size > self.k || blue_size == self.k {
                    return Ok(Coloring::Red);
                }
            }

            if chain_data.is_genesis() {
                return Err(DagError::Fatal(format!(
                    "block id {} is not in the future of genesis",
                    candidate
                )));
            }
            chain_block = Some(chain_data.selected_parent);
            chain_data = self.get(chain_data.selected_parent)?;
        }
    }

    /// Anticone size of `block` within the blue set seen from `context`
    fn blue_anticone_size<'a>(&'a self, block: BlockId, context: &'a GhostdagData) -> Result<KType> {
        let mut current = context;
        loop {
            if let Some(size) = current.blues_anticone_sizes.get(&block) {
                return Ok(*size);
            }
            if current.is_genesis() {
                return Err(DagError::Fatal(format!(
                    "block id {} is not in the blue set of the given context",
                    block
                )));
            }
            current = self.get(current.selected_parent)?;
        }
    }

    fn merged(data: &HashMap<BlockId, GhostdagData>, id: BlockId) -> Result<(Vec<BlockId>, Vec<BlockId>)> {
        let d = data
            .get(&id)
            .ok_or_else(|| DagError::Fatal(format!("no ghostdag data for block id {}", id)))?;
        Ok((d.merged_blues().to_vec(), d.mergeset_reds.clone()))
    }

    /// Recompute the virtual block over the tips and re-derive the order
    fn refresh_virtual(&mut self, graph: &mut DagGraph, works: &dyn WorkSource) -> Result<(ChainUndo, OrderChanges)> {
        let tips = graph.tips().sort_by_id(false);
        let vdata = self.ghostdag(graph, &tips, works)?;
        let chain_undo = self.chain.switch_to(graph, vdata.selected_parent)?;

        let data = &self.data;
        let changes = linearize(
            graph,
            &self.chain,
            chain_undo.fork_height,
            (vdata.merged_blues(), &vdata.mergeset_reds),
            |_, id| Self::merged(data, id),
        );
        let changes = match changes {
            Ok(c) => c,
            Err(e) => {
                self.chain.undo(chain_undo);
                return Err(e);
            }
        };

        trace!(
            selected_parent = vdata.selected_parent,
            blue_score = vdata.blue_score,
            "virtual block refreshed"
        );
        self.virtual_data = Some(vdata);
        Ok((chain_undo, changes))
    }
}

impl ConsensusAlgorithm for Ghostdag {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Ghostdag
    }

    fn init(&mut self, graph: &DagGraph, works: &dyn WorkSource) -> Result<()> {
        if graph.total() == 0 {
            return Ok(());
        }
        if let Some(b) = graph.blocks().find(|b| !self.data.contains_key(&b.id)) {
            return Err(DagError::Corruption(format!("missing ghostdag data for block {}", b.hash)));
        }
        let tips = graph.tips().sort_by_id(false);
        let vdata = self.ghostdag(graph, &tips, works)?;
        if let Some(tip) = self.loaded_tip {
            if tip != vdata.selected_parent {
                return Err(DagError::Corruption(format!(
                    "stored main tip {} differs from recomputed {}",
                    tip, vdata.selected_parent
                )));
            }
        }
        self.chain = MainChain::rebuild(graph, vdata.selected_parent)?;
        self.virtual_data = Some(vdata);
        debug!(main_height = self.chain.len().saturating_sub(1), "ghostdag state rebuilt");
        Ok(())
    }

    fn select_main_parent(&self, graph: &DagGraph, parents: &[BlockId]) -> Result<BlockId> {
        self.find_selected_parent(graph, parents)
    }

    fn add_block(&mut self, graph: &mut DagGraph, id: BlockId, works: &dyn WorkSource) -> Result<OrderChanges> {
        let parents: Vec<BlockId> = graph.expect_block(id)?.parents.sort_by_id(false);
        let data = self.ghostdag(graph, &parents, works)?;
        graph.expect_block_mut(id)?.weight = data.blue_work.to_u64().unwrap_or(u64::MAX);
        trace!(
            block = id,
            blue_score = data.blue_score,
            blues = data.mergeset_blues.len(),
            reds = data.mergeset_reds.len(),
            "block classified"
        );
        self.data.insert(id, data);
        self.staged.add(id);

        let virtual_data = self.virtual_data.take();
        match self.refresh_virtual(graph, works) {
            Ok((chain, changes)) => {
                self.last = Some(GhostdagUndo { block: id, chain, virtual_data });
                Ok(changes)
            }
            Err(e) => {
                self.virtual_data = virtual_data;
                self.data.remove(&id);
                self.staged.remove(id);
                Err(e)
            }
        }
    }

    fn rollback(&mut self, _graph: &mut DagGraph) -> Result<()> {
        let undo = self.last.take().ok_or(DagError::NoSnapshot)?;
        self.chain.undo(undo.chain);
        self.virtual_data = undo.virtual_data;
        self.data.remove(&undo.block);
        self.staged.remove(undo.block);
        Ok(())
    }

    fn tips_pruned(&mut self, graph: &mut DagGraph, works: &dyn WorkSource) -> Result<OrderChanges> {
        self.last = None;
        let (_, changes) = self.refresh_virtual(graph, works)?;
        Ok(changes)
    }

    fn main_chain(&self) -> &MainChain {
        &self.chain
    }

    fn blue_info(&self, graph: &DagGraph, id: BlockId) -> Result<BlueInfo> {
        let data = self.get(id)?;
        Ok(BlueInfo {
            blues: data.blue_score,
            weight: graph.expect_block(id)?.weight,
            work: data.blue_work.clone(),
        })
    }

    fn diff_anticone(&self, _graph: &DagGraph, id: BlockId) -> Result<DiffAnticone> {
        let data = self.get(id)?;
        Ok(DiffAnticone {
            blues: data.merged_blues().iter().copied().collect(),
            reds: data.mergeset_reds.iter().copied().collect(),
        })
    }

    fn encode_state(&self) -> Result<Vec<u8>> {
        let state = GhostdagState { k: self.k, main_tip: self.chain.tip().unwrap_or(MAX_ID) };
        Ok(bincode::serialize(&state)?)
    }

    fn decode_state(&mut self, bytes: &[u8]) -> Result<()> {
        let state: GhostdagState = bincode::deserialize(bytes)
            .map_err(|e| DagError::Corruption(format!("ghostdag state: {}", e)))?;
        self.k = state.k;
        self.loaded_tip = (state.main_tip != MAX_ID).then_some(state.main_tip);
        Ok(())
    }

    fn load(&mut self, db: &dyn Database, graph: &DagGraph) -> Result<()> {
        for (key, value) in db.scan(Bucket::Ghostdag)? {
            let id = decode_id_key(&key)?;
            if graph.block(id).is_none() {
                return Err(DagError::Corruption(format!("ghostdag data for unknown block id {}", id)));
            }
            let data: GhostdagData = bincode::deserialize(&value)
                .map_err(|e| DagError::Corruption(format!("ghostdag data of block id {}: {}", id, e)))?;
            self.data.insert(id, data);
        }
        Ok(())
    }

    fn stage_commit(&self, tx: &mut Transaction) -> Result<()> {
        for id in self.staged.ids() {
            tx.put(Bucket::Ghostdag, id_key(id).to_vec(), bincode::serialize(self.get(id)?)?);
        }
        Ok(())
    }

    fn on_committed(&mut self) {
        self.staged.clear();
        self.last = None;
    }

    fn has_pending(&self) -> bool {
        !self.staged.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::tests::{insert, UnitWork};
    use std::collections::HashSet;

    fn blue_set(g: &Ghostdag, id: BlockId) -> HashSet<BlockId> {
        let mut blues = HashSet::new();
        let mut cur = g.ghostdag_data(id).unwrap();
        loop {
            blues.extend(cur.mergeset_blues.iter().copied());
            if cur.is_genesis() {
                break;
            }
            cur = g.ghostdag_data(cur.selected_parent).unwrap();
        }
        blues.insert(0);
        blues
    }

    #[test]
    fn test_chain_scores() {
        let mut graph = DagGraph::new();
        let mut algo = Ghostdag::new(3);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[a]);

        let data = algo.ghostdag_data(b).unwrap();
        assert_eq!(data.selected_parent, a);
        assert_eq!(data.blue_score, 2);
        assert_eq!(data.blue_work, BigUint::from(2u32));
        assert_eq!(algo.main_chain_tip(), Some(b));
        assert_eq!(graph.block(b).unwrap().height, 2);
    }

    #[test]
    fn test_merge_blue_within_k() {
        let mut graph = DagGraph::new();
        let mut algo = Ghostdag::new(3);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[g]);
        let d = insert(&mut algo, &mut graph, "D", &[a, b]);

        let data = algo.ghostdag_data(d).unwrap();
        assert_eq!(data.mergeset_blues.len(), 2);
        assert!(data.mergeset_reds.is_empty());
        assert_eq!(data.blue_score, 3);

        // Merged blocks come before their merging chain block.
        let order = |id| graph.block(id).unwrap().order;
        assert_eq!(order(g), 0);
        assert!(order(a) < order(d) && order(b) < order(d));
        assert_eq!(graph.order_len(), 4);
    }

    #[test]
    fn test_k_zero_colors_side_branch_red() {
        let mut graph = DagGraph::new();
        let mut algo = Ghostdag::new(0);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[g]);
        let d = insert(&mut algo, &mut graph, "D", &[a, b]);

        let data = algo.ghostdag_data(d).unwrap();
        assert_eq!(data.mergeset_blues.len(), 1);
        assert_eq!(data.mergeset_reds.len(), 1);
        assert_eq!(data.blue_score, 2);
    }

    #[test]
    fn test_selected_parent_tie_breaks_on_smaller_hash() {
        let mut graph = DagGraph::new();
        let mut algo = Ghostdag::new(3);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[g]);

        let smaller = if graph.hash_of(a) < graph.hash_of(b) { a } else { b };
        assert_eq!(algo.select_main_parent(&graph, &[a, b]).unwrap(), smaller);
        assert_eq!(algo.main_chain_tip(), Some(smaller));
    }

    #[test]
    fn test_classification_is_pure() {
        let mut graph = DagGraph::new();
        let mut algo = Ghostdag::new(2);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[g]);
        let c = insert(&mut algo, &mut graph, "C", &[g]);
        let d = insert(&mut algo, &mut graph, "D", &[a, b, c]);

        let again = algo.ghostdag(&graph, &[a, b, c], &UnitWork).unwrap();
        assert_eq!(&again, algo.ghostdag_data(d).unwrap());
    }

    #[test]
    fn test_k_cluster_bound() {
        let mut graph = DagGraph::new();
        let k = 1;
        let mut algo = Ghostdag::new(k);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let mut layer = vec![g];
        for round in 0..4 {
            let next: Vec<BlockId> = (0..3)
                .map(|i| insert(&mut algo, &mut graph, &format!("{}-{}", round, i), &layer))
                .collect();
            layer = next;
        }
        for b in graph.blocks().map(|b| b.id).collect::<Vec<_>>() {
            let blues = blue_set(&algo, b);
            for &blue in &algo.ghostdag_data(b).unwrap().mergeset_blues {
                let anticone = blues
                    .iter()
                    .filter(|x| **x != blue)
                    .filter(|x| !graph.is_dag_ancestor(**x, blue) && !graph.is_dag_ancestor(blue, **x))
                    .count();
                assert!(anticone <= usize::from(k), "block {} blue {} anticone {}", b, blue, anticone);
            }
        }
    }

    #[test]
    fn test_rollback_restores_chain() {
        let mut graph = DagGraph::new();
        let mut algo = Ghostdag::new(3);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        algo.on_committed();
        let before = algo.main_chain().clone();

        let b = insert(&mut algo, &mut graph, "B", &[a]);
        assert_eq!(algo.main_chain_tip(), Some(b));
        algo.rollback(&mut graph).unwrap();
        assert_eq!(algo.main_chain(), &before);
        assert!(algo.ghostdag_data(b).is_none());
        assert!(!algo.has_pending());
        assert!(matches!(algo.rollback(&mut graph), Err(DagError::NoSnapshot)));
    }

    #[test]
    fn test_state_roundtrip() {
        let mut graph = DagGraph::new();
        let mut algo = Ghostdag::new(5);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        insert(&mut algo, &mut graph, "A", &[g]);

        let mut other = Ghostdag::new(0);
        other.decode_state(&algo.encode_state().unwrap()).unwrap();
        assert_eq!(other.k(), 5);
        assert_eq!(other.loaded_tip, algo.main_chain_tip());
    }
}
