//! PHANTOM strategy
//!
//! Each block records the blocks its merge introduces relative to its main
//! parent (the diff anticone), split into blues and reds and tagged with
//! the order in which they were discovered. Members are admitted greedily
//! in that order: one turns blue only if its anticone within the blue set
//! stays at most k and no blue already admitted is pushed past k.
//!
//! The virtual block (the view across all tips) keeps the same record. Its
//! diff anticone is the set of blocks not yet merged by any main chain
//! block and is persisted in the `DiffAnticone` bucket.

use super::chain::{linearize, ChainUndo, MainChain, OrderChanges};
use super::{AlgorithmKind, BlueInfo, Candidate, ConsensusAlgorithm, DiffAnticone, WorkSource};
use crate::block::PhantomExt;
use crate::error::{DagError, Result};
use crate::graph::DagGraph;
use crate::hash::{BlockId, Hash, MAX_ID};
use crate::idset::IdSet;
use crate::storage::codec::{decode_id_key, id_key};
use crate::storage::{Bucket, Database, Transaction};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use tracing::{debug, trace};

#[derive(Serialize, Deserialize)]
struct PhantomState {
    k: u16,
    main_tip: BlockId,
}

struct PhantomUndo {
    chain: ChainUndo,
    virtual_ext: PhantomExt,
}

pub struct Phantom {
    k: u16,
    chain: MainChain,
    virtual_ext: PhantomExt,
    /// Diff anticone of the virtual block as last written to storage
    committed_diff: IdSet<bool>,
    last: Option<PhantomUndo>,
    loaded_tip: Option<BlockId>,
}

fn saturate(work: &BigUint) -> u64 {
    work.to_u64().unwrap_or(u64::MAX)
}

impl Phantom {
    pub fn new(k: u16) -> Self {
        Phantom {
            k,
            chain: MainChain::new(),
            virtual_ext: PhantomExt::default(),
            committed_diff: IdSet::new(),
            last: None,
            loaded_tip: None,
        }
    }

    pub fn k(&self) -> u16 {
        self.k
    }

    pub fn virtual_ext(&self) -> &PhantomExt {
        &self.virtual_ext
    }

    fn ext<'a>(graph: &'a DagGraph, id: BlockId) -> Result<&'a PhantomExt> {
        graph
            .expect_block(id)?
            .phantom
            .as_ref()
            .ok_or_else(|| DagError::Fatal(format!("block id {} carries no phantom data", id)))
    }

    fn sort_key(graph: &DagGraph, id: BlockId) -> Result<(u32, u64, Reverse<Hash>)> {
        let block = graph.expect_block(id)?;
        let blue_num = Self::ext(graph, id)?.blue_num;
        Ok((blue_num, block.weight, Reverse(block.hash)))
    }

    /// Blues in the anticone of `block` within the blue set of a block that
    /// merges `admitted` onto `main_parent`. Stops once more than `limit` are found.
    fn blue_anticone(
        graph: &DagGraph,
        main_parent: BlockId,
        admitted: &[BlockId],
        block: BlockId,
        limit: u16,
    ) -> Result<Vec<BlockId>> {
        let limit = usize::from(limit);
        let unrelated = |other: BlockId| {
            other != block && !graph.is_dag_ancestor(other, block) && !graph.is_dag_ancestor(block, other)
        };

        let mut found: Vec<BlockId> = admitted.iter().copied().filter(|a| unrelated(*a)).collect();
        let mut chain_block = main_parent;
        // Everything a chain block in the past of `block` made blue is in that past too
        while found.len() <= limit && chain_block != block && !graph.is_dag_ancestor(chain_block, block) {
            if unrelated(chain_block) {
                found.push(chain_block);
            }
            for blue in Self::ext(graph, chain_block)?.blue_diff_anticone.ids() {
                if unrelated(blue) {
                    found.push(blue);
                }
            }
            match graph.expect_block(chain_block)?.main_parent() {
                Some(mp) => chain_block = mp,
                None => break,
            }
        }
        Ok(found)
    }

    /// Whether `candidate` joins the blue set without any blue's anticone exceeding k
    fn fits_blue(
        &self,
        graph: &DagGraph,
        main_parent: BlockId,
        admitted: &[BlockId],
        candidate: BlockId,
    ) -> Result<bool> {
        let k = usize::from(self.k);
        let anticone = Self::blue_anticone(graph, main_parent, admitted, candidate, self.k)?;
        if anticone.len() > k {
            return Ok(false);
        }
        for blue in anticone {
            if Self::blue_anticone(graph, main_parent, admitted, blue, self.k)?.len() >= k {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Diff anticone of a block with `parents` merged onto `main_parent`
    fn classify(&self, graph: &DagGraph, main_parent: BlockId, parents: &[BlockId]) -> Result<PhantomExt> {
        let mut keyed = Vec::new();
        for id in graph.merge_set(main_parent, parents) {
            keyed.push((Self::sort_key(graph, id)?, id));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut ext = PhantomExt::default();
        let mut admitted = Vec::new();
        for (index, (_, id)) in keyed.into_iter().enumerate() {
            if self.fits_blue(graph, main_parent, &admitted, id)? {
                admitted.push(id);
                ext.blue_diff_anticone.add_pair(id, index as u32);
            } else {
                ext.red_diff_anticone.add_pair(id, index as u32);
            }
        }
        let base = Self::ext(graph, main_parent)?.blue_num;
        ext.blue_num = base + 1 + ext.blue_diff_anticone.len() as u32;
        Ok(ext)
    }

    fn merged(graph: &DagGraph, id: BlockId) -> Result<(Vec<BlockId>, Vec<BlockId>)> {
        let ext = Self::ext(graph, id)?;
        Ok((
            ext.blue_diff_anticone.sort_by_key(|_, index| *index),
            ext.red_diff_anticone.sort_by_key(|_, index| *index),
        ))
    }

    fn current_diff(&self) -> IdSet<bool> {
        let mut diff = IdSet::with_capacity(self.virtual_ext.diff_anticone_len());
        for id in self.virtual_ext.blue_diff_anticone.ids() {
            diff.add_pair(id, true);
        }
        for id in self.virtual_ext.red_diff_anticone.ids() {
            diff.add_pair(id, false);
        }
        diff
    }

    fn refresh_virtual(&mut self, graph: &mut DagGraph) -> Result<(ChainUndo, OrderChanges)> {
        let tips = graph.tips().sort_by_id(false);
        let main = self.select_main_parent(graph, &tips)?;
        let vext = self.classify(graph, main, &tips)?;
        let chain_undo = self.chain.switch_to(graph, main)?;

        let blues = vext.blue_diff_anticone.sort_by_key(|_, index| *index);
        let reds = vext.red_diff_anticone.sort_by_key(|_, index| *index);
        let changes = match linearize(graph, &self.chain, chain_undo.fork_height, (&blues, &reds), Self::merged) {
            Ok(c) => c,
            Err(e) => {
                self.chain.undo(chain_undo);
                return Err(e);
            }
        };

        trace!(main, unresolved = vext.diff_anticone_len(), "virtual block refreshed");
        self.virtual_ext = vext;
        Ok((chain_undo, changes))
    }
}

impl ConsensusAlgorithm for Phantom {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Phantom
    }

    fn init(&mut self, graph: &DagGraph, _works: &dyn WorkSource) -> Result<()> {
        if graph.total() == 0 {
            return Ok(());
        }
        let tips = graph.tips().sort_by_id(false);
        let main = self.select_main_parent(graph, &tips)?;
        if let Some(tip) = self.loaded_tip {
            if tip != main {
                return Err(DagError::Corruption(format!(
                    "stored main tip {} differs from recomputed {}",
                    tip, main
                )));
            }
        }
        self.virtual_ext = self.classify(graph, main, &tips)?;
        self.chain = MainChain::rebuild(graph, main)?;
        if !self.current_diff().is_equal(&self.committed_diff) {
            return Err(DagError::Corruption("stored diff anticone does not match the tips".to_string()));
        }
        debug!(main_height = self.chain.len().saturating_sub(1), "phantom state rebuilt");
        Ok(())
    }

    fn check_parents(&self, _graph: &DagGraph, candidate: &Candidate) -> Result<()> {
        let low = candidate.parent_priorities.iter().filter(|p| **p <= 1).count() as u32;
        if low > 0 && candidate.priority <= low {
            return Err(DagError::Priority { priority: candidate.priority, low });
        }
        Ok(())
    }

    fn select_main_parent(&self, graph: &DagGraph, parents: &[BlockId]) -> Result<BlockId> {
        let mut best: Option<((u32, u64, Reverse<Hash>), BlockId)> = None;
        for &p in parents {
            let key = Self::sort_key(graph, p)?;
            if best.as_ref().map_or(true, |(k, _)| key > *k) {
                best = Some((key, p));
            }
        }
        best.map(|(_, id)| id)
            .ok_or_else(|| DagError::Fatal("main parent of an empty parent set".to_string()))
    }

    fn add_block(&mut self, graph: &mut DagGraph, id: BlockId, works: &dyn WorkSource) -> Result<OrderChanges> {
        let block = graph.expect_block(id)?;
        let hash = block.hash;
        let parents = block.parents.sort_by_id(false);
        let (ext, mut weight) = match block.main_parent() {
            Some(mp) => (self.classify(graph, mp, &parents)?, graph.expect_block(mp)?.weight),
            None => (PhantomExt::default(), 0),
        };

        weight = weight.saturating_add(saturate(&works.work_of(id, &hash)?));
        for blue in ext.blue_diff_anticone.ids() {
            let blue_hash = graph.expect_block(blue)?.hash;
            weight = weight.saturating_add(saturate(&works.work_of(blue, &blue_hash)?));
        }
        trace!(
            block = id,
            blue_num = ext.blue_num,
            blues = ext.blue_diff_anticone.len(),
            reds = ext.red_diff_anticone.len(),
            "block classified"
        );

        let block = graph.expect_block_mut(id)?;
        block.weight = weight;
        block.phantom = Some(ext);

        let virtual_ext = self.virtual_ext.clone();
        let (chain, changes) = self.refresh_virtual(graph)?;
        self.last = Some(PhantomUndo { chain, virtual_ext });
        Ok(changes)
    }

    fn rollback(&mut self, _graph: &mut DagGraph) -> Result<()> {
        let undo = self.last.take().ok_or(DagError::NoSnapshot)?;
        self.chain.undo(undo.chain);
        self.virtual_ext = undo.virtual_ext;
        Ok(())
    }

    fn tips_pruned(&mut self, graph: &mut DagGraph, _works: &dyn WorkSource) -> Result<OrderChanges> {
        self.last = None;
        let (_, changes) = self.refresh_virtual(graph)?;
        Ok(changes)
    }

    fn main_chain(&self) -> &MainChain {
        &self.chain
    }

    fn blue_info(&self, graph: &DagGraph, id: BlockId) -> Result<BlueInfo> {
        let block = graph.expect_block(id)?;
        let ext = Self::ext(graph, id)?;
        Ok(BlueInfo {
            blues: u64::from(ext.blue_num),
            weight: block.weight,
            work: BigUint::from(block.weight),
        })
    }

    fn diff_anticone(&self, graph: &DagGraph, id: BlockId) -> Result<DiffAnticone> {
        let ext = Self::ext(graph, id)?;
        Ok(DiffAnticone {
            blues: ext.blue_diff_anticone.ids().collect(),
            reds: ext.red_diff_anticone.ids().collect(),
        })
    }

    fn encode_state(&self) -> Result<Vec<u8>> {
        let state = PhantomState { k: self.k, main_tip: self.chain.tip().unwrap_or(MAX_ID) };
        Ok(bincode::serialize(&state)?)
    }

    fn decode_state(&mut self, bytes: &[u8]) -> Result<()> {
        let state: PhantomState = bincode::deserialize(bytes)
            .map_err(|e| DagError::Corruption(format!("phantom state: {}", e)))?;
        self.k = state.k;
        self.loaded_tip = (state.main_tip != MAX_ID).then_some(state.main_tip);
        Ok(())
    }

    fn load(&mut self, db: &dyn Database, graph: &DagGraph) -> Result<()> {
        self.committed_diff.clear();
        for (key, value) in db.scan(Bucket::DiffAnticone)? {
            let id = decode_id_key(&key)?;
            if graph.block(id).is_none() {
                return Err(DagError::Corruption(format!("diff anticone entry for unknown block id {}", id)));
            }
            let [flag] = value.as_slice() else {
                return Err(DagError::Corruption(format!(
                    "diff anticone entry of block id {} has {} bytes",
                    id,
                    value.len()
                )));
            };
            self.committed_diff.add_pair(id, *flag != 0);
        }
        Ok(())
    }

    fn stage_commit(&self, tx: &mut Transaction) -> Result<()> {
        let current = self.current_diff();
        for (id, blue) in current.iter() {
            if self.committed_diff.get(id) != Some(blue) {
                tx.put(Bucket::DiffAnticone, id_key(id).to_vec(), vec![u8::from(*blue)]);
            }
        }
        for id in self.committed_diff.ids() {
            if !current.has(id) {
                tx.delete(Bucket::DiffAnticone, id_key(id).to_vec());
            }
        }
        Ok(())
    }

    fn on_committed(&mut self) {
        self.committed_diff = self.current_diff();
        self.last = None;
    }

    fn has_pending(&self) -> bool {
        self.current_diff() != self.committed_diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::tests::insert;

    #[test]
    fn test_blue_num_along_chain() {
        let mut graph = DagGraph::new();
        let mut algo = Phantom::new(3);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[a]);

        assert_eq!(Phantom::ext(&graph, g).unwrap().blue_num, 0);
        assert_eq!(Phantom::ext(&graph, b).unwrap().blue_num, 2);
        assert_eq!(graph.block(b).unwrap().weight, 3);
        assert_eq!(algo.main_chain_tip(), Some(b));
        assert_eq!(graph.block(b).unwrap().order, 2);
    }

    #[test]
    fn test_merge_records_diff_anticone() {
        let mut graph = DagGraph::new();
        let mut algo = Phantom::new(3);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[g]);

        // Two tips: the virtual block has one unresolved block.
        assert_eq!(algo.virtual_ext().diff_anticone_len(), 1);
        assert!(algo.has_pending());

        let d = insert(&mut algo, &mut graph, "D", &[a, b]);
        let ext = Phantom::ext(&graph, d).unwrap();
        let merged = if graph.block(d).unwrap().main_parent == a { b } else { a };
        assert!(ext.blue_diff_anticone.has(merged));
        assert_eq!(ext.blue_num, 3);
        assert_eq!(algo.virtual_ext().diff_anticone_len(), 0);
        assert_eq!(graph.order_len(), 4);
        assert_eq!(graph.block(d).unwrap().order, 3);
    }

    #[test]
    fn test_k_zero_merges_red() {
        let mut graph = DagGraph::new();
        let mut algo = Phantom::new(0);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[g]);
        let d = insert(&mut algo, &mut graph, "D", &[a, b]);

        let diff = algo.diff_anticone(&graph, d).unwrap();
        assert_eq!(diff.reds.len(), 1);
        assert!(diff.blues.is_empty());
        assert_eq!(Phantom::ext(&graph, d).unwrap().blue_num, 2);
    }

    /// Blue past of `id`: its main-parent chain and every blue those blocks merged
    fn blue_set(graph: &DagGraph, id: BlockId) -> Vec<BlockId> {
        let mut blues = Vec::new();
        let mut cur = Some(id);
        while let Some(b) = cur {
            blues.extend(Phantom::ext(graph, b).unwrap().blue_diff_anticone.ids());
            cur = graph.block(b).unwrap().main_parent();
            blues.extend(cur);
        }
        blues
    }

    fn assert_k_cluster(graph: &DagGraph, k: u16) {
        for b in graph.blocks().map(|b| b.id).collect::<Vec<_>>() {
            let Some(mp) = graph.block(b).unwrap().main_parent() else { continue };
            let blues = blue_set(graph, b);
            let ext = Phantom::ext(graph, b).unwrap();
            for blue in ext.blue_diff_anticone.ids().chain([mp]) {
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
    fn test_sibling_branches_respect_k() {
        let mut graph = DagGraph::new();
        let mut algo = Phantom::new(1);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[a]);
        let x1 = insert(&mut algo, &mut graph, "X1", &[a]);
        let x2 = insert(&mut algo, &mut graph, "X2", &[a]);
        let d = insert(&mut algo, &mut graph, "D", &[b, x1, x2]);

        // Three mutually unrelated siblings: with k = 1 only one of the two
        // merged ones can join the main parent as blue.
        let diff = algo.diff_anticone(&graph, d).unwrap();
        assert_eq!(diff.blues.len(), 1);
        assert_eq!(diff.reds.len(), 1);
        assert_eq!(Phantom::ext(&graph, d).unwrap().blue_num, 4);
        assert_k_cluster(&graph, 1);
    }

    #[test]
    fn test_k_cluster_bound() {
        for k in [0u16, 1, 2] {
            let mut graph = DagGraph::new();
            let mut algo = Phantom::new(k);
            let g = insert(&mut algo, &mut graph, "G", &[]);
            let mut layer = vec![g];
            for round in 0..4 {
                let next: Vec<BlockId> = (0..3)
                    .map(|i| insert(&mut algo, &mut graph, &format!("{}-{}", round, i), &layer))
                    .collect();
                layer = next;
            }
            assert_k_cluster(&graph, k);
        }
    }

    #[test]
    fn test_priority_bound() {
        let algo = Phantom::new(3);
        let graph = DagGraph::new();
        let mut candidate = Candidate {
            hash: Hash::digest(b"c"),
            parents: vec![0, 1],
            priority: 2,
            parent_priorities: vec![1, 0],
        };
        assert!(matches!(
            algo.check_parents(&graph, &candidate),
            Err(DagError::Priority { priority: 2, low: 2 })
        ));
        candidate.priority = 3;
        assert!(algo.check_parents(&graph, &candidate).is_ok());
        candidate.parent_priorities = vec![5, 5];
        candidate.priority = 0;
        assert!(algo.check_parents(&graph, &candidate).is_ok());
    }

    #[test]
    fn test_diff_anticone_deltas() {
        let mut graph = DagGraph::new();
        let mut algo = Phantom::new(3);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        let b = insert(&mut algo, &mut graph, "B", &[g]);

        let mut tx = Transaction::new();
        algo.stage_commit(&mut tx).unwrap();
        assert_eq!(tx.len(), 1);
        algo.on_committed();
        assert!(!algo.has_pending());

        insert(&mut algo, &mut graph, "D", &[a, b]);
        let mut tx = Transaction::new();
        algo.stage_commit(&mut tx).unwrap();
        assert!(matches!(tx.ops()[0], crate::storage::WriteOp::Delete { bucket: Bucket::DiffAnticone, .. }));
    }

    #[test]
    fn test_rollback_restores_virtual() {
        let mut graph = DagGraph::new();
        let mut algo = Phantom::new(3);
        let g = insert(&mut algo, &mut graph, "G", &[]);
        let a = insert(&mut algo, &mut graph, "A", &[g]);
        algo.on_committed();
        let chain = algo.main_chain().clone();
        let virtual_ext = algo.virtual_ext().clone();

        insert(&mut algo, &mut graph, "B", &[g]);
        assert_ne!(algo.virtual_ext(), &virtual_ext);
        algo.rollback(&mut graph).unwrap();
        assert_eq!(algo.main_chain(), &chain);
        assert_eq!(algo.virtual_ext(), &virtual_ext);
        assert_eq!(algo.main_chain_tip(), Some(a));
    }
}
