//! Pluggable consensus strategies
//!
//! The container owns the arena; a strategy owns everything derived from it
//! by a particular blue/red protocol (selected-parent data, the virtual
//! block, the main chain). Exactly one strategy is chosen at startup from
//! the configured [`AlgorithmKind`].

pub mod chain;
pub mod ghostdag;
pub mod phantom;

use crate::config::DagConfig;
use crate::error::{DagError, Result};
use crate::graph::DagGraph;
use crate::hash::{BlockId, Hash};
use crate::idset::IdSet;
use crate::storage::{Database, Transaction};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use chain::{MainChain, OrderChanges};
pub use ghostdag::{GhostdagData, Ghostdag};
pub use phantom::Phantom;

/// Configuration tag selecting the strategy; persisted as one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    #[default]
    Phantom,
    Ghostdag,
}

impl AlgorithmKind {
    pub fn tag(&self) -> u8 {
        match self {
            AlgorithmKind::Phantom => 0,
            AlgorithmKind::Ghostdag => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(AlgorithmKind::Phantom),
            1 => Ok(AlgorithmKind::Ghostdag),
            other => Err(DagError::Corruption(format!("unknown algorithm tag {}", other))),
        }
    }

    /// Block records carry the PHANTOM extension
    pub fn phantom_records(&self) -> bool {
        matches!(self, AlgorithmKind::Phantom)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmKind::Phantom => "phantom",
            AlgorithmKind::Ghostdag => "ghostdag",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Candidate facts the container gathers before any mutation
#[derive(Debug, Clone)]
pub struct Candidate {
    pub hash: Hash,
    pub parents: Vec<BlockId>,
    pub priority: u32,
    pub parent_priorities: Vec<u32>,
}

/// Proof-of-work weight of an already known block
pub trait WorkSource {
    fn work_of(&self, id: BlockId, hash: &Hash) -> Result<BigUint>;
}

/// Blue accounting of one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueInfo {
    /// Blue blocks in the block's past (blue score / blue num)
    pub blues: u64,
    /// Accumulated tie-break weight
    pub weight: u64,
    /// Accumulated blue work
    pub work: BigUint,
}

/// Blocks merged by a block relative to its main parent
#[derive(Debug, Clone, Default)]
pub struct DiffAnticone {
    pub blues: IdSet,
    pub reds: IdSet,
}

impl DiffAnticone {
    pub fn is_blue(&self, id: BlockId) -> bool {
        self.blues.has(id)
    }

    pub fn has(&self, id: BlockId) -> bool {
        self.blues.has(id) || self.reds.has(id)
    }
}

pub trait ConsensusAlgorithm: Send + Sync {
    fn kind(&self) -> AlgorithmKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Rebuild derived state (main chain, virtual block) over a loaded arena
    fn init(&mut self, graph: &DagGraph, works: &dyn WorkSource) -> Result<()>;

    /// Strategy specific legality checks on the declared parents
    fn check_parents(&self, _graph: &DagGraph, _candidate: &Candidate) -> Result<()> {
        Ok(())
    }

    /// Main parent this strategy would pick among `parents`
    fn select_main_parent(&self, graph: &DagGraph, parents: &[BlockId]) -> Result<BlockId>;

    /// Classify the freshly linked block `id`, move the main chain and
    /// re-derive the affected part of the total order.
    fn add_block(&mut self, graph: &mut DagGraph, id: BlockId, works: &dyn WorkSource) -> Result<OrderChanges>;

    /// Undo the private effects of the last `add_block`
    fn rollback(&mut self, graph: &mut DagGraph) -> Result<()>;

    /// Recompute the virtual block after the tip set shrank
    fn tips_pruned(&mut self, graph: &mut DagGraph, works: &dyn WorkSource) -> Result<OrderChanges>;

    fn main_chain(&self) -> &MainChain;

    fn main_chain_tip(&self) -> Option<BlockId> {
        self.main_chain().tip()
    }

    fn is_on_main_chain(&self, graph: &DagGraph, id: BlockId) -> bool {
        self.main_chain().contains(graph, id)
    }

    fn main_chain_block(&self, height: u32) -> Option<BlockId> {
        self.main_chain().at(height)
    }

    fn blue_info(&self, graph: &DagGraph, id: BlockId) -> Result<BlueInfo>;

    /// Cached blue/red merge of `id` relative to its main parent
    fn diff_anticone(&self, graph: &DagGraph, id: BlockId) -> Result<DiffAnticone>;

    fn encode_state(&self) -> Result<Vec<u8>>;

    fn decode_state(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read strategy owned buckets
    fn load(&mut self, db: &dyn Database, graph: &DagGraph) -> Result<()>;

    /// Write pending private state into `tx` without clearing it
    fn stage_commit(&self, tx: &mut Transaction) -> Result<()>;

    /// The staged state reached storage
    fn on_committed(&mut self);

    fn has_pending(&self) -> bool;
}

/// Instantiate the configured strategy
pub fn create_algorithm(config: &DagConfig) -> Box<dyn ConsensusAlgorithm> {
    create_algorithm_of(config.algorithm, config.k())
}

pub fn create_algorithm_of(kind: AlgorithmKind, k: u16) -> Box<dyn ConsensusAlgorithm> {
    match kind {
        AlgorithmKind::Phantom => Box::new(Phantom::new(k)),
        AlgorithmKind::Ghostdag => Box::new(Ghostdag::new(k)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::block::Block;
    use num_traits::One;

    /// Every block weighs one unit of work
    pub(crate) struct UnitWork;

    impl WorkSource for UnitWork {
        fn work_of(&self, _id: BlockId, _hash: &Hash) -> Result<BigUint> {
            Ok(BigUint::one())
        }
    }

    /// Links a block the way the container does, minus validation
    pub(crate) fn insert(
        algo: &mut dyn ConsensusAlgorithm,
        graph: &mut DagGraph,
        name: &str,
        parents: &[BlockId],
    ) -> BlockId {
        let id = graph.next_id();
        let mut block = Block::new(id, Hash::digest(name.as_bytes()));
        block.parents = IdSet::from_ids(parents.iter().copied());
        if !parents.is_empty() {
            let mp = algo.select_main_parent(graph, parents).unwrap();
            block.main_parent = mp;
            block.height = graph.block(mp).unwrap().height + 1;
            block.layer = parents.iter().map(|p| graph.block(*p).unwrap().layer).max().unwrap() + 1;
        }
        graph.insert_block(block);
        for p in parents {
            graph.link(*p, id).unwrap();
            graph.tips_mut().remove(*p);
        }
        graph.tips_mut().add(id);
        algo.add_block(graph, id, &UnitWork).unwrap();
        id
    }

    #[test]
    fn test_tags() {
        for kind in [AlgorithmKind::Phantom, AlgorithmKind::Ghostdag] {
            assert_eq!(AlgorithmKind::from_tag(kind.tag()).unwrap(), kind);
        }
        assert!(matches!(AlgorithmKind::from_tag(9), Err(DagError::Corruption(_))));
        assert!(AlgorithmKind::Phantom.phantom_records());
        assert!(!AlgorithmKind::Ghostdag.phantom_records());
    }
}
