//! Maturity checks
//!
//! A target block is mature from a view when it is blue, it has been merged
//! by the main chain at or below the view's main fork, and that fork is at
//! least `max` layers above the target. Off-chain targets are resolved by
//! walking the main chain upward from the target's own fork and consulting
//! the cached diff anticones instead of computing anticones.

use crate::consensus::ConsensusAlgorithm;
use crate::error::{DagError, Result};
use crate::graph::DagGraph;
use crate::hash::BlockId;
use parking_lot::Mutex;
use rayon::prelude::*;

pub(crate) struct Maturity<'a> {
    graph: &'a DagGraph,
    algo: &'a dyn ConsensusAlgorithm,
}

impl<'a> Maturity<'a> {
    pub fn new(graph: &'a DagGraph, algo: &'a dyn ConsensusAlgorithm) -> Self {
        Maturity { graph, algo }
    }

    /// Nearest main chain block reached by following main parents
    pub fn main_fork(&self, id: BlockId) -> Result<BlockId> {
        let mut cur = id;
        loop {
            if self.algo.is_on_main_chain(self.graph, cur) {
                return Ok(cur);
            }
            cur = self.graph.expect_block(cur)?.main_parent().ok_or_else(|| {
                DagError::Fatal(format!("block id {} has no path to the main chain", id))
            })?;
        }
    }

    /// Is `target` blue and at least `max` layers below `view_fork`, a main
    /// chain block
    pub fn check_mature(&self, target: BlockId, view_fork: BlockId, max: u32) -> Result<bool> {
        let t = self.graph.expect_block(target)?;
        let vf = self.graph.expect_block(view_fork)?;
        if !t.status.is_valid() || vf.layer < t.layer || vf.layer - t.layer < max {
            return Ok(false);
        }

        if self.algo.is_on_main_chain(self.graph, target) {
            return Ok(t.height <= vf.height);
        }

        let target_fork = self.graph.expect_block(self.main_fork(target)?)?;
        for height in target_fork.height + 1..=vf.height {
            let Some(chain_block) = self.algo.main_chain_block(height) else { break };
            let diff = self.algo.diff_anticone(self.graph, chain_block)?;
            if diff.has(target) {
                return Ok(diff.is_blue(target));
            }
        }
        Ok(false)
    }

    /// Every target must be blue and mature from every view.
    ///
    /// The view side is projected onto the main chain once: the shallowest
    /// main fork among `views` is memoised in a mutex guarded slot shared by
    /// all target checks. With `parallel` the targets fan out over rayon;
    /// results are reduced in target order.
    pub fn check_blue_and_mature(&self, targets: &[BlockId], views: &[BlockId], max: u32, parallel: bool) -> Result<bool> {
        let slot: Mutex<Option<BlockId>> = Mutex::new(None);
        let view_fork = || -> Result<BlockId> {
            let mut guard = slot.lock();
            if let Some(fork) = *guard {
                return Ok(fork);
            }
            let fork = self.shallowest_fork(views)?;
            *guard = Some(fork);
            Ok(fork)
        };
        let check = |target: &BlockId| -> Result<bool> { self.check_mature(*target, view_fork()?, max) };

        let results: Vec<Result<bool>> = if parallel {
            targets.par_iter().map(check).collect()
        } else {
            targets.iter().map(check).collect()
        };
        for result in results {
            if !result? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn shallowest_fork(&self, views: &[BlockId]) -> Result<BlockId> {
        if views.is_empty() {
            return self
                .algo
                .main_chain_tip()
                .ok_or_else(|| DagError::NotFound("main chain tip".to_string()));
        }
        let mut best: Option<(u32, BlockId)> = None;
        for &view in views {
            let fork = self.main_fork(view)?;
            let height = self.graph.expect_block(fork)?.height;
            if best.map_or(true, |(h, _)| height < h) {
                best = Some((height, fork));
            }
        }
        best.map(|(_, fork)| fork)
            .ok_or_else(|| DagError::NotFound("view main fork".to_string()))
    }
}
