//! Main chain bookkeeping and order linearization shared by all strategies

use crate::error::{DagError, Result};
use crate::graph::DagGraph;
use crate::hash::BlockId;
use std::collections::HashMap;

/// Selected-parent chain from genesis to the main tip, indexed by height
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainChain {
    blocks: Vec<BlockId>,
}

/// Undo record of a [`MainChain::switch_to`]
#[derive(Debug, Clone, Default)]
pub struct ChainUndo {
    /// Height of the last block shared by the old and the new chain
    pub fork_height: Option<u32>,
    removed: Vec<BlockId>,
}

impl MainChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain ending at `tip`, following main parents back to genesis
    pub fn rebuild(graph: &DagGraph, tip: BlockId) -> Result<Self> {
        let mut blocks = Vec::new();
        let mut cur = Some(tip);
        while let Some(id) = cur {
            let b = graph.expect_block(id)?;
            blocks.push(id);
            cur = b.main_parent();
        }
        blocks.reverse();
        for (height, id) in blocks.iter().enumerate() {
            let b = graph.expect_block(*id)?;
            if b.height as usize != height {
                return Err(DagError::Corruption(format!(
                    "main chain block {} has height {}, expected {}",
                    b.hash, b.height, height
                )));
            }
        }
        Ok(MainChain { blocks })
    }

    pub fn tip(&self) -> Option<BlockId> {
        self.blocks.last().copied()
    }

    pub fn len(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn at(&self, height: u32) -> Option<BlockId> {
        self.blocks.get(height as usize).copied()
    }

    pub fn contains(&self, graph: &DagGraph, id: BlockId) -> bool {
        graph
            .block(id)
            .is_some_and(|b| self.at(b.height) == Some(id))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = BlockId> + '_ {
        self.blocks.iter().copied()
    }

    /// Make `new_tip` the chain tip
    pub fn switch_to(&mut self, graph: &DagGraph, new_tip: BlockId) -> Result<ChainUndo> {
        let mut path = Vec::new();
        let mut cur = Some(new_tip);
        let mut fork_height = None;
        while let Some(id) = cur {
            if self.contains(graph, id) {
                fork_height = Some(graph.expect_block(id)?.height);
                break;
            }
            path.push(id);
            cur = graph.expect_block(id)?.main_parent();
        }

        let keep = fork_height.map_or(0, |h| h as usize + 1);
        let removed = self.blocks.split_off(keep);
        self.blocks.extend(path.into_iter().rev());
        Ok(ChainUndo { fork_height, removed })
    }

    pub fn undo(&mut self, undo: ChainUndo) {
        let keep = undo.fork_height.map_or(0, |h| h as usize + 1);
        self.blocks.truncate(keep);
        self.blocks.extend(undo.removed);
    }
}

/// Order assignments made by one linearization
#[derive(Debug, Clone, Default)]
pub struct OrderChanges {
    /// Blocks whose order is new or changed, with the new order
    pub assigned: Vec<(BlockId, u32)>,
    /// Blocks that lost or changed their order, with the previous order
    pub invalidated: Vec<(BlockId, u32)>,
    pub(crate) undo: OrderUndo,
}

impl OrderChanges {
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty() && self.invalidated.is_empty()
    }
}

/// Truncation point and tail needed to put the order index back
#[derive(Debug, Clone, Default)]
pub(crate) struct OrderUndo {
    pub keep: u32,
    pub tail: Vec<BlockId>,
}

impl OrderUndo {
    pub fn apply(self, graph: &mut DagGraph) {
        graph.restore_orders(self.keep, self.tail);
    }
}

/// Re-derive the total order after the chain moved.
///
/// Orders up to and including the fork block are kept. Every chain block
/// above the fork is emitted after its merged blues and reds, then the
/// merge set of the virtual block closes the order. `merged` yields a
/// chain block's merged blues and reds, each already sorted.
pub(crate) fn linearize<F>(
    graph: &mut DagGraph,
    chain: &MainChain,
    fork_height: Option<u32>,
    virtual_merge: (&[BlockId], &[BlockId]),
    mut merged: F,
) -> Result<OrderChanges>
where
    F: FnMut(&DagGraph, BlockId) -> Result<(Vec<BlockId>, Vec<BlockId>)>,
{
    let (keep, start) = match fork_height {
        Some(h) => {
            let fork = chain
                .at(h)
                .ok_or_else(|| DagError::Fatal(format!("no main chain block at height {}", h)))?;
            let b = graph.expect_block(fork)?;
            if b.is_ordered() {
                (b.order + 1, h + 1)
            } else {
                (0, 0)
            }
        }
        None => (0, 0),
    };

    let tail = graph.truncate_orders(keep);
    let mut assigned = Vec::new();
    if let Err(e) = emit_orders(graph, chain, start, virtual_merge, &mut merged, &mut assigned) {
        graph.restore_orders(keep, tail);
        return Err(e);
    }

    let previous: HashMap<BlockId, u32> = tail
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, keep + i as u32))
        .collect();
    assigned.retain(|(id, order)| previous.get(id) != Some(order));

    let mut invalidated = Vec::new();
    for (id, old) in &previous {
        let now = graph.block(*id).map(|b| b.order);
        if now != Some(*old) {
            invalidated.push((*id, *old));
        }
    }
    invalidated.sort_unstable_by_key(|(_, order)| *order);

    Ok(OrderChanges { assigned, invalidated, undo: OrderUndo { keep, tail } })
}

/// Orders every unordered block from chain height `start` upwards, then the
/// virtual block's merge set
fn emit_orders<F>(
    graph: &mut DagGraph,
    chain: &MainChain,
    start: u32,
    virtual_merge: (&[BlockId], &[BlockId]),
    merged: &mut F,
    assigned: &mut Vec<(BlockId, u32)>,
) -> Result<()>
where
    F: FnMut(&DagGraph, BlockId) -> Result<(Vec<BlockId>, Vec<BlockId>)>,
{
    let mut emit = |graph: &mut DagGraph, id: BlockId| -> Result<()> {
        if !graph.expect_block(id)?.is_ordered() {
            let order = graph.assign_order(id)?;
            assigned.push((id, order));
        }
        Ok(())
    };

    for height in start..chain.len() {
        let Some(id) = chain.at(height) else { break };
        let (blues, reds) = merged(graph, id)?;
        for m in blues.into_iter().chain(reds) {
            emit(graph, m)?;
        }
        emit(graph, id)?;
    }
    let (vblues, vreds) = virtual_merge;
    for &m in vblues.iter().chain(vreds) {
        emit(graph, m)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::build;

    fn set_heights(graph: &mut DagGraph, chain: &[(BlockId, Option<BlockId>)]) {
        for (id, mp) in chain {
            let height = mp.map_or(0, |p| graph.block(p).unwrap().height + 1);
            let b = graph.block_mut(*id).unwrap();
            b.main_parent = mp.unwrap_or(crate::hash::MAX_ID);
            b.height = height;
        }
    }

    #[test]
    fn test_switch_and_undo() {
        let (mut g, n) = build(&[("G", &[]), ("A", &["G"]), ("B", &["G"]), ("C", &["B"])]);
        set_heights(
            &mut g,
            &[(n["G"], None), (n["A"], Some(n["G"])), (n["B"], Some(n["G"])), (n["C"], Some(n["B"]))],
        );

        let mut chain = MainChain::new();
        let first = chain.switch_to(&g, n["A"]).unwrap();
        assert_eq!(first.fork_height, None);
        assert_eq!(chain.iter().collect::<Vec<_>>(), vec![n["G"], n["A"]]);

        let before = chain.clone();
        let undo = chain.switch_to(&g, n["C"]).unwrap();
        assert_eq!(undo.fork_height, Some(0));
        assert_eq!(chain.iter().collect::<Vec<_>>(), vec![n["G"], n["B"], n["C"]]);
        assert!(chain.contains(&g, n["B"]));
        assert!(!chain.contains(&g, n["A"]));

        chain.undo(undo);
        assert_eq!(chain, before);
    }

    #[test]
    fn test_linearize_emits_merged_blocks_first() {
        let (mut g, n) = build(&[("G", &[]), ("A", &["G"]), ("B", &["G"]), ("D", &["A", "B"])]);
        set_heights(
            &mut g,
            &[(n["G"], None), (n["A"], Some(n["G"])), (n["B"], Some(n["G"])), (n["D"], Some(n["A"]))],
        );
        let mut chain = MainChain::new();
        chain.switch_to(&g, n["D"]).unwrap();

        let d = n["D"];
        let b = n["B"];
        let changes = linearize(&mut g, &chain, None, (&[], &[]), |_, id| {
            Ok(if id == d { (vec![b], vec![]) } else { (vec![], vec![]) })
        })
        .unwrap();

        let order: Vec<BlockId> = (0..g.order_len()).filter_map(|o| g.block_at_order(o)).collect();
        assert_eq!(order, vec![n["G"], n["A"], n["B"], n["D"]]);
        assert_eq!(changes.assigned.len(), 4);
        assert!(changes.invalidated.is_empty());

        // Re-linearizing from the fork at A only touches what follows A.
        let again = linearize(&mut g, &chain, Some(1), (&[], &[]), |_, id| {
            Ok(if id == d { (vec![b], vec![]) } else { (vec![], vec![]) })
        })
        .unwrap();
        assert!(again.is_empty());
        assert_eq!(again.undo.keep, 2);
    }

    #[test]
    fn test_failed_linearize_keeps_previous_orders() {
        let (mut g, n) = build(&[("G", &[]), ("A", &["G"]), ("B", &["G"]), ("D", &["A", "B"])]);
        set_heights(
            &mut g,
            &[(n["G"], None), (n["A"], Some(n["G"])), (n["B"], Some(n["G"])), (n["D"], Some(n["A"]))],
        );
        let mut chain = MainChain::new();
        chain.switch_to(&g, n["D"]).unwrap();
        let (d, b) = (n["D"], n["B"]);
        linearize(&mut g, &chain, None, (&[], &[]), |_, id| {
            Ok(if id == d { (vec![b], vec![]) } else { (vec![], vec![]) })
        })
        .unwrap();
        let before: Vec<BlockId> = (0..g.order_len()).filter_map(|o| g.block_at_order(o)).collect();

        let result = linearize(&mut g, &chain, Some(0), (&[], &[]), |_, id| {
            if id == d {
                Err(DagError::Fatal("merge set unavailable".to_string()))
            } else {
                Ok((vec![], vec![]))
            }
        });
        assert!(matches!(result, Err(DagError::Fatal(_))));

        let after: Vec<BlockId> = (0..g.order_len()).filter_map(|o| g.block_at_order(o)).collect();
        assert_eq!(after, before);
        for (order, id) in before.iter().enumerate() {
            assert_eq!(g.block(*id).unwrap().order, order as u32);
        }
    }

    #[test]
    fn test_rebuild_checks_heights() {
        let (mut g, n) = build(&[("G", &[]), ("A", &["G"])]);
        set_heights(&mut g, &[(n["G"], None), (n["A"], Some(n["G"]))]);
        assert_eq!(MainChain::rebuild(&g, n["A"]).unwrap().len(), 2);

        g.block_mut(n["A"]).unwrap().height = 5;
        assert!(matches!(MainChain::rebuild(&g, n["A"]), Err(DagError::Corruption(_))));
    }
}
