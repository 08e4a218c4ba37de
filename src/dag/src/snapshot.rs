//! Pending commit buffers and the single-level insertion snapshot

use crate::consensus::chain::OrderUndo;
use crate::consensus::OrderChanges;
use crate::hash::{BlockId, Hash};
use crate::idset::IdSet;
use std::collections::BTreeMap;

/// Mutations buffered since the last commit
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingCommit {
    /// Blocks created since the last commit
    pub new_blocks: IdSet,

    /// Blocks whose record must be rewritten
    pub dirty_blocks: IdSet,

    /// order -> id; `None` deletes the order key
    pub orders: BTreeMap<u32, Option<BlockId>>,

    /// Opaque block states awaiting the write
    pub states: BTreeMap<BlockId, Vec<u8>>,
}

impl PendingCommit {
    pub fn is_empty(&self) -> bool {
        self.new_blocks.is_empty()
            && self.dirty_blocks.is_empty()
            && self.orders.is_empty()
            && self.states.is_empty()
    }

    pub fn clear(&mut self) {
        *self = PendingCommit::default();
    }

    /// Buffer the order keys touched by one linearization
    pub fn record_orders(&mut self, changes: &OrderChanges) {
        for (id, old) in &changes.invalidated {
            self.orders.insert(*old, None);
            self.dirty_blocks.add(*id);
        }
        for (id, order) in &changes.assigned {
            self.orders.insert(*order, Some(*id));
            self.dirty_blocks.add(*id);
        }
    }
}

/// Everything needed to undo the most recent, uncommitted insertion
#[derive(Debug)]
pub(crate) struct DagSnapshot {
    pub block: BlockId,
    pub hash: Hash,
    /// Tip frontier before the insertion
    pub tips: IdSet,
    pub main_tip: Option<BlockId>,
    pub order_undo: OrderUndo,
    /// Buffers as they were before the insertion
    pub pending: PendingCommit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assigned_orders_override_invalidated() {
        let changes = OrderChanges {
            assigned: vec![(7, 3), (5, 4)],
            invalidated: vec![(5, 3)],
            ..Default::default()
        };
        let mut pending = PendingCommit::default();
        pending.record_orders(&changes);

        assert_eq!(pending.orders.get(&3), Some(&Some(7)));
        assert_eq!(pending.orders.get(&4), Some(&Some(5)));
        assert!(pending.dirty_blocks.is_equal(&IdSet::from_ids([5, 7])));
        assert!(!pending.is_empty());

        pending.clear();
        assert!(pending.is_empty());
    }
}
