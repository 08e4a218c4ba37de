//! Graph state: how much of the DAG a node has seen
//!
//! Two nodes exchange their `GraphState` to decide who is ahead and which
//! range of blocks to sync.

use crate::error::Result;
use crate::hash::Hash;
use crate::idset::BlockHashSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphState {
    /// Tip hashes, the main chain tip first
    tips: Vec<Hash>,
    total: u32,
    layer: u32,
    main_height: u32,
    main_order: u32,
}

impl GraphState {
    pub fn new(tips: Vec<Hash>, total: u32, layer: u32, main_height: u32, main_order: u32) -> Self {
        GraphState { tips, total, layer, main_height, main_order }
    }

    pub fn tips(&self) -> &[Hash] {
        &self.tips
    }

    pub fn main_tip(&self) -> Option<&Hash> {
        self.tips.first()
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn main_height(&self) -> u32 {
        self.main_height
    }

    pub fn main_order(&self) -> u32 {
        self.main_order
    }

    pub fn tip_set(&self) -> BlockHashSet {
        self.tips.iter().copied().collect()
    }

    /// Only the genesis block has been seen
    pub fn is_genesis(&self) -> bool {
        self.total == 1 && self.tips.len() == 1 && self.main_height == 0 && self.main_order == 0
    }

    /// Same tip set and the same counters
    pub fn is_equal(&self, other: &GraphState) -> bool {
        self.tip_set().is_equal(&other.tip_set())
            && self.total == other.total
            && self.layer == other.layer
            && self.main_height == other.main_height
            && self.main_order == other.main_order
    }

    /// True if `self` is strictly more advanced than `other`
    pub fn is_excellent(&self, other: &GraphState) -> bool {
        self.compare(other) == Ordering::Greater
    }

    /// Precedence: main order, main height, layer, then the smaller main
    /// tip hash.
    pub fn compare(&self, other: &GraphState) -> Ordering {
        if self.is_equal(other) {
            return Ordering::Equal;
        }
        self.main_order
            .cmp(&other.main_order)
            .then(self.main_height.cmp(&other.main_height))
            .then(self.layer.cmp(&other.layer))
            .then_with(|| other.main_tip().cmp(&self.main_tip()))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(tips:{} total:{} layer:{} main_height:{} main_order:{})",
            self.tips.len(),
            self.total,
            self.layer,
            self.main_height,
            self.main_order
        )
    }
}
