//! Error types for the DAG module

use crate::hash::Hash;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DagError>;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Block already exists: {0}")]
    DuplicateBlock(Hash),

    #[error("Parent {parent} of block {block} not found")]
    MissingParent { block: Hash, parent: Hash },

    #[error("Block {0} has no parents")]
    NoParents(Hash),

    #[error("Block {block} has {count} parents (max {max})")]
    TooManyParents { block: Hash, count: usize, max: usize },

    #[error("Parents {ancestor} and {descendant} are close relatives")]
    RelativeParents { ancestor: Hash, descendant: Hash },

    #[error("Parent layer gap {gap} exceeds {max}")]
    LayerGap { gap: u32, max: u32 },

    #[error("Block priority {priority} does not cover {low} low priority parents")]
    Priority { priority: u32, low: u32 },

    #[error("Main parent mismatch: declared {declared:?}, selected {selected}")]
    MainParentMismatch { declared: Option<Hash>, selected: Hash },

    #[error("Genesis mismatch: expected {expected}, got {actual}")]
    GenesisMismatch { expected: Hash, actual: Hash },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage corruption: {0}")]
    Corruption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No insertion to roll back")]
    NoSnapshot,

    #[error("Fatal DAG error: {0}")]
    Fatal(String),
}

impl DagError {
    /// Structural rejection of a candidate block; nothing was mutated.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DagError::DuplicateBlock(_)
                | DagError::MissingParent { .. }
                | DagError::NoParents(_)
                | DagError::TooManyParents { .. }
                | DagError::RelativeParents { .. }
                | DagError::LayerGap { .. }
                | DagError::Priority { .. }
                | DagError::MainParentMismatch { .. }
                | DagError::GenesisMismatch { .. }
        )
    }

    /// Invariant violation. The derived order can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DagError::Fatal(_))
    }
}

impl From<bincode::Error> for DagError {
    fn from(e: bincode::Error) -> Self {
        DagError::Serialization(e.to_string())
    }
}
