//! # MeerDAG
//!
//! Block-DAG consensus core. Blocks reference several parents; a pluggable
//! ordering strategy (PHANTOM or GHOSTDAG) colors them blue or red, picks a
//! main chain and derives a deterministic total order.
//!
//! ## Features
//!
//! - **Block arena**: dense block ids, parent/child links, layers and heights
//! - **Consensus strategies**: PHANTOM with cached diff anticones, GHOSTDAG
//!   with k-cluster blue sets and blue work
//! - **Incremental ordering**: only the part of the order past the main
//!   chain fork is re-derived on each insertion
//! - **Atomic persistence**: buffered mutations written in one transaction,
//!   single-level rollback of the last insertion
//! - **Maturity**: parallel blue-and-deep checks for spending rules
//! - **Maintenance**: stale tip pruning and payload cache eviction
//!
//! ## Module Structure
//!
//! ```text
//! dag/
//! ├── block/        - Block record and storage layout
//! ├── graph/        - Arena, tips, order index and traversals
//! ├── consensus/    - Strategy trait, main chain, PHANTOM and GHOSTDAG
//! ├── meerdag/      - Container: validation, commit, rollback, queries
//! ├── maturity/     - Blue-and-mature checks
//! ├── pruning/      - Frontier maintenance
//! ├── difficulty/   - Windowed retarget along the main chain
//! └── storage/      - Bucketed key/value contract, memory and RocksDB stores
//! ```

pub mod block;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod data;
pub mod difficulty;
pub mod error;
pub mod graph;
pub mod graph_state;
pub mod hash;
pub mod idset;
mod maturity;
pub mod meerdag;
pub mod metrics;
pub mod pruning;
mod snapshot;
pub mod storage;

pub use block::{Block, BlockStatus};
pub use config::DagConfig;
pub use consensus::{AlgorithmKind, BlueInfo, ConsensusAlgorithm};
pub use data::{BlockData, BlockDataProvider, CandidateBlock, CompactWork, PowType, WorkCalculator};
pub use difficulty::RetargetParams;
pub use error::{DagError, Result};
pub use graph_state::GraphState;
pub use hash::{BlockId, Hash};
pub use idset::{BlockHashSet, IdSet};
pub use meerdag::{InsertOutcome, MeerDag};
pub use metrics::DagMetrics;
pub use pruning::MaintenanceStats;
pub use storage::{Bucket, Database, MemoryStore, Transaction};

#[cfg(feature = "rocksdb-backend")]
pub use storage::{RocksDbConfig, RocksDbStore};
