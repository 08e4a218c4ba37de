//! MeerDAG Node Library
//!
//! Wires the DAG core to RocksDB storage, persists block payloads next to
//! the DAG records and runs the background maintenance tasks.

pub mod config;
pub mod node;

pub use config::NodeConfig;
pub use node::{unix_now, DagNode, NodeInfo, StoredPayloads};
