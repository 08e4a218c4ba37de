//! Node orchestrator: RocksDB storage, the DAG and its background tasks

use anyhow::{Context, Result};
use meerdag::{
    Bucket, BlockData, BlockDataProvider, CandidateBlock, Database, Hash, InsertOutcome, MeerDag, RocksDbStore,
    Transaction,
};
use petgraph::dot::{Config as DotConfig, Dot};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;

/// Block bodies kept in the `Payloads` bucket, bincode encoded
pub struct StoredPayloads {
    store: Arc<RocksDbStore>,
}

impl StoredPayloads {
    pub fn new(store: Arc<RocksDbStore>) -> Self {
        StoredPayloads { store }
    }

    pub fn put(&self, block: &CandidateBlock) -> Result<()> {
        let mut tx = Transaction::new();
        tx.put(Bucket::Payloads, block.hash.as_bytes().to_vec(), bincode::serialize(block)?);
        self.store.write(tx).context("Failed to store block payload")?;
        Ok(())
    }
}

impl BlockDataProvider for StoredPayloads {
    fn get_block_data(&self, hash: &Hash) -> Option<Arc<dyn BlockData>> {
        let bytes = match self.store.get(Bucket::Payloads, hash.as_bytes()) {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(block = %hash, "payload read failed: {}", e);
                return None;
            }
        };
        match bincode::deserialize::<CandidateBlock>(&bytes) {
            Ok(block) => Some(Arc::new(block)),
            Err(e) => {
                warn!(block = %hash, "payload decode failed: {}", e);
                None
            }
        }
    }
}

/// Summary printed by `meerdag-node info`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub algorithm: String,
    pub k: u16,
    pub blocks: u32,
    pub genesis: Option<String>,
    pub tips: Vec<String>,
    pub main_height: u32,
    pub main_order: u32,
    pub layer: u32,
    pub next_bits: String,
}

/// A DAG node backed by RocksDB
pub struct DagNode {
    config: NodeConfig,
    store: Arc<RocksDbStore>,
    payloads: Arc<StoredPayloads>,
    dag: Arc<MeerDag>,
}

impl DagNode {
    /// Open (or create) the node's store and load the DAG from it
    pub fn open(config: NodeConfig) -> Result<Self> {
        let storage_path = config.storage_path();
        std::fs::create_dir_all(&storage_path)
            .with_context(|| format!("Failed to create storage directory {:?}", storage_path))?;

        let store = Arc::new(
            RocksDbStore::open_with_config(config.rocksdb_config())
                .context("Failed to initialize RocksDB storage")?,
        );
        info!("RocksDB storage initialized at {:?}", storage_path);

        let payloads = Arc::new(StoredPayloads::new(Arc::clone(&store)));
        let dag = MeerDag::open(config.dag.clone(), store.clone(), payloads.clone())
            .context("Failed to load the DAG")?;

        if let Some(genesis) = &config.node.genesis {
            let expected: Hash = genesis
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid genesis hash: {}", e))?;
            dag.ensure_genesis(&expected)?;
        }

        info!(
            algorithm = %dag.algorithm(),
            blocks = dag.block_total(),
            "DAG node opened"
        );
        Ok(DagNode { config, store, payloads, dag: Arc::new(dag) })
    }

    pub fn dag(&self) -> &Arc<MeerDag> {
        &self.dag
    }

    /// Insert and commit one block. A failed commit rolls the insertion back.
    pub fn submit(&self, block: CandidateBlock) -> Result<InsertOutcome> {
        self.payloads.put(&block)?;
        let outcome = self.dag.add_block(Arc::new(block))?;
        if let Err(e) = self.dag.commit() {
            self.dag.rollback().context("Rollback after failed commit")?;
            return Err(e).context("Failed to commit block");
        }
        Ok(outcome)
    }

    /// Build the genesis block if the DAG is empty
    pub fn ensure_genesis_block(&self) -> Result<Hash> {
        if let Some(genesis) = self.dag.genesis_hash() {
            return Ok(genesis);
        }
        let hash = match &self.config.node.genesis {
            Some(hex) => hex.parse().map_err(|e| anyhow::anyhow!("Invalid genesis hash: {}", e))?,
            None => Hash::digest(b"meerdag-genesis"),
        };
        let block = CandidateBlock::genesis(hash)
            .difficulty(self.config.retarget.pow_limit_bits)
            .timestamp(unix_now());
        self.submit(block)?;
        info!(genesis = %hash, "genesis block created");
        Ok(hash)
    }

    /// Candidate on top of `parents`, with the main parent and bits the DAG
    /// would require
    pub fn template(&self, parents: Vec<Hash>, timestamp: i64, nonce: u64) -> Result<CandidateBlock> {
        let main_parent = self.dag.select_main_parent(&parents)?;
        let bits = self.dag.next_required_bits(&self.config.retarget)?;

        let mut preimage = Vec::with_capacity(parents.len() * Hash::SIZE + 16);
        for parent in &parents {
            preimage.extend_from_slice(parent.as_bytes());
        }
        preimage.extend_from_slice(&timestamp.to_be_bytes());
        preimage.extend_from_slice(&nonce.to_be_bytes());

        Ok(CandidateBlock::new(Hash::digest(&preimage), parents)
            .main_parent(main_parent)
            .timestamp(timestamp)
            .difficulty(bits))
    }

    pub fn info(&self) -> Result<NodeInfo> {
        let state = self.dag.get_graph_state();
        Ok(NodeInfo {
            algorithm: self.dag.algorithm().to_string(),
            k: self.config.dag.k(),
            blocks: state.total(),
            genesis: self.dag.genesis_hash().map(|h| h.to_string()),
            tips: state.tips().iter().map(|h| h.to_string()).collect(),
            main_height: state.main_height(),
            main_order: state.main_order(),
            layer: state.layer(),
            next_bits: format!("{:#010x}", self.dag.next_required_bits(&self.config.retarget)?),
        })
    }

    /// Graphviz rendering of the DAG, nodes labelled with short hashes
    pub fn export_dot(&self) -> String {
        let graph = self.dag.export_graph().map(|_, hash| hash.to_string()[..12].to_string(), |_, _| "");
        format!("{}", Dot::with_config(&graph, &[DotConfig::EdgeNoLabel]))
    }

    /// Run background maintenance and metrics until `shutdown` resolves
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        info!("Starting DAG node...");
        let maintenance = Arc::clone(&self.dag).spawn_maintenance();
        let metrics = self.config.metrics.enabled.then(|| self.start_metrics_task());

        shutdown.await;

        maintenance.abort();
        if let Some(task) = metrics {
            task.abort();
        }
        self.shutdown()
    }

    /// Commit whatever is buffered and flush storage
    pub fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown...");
        self.dag.commit().context("Final commit failed")?;
        self.store.flush()?;
        info!("Shutdown complete");
        Ok(())
    }

    fn start_metrics_task(&self) -> tokio::task::JoinHandle<()> {
        let dag = Arc::clone(&self.dag);
        let store = Arc::clone(&self.store);
        let period = Duration::from_secs(self.config.metrics.collection_interval_secs);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;

                let metrics = dag.metrics();
                info!(
                    blocks = dag.block_total(),
                    tips = metrics.tips.get(),
                    main_height = metrics.main_height.get(),
                    cached_payloads = metrics.cached_payloads.get(),
                    "DAG status"
                );
                if let Ok(size) = store.db_size() {
                    debug!("Database size: {} MB", size / (1024 * 1024));
                }
            }
        })
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
