//! MeerDAG container
//!
//! `MeerDag` owns the block arena, the tip frontier, the active consensus
//! strategy and the buffers of not yet committed mutations, all behind one
//! reader/writer lock. Insertion only touches memory. [`MeerDag::commit`]
//! writes everything buffered since the previous commit in one transaction
//! and [`MeerDag::rollback`] undoes the last uncommitted insertion.

use crate::block::{Block, BlockStatus};
use crate::cache::PayloadCache;
use crate::config::DagConfig;
use crate::consensus::{
    create_algorithm_of, AlgorithmKind, BlueInfo, Candidate, ConsensusAlgorithm, WorkSource,
};
use crate::data::{BlockData, BlockDataProvider, CompactWork, WorkCalculator};
use crate::error::{DagError, Result};
use crate::graph::DagGraph;
use crate::graph_state::GraphState;
use crate::hash::{BlockId, Hash};
use crate::idset::IdSet;
use crate::maturity::Maturity;
use crate::metrics::DagMetrics;
use crate::snapshot::{DagSnapshot, PendingCommit};
use crate::storage::codec::{decode_id_key, id_key};
use crate::storage::{Bucket, Database, Transaction, INFO_KEY};
use num_bigint::BigUint;
use parking_lot::RwLock;
use petgraph::graph::DiGraph;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of a successful insertion
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub block: Block,
    /// Blocks whose order is new or changed, with the new order
    pub new_orders: Vec<(Hash, u32)>,
    /// Blocks that lost their previous order, with that order
    pub invalidated_orders: Vec<(Hash, u32)>,
    pub main_tip_changed: bool,
}

/// Payload access and work calculation for one locked operation
pub(crate) struct Payloads<'a> {
    pub cache: &'a PayloadCache,
    pub provider: &'a dyn BlockDataProvider,
    pub calc: &'a dyn WorkCalculator,
}

impl Payloads<'_> {
    pub fn payload(&self, id: BlockId, hash: &Hash) -> Result<Arc<dyn BlockData>> {
        self.cache.get_or_load(id, hash, self.provider)
    }
}

impl WorkSource for Payloads<'_> {
    fn work_of(&self, id: BlockId, hash: &Hash) -> Result<BigUint> {
        let data = self.payload(id, hash)?;
        Ok(self.calc.calc_work(data.difficulty(), data.pow_type()))
    }
}

pub(crate) struct DagInner {
    pub graph: DagGraph,
    pub instance: Box<dyn ConsensusAlgorithm>,
    pub pending: PendingCommit,
    /// Tip markers as last written: id -> is main tip
    pub committed_tips: IdSet<bool>,
    pub snapshot: Option<DagSnapshot>,
}

impl DagInner {
    fn new(instance: Box<dyn ConsensusAlgorithm>) -> Self {
        DagInner {
            graph: DagGraph::new(),
            instance,
            pending: PendingCommit::default(),
            committed_tips: IdSet::new(),
            snapshot: None,
        }
    }

    fn resolve(&self, hash: &Hash) -> Result<BlockId> {
        self.graph
            .get_id(hash)
            .ok_or_else(|| DagError::NotFound(format!("block {}", hash)))
    }

    fn hashes(&self, ids: impl IntoIterator<Item = BlockId>) -> Vec<Hash> {
        ids.into_iter().filter_map(|id| self.graph.hash_of(id)).collect()
    }

    pub fn main_tip(&self) -> Option<&Block> {
        self.instance.main_chain_tip().and_then(|id| self.graph.block(id))
    }

    /// Tip hashes, main tip first, the rest by hash
    fn tip_hashes(&self) -> Vec<Hash> {
        let main = self.instance.main_chain_tip();
        let mut others: Vec<Hash> = self
            .graph
            .tips()
            .ids()
            .filter(|id| Some(*id) != main)
            .filter_map(|id| self.graph.hash_of(id))
            .collect();
        others.sort_unstable();
        let mut tips: Vec<Hash> = main.and_then(|id| self.graph.hash_of(id)).into_iter().collect();
        tips.extend(others);
        tips
    }

    fn tip_flags(&self) -> IdSet<bool> {
        let main = self.instance.main_chain_tip();
        let mut flags = IdSet::with_capacity(self.graph.tips().len());
        for id in self.graph.tips().ids() {
            flags.add_pair(id, Some(id) == main);
        }
        flags
    }

    fn graph_state(&self) -> GraphState {
        let (main_height, main_order) = self.main_tip().map_or((0, 0), |b| (b.height, b.order));
        GraphState::new(
            self.tip_hashes(),
            self.graph.total(),
            self.graph.max_layer(),
            main_height,
            main_order,
        )
    }

    /// DAG legality of a candidate. Returns the parent ids and the main parent.
    fn validate(&self, data: &dyn BlockData, config: &DagConfig, payloads: &Payloads<'_>) -> Result<(Vec<BlockId>, Option<BlockId>)> {
        let hash = data.hash();
        if self.graph.has_block(&hash) {
            return Err(DagError::DuplicateBlock(hash));
        }
        if data.parents().is_empty() {
            if self.graph.total() > 0 {
                return Err(DagError::NoParents(hash));
            }
            return Ok((Vec::new(), None));
        }

        let mut parents = Vec::with_capacity(data.parents().len());
        let mut seen = HashSet::new();
        for parent in data.parents() {
            let id = self
                .graph
                .get_id(parent)
                .ok_or(DagError::MissingParent { block: hash, parent: *parent })?;
            if seen.insert(id) {
                parents.push(id);
            }
        }
        if parents.len() > config.max_parents {
            return Err(DagError::TooManyParents { block: hash, count: parents.len(), max: config.max_parents });
        }

        for &a in &parents {
            for &b in &parents {
                if self.graph.is_dag_ancestor(a, b) {
                    return Err(DagError::RelativeParents {
                        ancestor: self.graph.expect_block(a)?.hash,
                        descendant: self.graph.expect_block(b)?.hash,
                    });
                }
            }
        }

        let mut min_layer = u32::MAX;
        let mut max_layer = 0;
        for &p in &parents {
            let layer = self.graph.expect_block(p)?.layer;
            min_layer = min_layer.min(layer);
            max_layer = max_layer.max(layer);
        }
        if max_layer - min_layer > config.max_parent_layer_gap {
            return Err(DagError::LayerGap { gap: max_layer - min_layer, max: config.max_parent_layer_gap });
        }

        let mut parent_priorities = Vec::with_capacity(parents.len());
        for &p in &parents {
            let parent_hash = self.graph.expect_block(p)?.hash;
            parent_priorities.push(payloads.payload(p, &parent_hash)?.priority());
        }
        let candidate = Candidate { hash, parents: parents.clone(), priority: data.priority(), parent_priorities };
        self.instance.check_parents(&self.graph, &candidate)?;

        let selected = self.instance.select_main_parent(&self.graph, &parents)?;
        let selected_hash = self.graph.expect_block(selected)?.hash;
        if let Some(declared) = data.main_parent() {
            if declared != selected_hash {
                return Err(DagError::MainParentMismatch { declared: Some(declared), selected: selected_hash });
            }
        }
        Ok((parents, Some(selected)))
    }

    fn insert(&mut self, data: Arc<dyn BlockData>, config: &DagConfig, payloads: &Payloads<'_>) -> Result<InsertOutcome> {
        let (parents, main_parent) = self.validate(data.as_ref(), config, payloads)?;
        let hash = data.hash();

        let tips_before = self.graph.tips().clone();
        let main_tip_before = self.instance.main_chain_tip();
        let pending_before = self.pending.clone();

        let id = self.graph.next_id();
        let mut block = Block::new(id, hash);
        block.parents = IdSet::from_ids(parents.iter().copied());
        if let Some(mp) = main_parent {
            block.main_parent = mp;
            block.height = self.graph.expect_block(mp)?.height + 1;
            let mut layer = 0;
            for &p in &parents {
                layer = layer.max(self.graph.expect_block(p)?.layer + 1);
            }
            block.layer = layer;
        }
        self.graph.insert_block(block);
        for &p in &parents {
            self.graph.link(p, id)?;
            self.graph.tips_mut().remove(p);
        }
        self.graph.tips_mut().add(id);
        payloads.cache.insert(id, data);

        let changes = match self.instance.add_block(&mut self.graph, id, payloads) {
            Ok(changes) => changes,
            Err(e) => {
                self.graph.remove_block(id);
                self.graph.set_tips(tips_before);
                payloads.cache.remove(id);
                return Err(e);
            }
        };

        self.pending.new_blocks.add(id);
        self.pending.dirty_blocks.add(id);
        for &p in &parents {
            self.pending.dirty_blocks.add(p);
        }
        self.pending.record_orders(&changes);

        let new_orders = changes
            .assigned
            .iter()
            .filter_map(|(b, o)| self.graph.hash_of(*b).map(|h| (h, *o)))
            .collect();
        let invalidated_orders = changes
            .invalidated
            .iter()
            .filter_map(|(b, o)| self.graph.hash_of(*b).map(|h| (h, *o)))
            .collect();
        let main_tip_changed = self.instance.main_chain_tip() != main_tip_before;

        self.snapshot = Some(DagSnapshot {
            block: id,
            hash,
            tips: tips_before,
            main_tip: main_tip_before,
            order_undo: changes.undo,
            pending: pending_before,
        });

        Ok(InsertOutcome {
            block: self.graph.expect_block(id)?.clone(),
            new_orders,
            invalidated_orders,
            main_tip_changed,
        })
    }

    fn rollback(&mut self, cache: &PayloadCache) -> Result<Hash> {
        let snapshot = self.snapshot.take().ok_or(DagError::NoSnapshot)?;
        self.instance.rollback(&mut self.graph)?;
        snapshot.order_undo.apply(&mut self.graph);
        self.graph.remove_block(snapshot.block);
        self.graph.set_tips(snapshot.tips);
        self.pending = snapshot.pending;
        cache.remove(snapshot.block);

        if self.instance.main_chain_tip() != snapshot.main_tip {
            return Err(DagError::Fatal(format!(
                "main tip after rolling back {} does not match the snapshot",
                snapshot.hash
            )));
        }
        Ok(snapshot.hash)
    }

    /// Everything buffered since the last commit as one transaction
    fn stage_commit(&self) -> Result<(Transaction, IdSet<bool>)> {
        let mut tx = Transaction::new();

        for id in self.pending.new_blocks.ids() {
            let block = self.graph.expect_block(id)?;
            tx.put(Bucket::BlockIndex, block.hash.as_bytes().to_vec(), id_key(id).to_vec());
        }

        let flags = self.tip_flags();
        for (id, main) in flags.iter() {
            if self.committed_tips.get(id) != Some(main) {
                tx.put(Bucket::Tips, id_key(id).to_vec(), vec![u8::from(*main)]);
            }
        }
        for id in self.committed_tips.ids() {
            if !flags.has(id) {
                tx.delete(Bucket::Tips, id_key(id).to_vec());
            }
        }

        self.instance.stage_commit(&mut tx)?;

        for (order, id) in &self.pending.orders {
            match id {
                Some(id) => tx.put(Bucket::Orders, id_key(*order).to_vec(), id_key(*id).to_vec()),
                None => tx.delete(Bucket::Orders, id_key(*order).to_vec()),
            }
        }
        for id in self.pending.dirty_blocks.ids() {
            if let Some(block) = self.graph.block(id) {
                tx.put(Bucket::Blocks, id_key(id).to_vec(), block.encode());
            }
        }
        for (id, state) in &self.pending.states {
            tx.put(Bucket::BlockState, id_key(*id).to_vec(), state.clone());
        }

        if !tx.is_empty() {
            let mut info = vec![self.instance.kind().tag()];
            info.extend(self.instance.encode_state()?);
            tx.put(Bucket::Info, INFO_KEY.to_vec(), info);
        }
        Ok((tx, flags))
    }

    /// Rebuild the container from storage
    fn load(db: &dyn Database, config: &DagConfig, payloads: &Payloads<'_>) -> Result<Self> {
        let Some(info) = db.get(Bucket::Info, INFO_KEY)? else {
            info!(algorithm = %config.algorithm, k = config.k(), "starting an empty DAG");
            return Ok(DagInner::new(create_algorithm_of(config.algorithm, config.k())));
        };
        let (tag, state) = info
            .split_first()
            .ok_or_else(|| DagError::Corruption("empty dag info record".to_string()))?;
        let kind = AlgorithmKind::from_tag(*tag)?;
        if kind != config.algorithm {
            warn!(stored = %kind, configured = %config.algorithm, "using the stored consensus algorithm");
        }
        let mut instance = create_algorithm_of(kind, config.k());
        instance.decode_state(state)?;
        let mut inner = DagInner::new(instance);

        for (key, value) in db.scan(Bucket::Blocks)? {
            let id = decode_id_key(&key)?;
            let block = Block::decode(&value, kind.phantom_records())?;
            if block.id != id {
                return Err(DagError::Corruption(format!("block record {} stored under id {}", block.id, id)));
            }
            inner.graph.insert_block(block);
        }
        if inner.graph.blocks().count() as u32 != inner.graph.total() {
            return Err(DagError::Corruption("block ids are not dense".to_string()));
        }

        let index = db.scan(Bucket::BlockIndex)?;
        if index.len() as u32 != inner.graph.total() {
            return Err(DagError::Corruption(format!(
                "{} index entries for {} blocks",
                index.len(),
                inner.graph.total()
            )));
        }
        for (key, value) in index {
            let hash = Hash::from_slice(&key)
                .ok_or_else(|| DagError::Corruption(format!("index key of {} bytes", key.len())))?;
            if inner.graph.get_id(&hash) != Some(decode_id_key(&value)?) {
                return Err(DagError::Corruption(format!("index entry of {} is stale", hash)));
            }
        }

        let mut tips = IdSet::new();
        for (key, value) in db.scan(Bucket::Tips)? {
            let id = decode_id_key(&key)?;
            inner.graph.expect_block(id).map_err(|_| DagError::Corruption(format!("tip {} is unknown", id)))?;
            let [flag] = value.as_slice() else {
                return Err(DagError::Corruption(format!("tip marker of {} has {} bytes", id, value.len())));
            };
            tips.add(id);
            inner.committed_tips.add_pair(id, *flag != 0);
        }
        inner.graph.set_tips(tips);

        inner.graph.rebuild_order_index()?;
        let orders = db.scan(Bucket::Orders)?;
        if orders.len() as u32 != inner.graph.order_len() {
            return Err(DagError::Corruption(format!(
                "{} order entries for {} ordered blocks",
                orders.len(),
                inner.graph.order_len()
            )));
        }
        for (key, value) in orders {
            let order = decode_id_key(&key)?;
            if inner.graph.block_at_order(order) != Some(decode_id_key(&value)?) {
                return Err(DagError::Corruption(format!("order {} disagrees with its block", order)));
            }
        }

        inner.instance.load(db, &inner.graph)?;
        inner.instance.init(&inner.graph, payloads)?;

        let stored_main = inner.committed_tips.iter().find(|(_, main)| **main).map(|(id, _)| id);
        if stored_main != inner.instance.main_chain_tip() {
            return Err(DagError::Corruption("main tip marker does not match the main chain".to_string()));
        }

        info!(
            algorithm = %kind,
            blocks = inner.graph.total(),
            tips = inner.graph.tips().len(),
            ordered = inner.graph.order_len(),
            "DAG loaded"
        );
        Ok(inner)
    }

    fn confirmations(&self, id: BlockId) -> Result<u32> {
        let Some(tip) = self.main_tip() else { return Ok(0) };
        let block = self.graph.expect_block(id)?;
        if self.instance.is_on_main_chain(&self.graph, id) {
            return Ok(tip.height.saturating_sub(block.height));
        }

        // Nearest main chain block in the future of `id`
        let mut best: Option<u32> = None;
        let mut visited = HashSet::new();
        let mut queue: VecDeque<BlockId> = block.children.ids().collect();
        while let Some(cur) = queue.pop_front() {
            if !visited.insert(cur) {
                continue;
            }
            let b = self.graph.expect_block(cur)?;
            if self.instance.is_on_main_chain(&self.graph, cur) {
                best = Some(best.map_or(b.height, |h| h.min(b.height)));
                continue;
            }
            queue.extend(b.children.ids());
        }
        Ok(best.map_or(0, |h| tip.height.saturating_sub(h) + 1))
    }
}

/// The DAG consensus container
pub struct MeerDag {
    pub(crate) inner: RwLock<DagInner>,
    db: Arc<dyn Database>,
    provider: Arc<dyn BlockDataProvider>,
    work: Arc<dyn WorkCalculator>,
    cache: PayloadCache,
    metrics: DagMetrics,
    config: DagConfig,
}

impl MeerDag {
    /// Load the DAG from `db`, or start empty if nothing was committed yet
    pub fn open(config: DagConfig, db: Arc<dyn Database>, provider: Arc<dyn BlockDataProvider>) -> Result<Self> {
        Self::open_with_work(config, db, provider, Arc::new(CompactWork))
    }

    pub fn open_with_work(
        config: DagConfig,
        db: Arc<dyn Database>,
        provider: Arc<dyn BlockDataProvider>,
        work: Arc<dyn WorkCalculator>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = DagMetrics::new().map_err(|e| DagError::Fatal(format!("metrics registry: {}", e)))?;
        let cache = PayloadCache::new();
        let inner = {
            let payloads = Payloads { cache: &cache, provider: provider.as_ref(), calc: work.as_ref() };
            DagInner::load(db.as_ref(), &config, &payloads)?
        };
        let dag = MeerDag { inner: RwLock::new(inner), db, provider, work, cache, metrics, config };
        dag.update_gauges(&dag.inner.read());
        Ok(dag)
    }

    pub(crate) fn payloads(&self) -> Payloads<'_> {
        Payloads { cache: &self.cache, provider: self.provider.as_ref(), calc: self.work.as_ref() }
    }

    pub(crate) fn update_gauges(&self, inner: &DagInner) {
        self.metrics.tips.set(inner.graph.tips().len() as i64);
        self.metrics.main_height.set(inner.main_tip().map_or(0, |b| i64::from(b.height)));
        self.metrics.main_order.set(i64::from(inner.graph.order_len()));
        self.metrics.cached_payloads.set(self.cache.len() as i64);
    }

    pub fn config(&self) -> &DagConfig {
        &self.config
    }

    pub fn metrics(&self) -> &DagMetrics {
        &self.metrics
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.inner.read().instance.kind()
    }

    pub(crate) fn cache(&self) -> &PayloadCache {
        &self.cache
    }

    pub(crate) fn with_payloads<T>(&self, f: impl FnOnce(&mut DagInner, &Payloads<'_>) -> T) -> T {
        let payloads = self.payloads();
        let mut inner = self.inner.write();
        f(&mut inner, &payloads)
    }

    // ------------------------------------------------------------------
    // Insertion, commit, rollback
    // ------------------------------------------------------------------

    /// Validate and link a new block. Nothing reaches storage until
    /// [`commit`](Self::commit).
    pub fn add_block(&self, data: Arc<dyn BlockData>) -> Result<InsertOutcome> {
        let hash = data.hash();
        let payloads = self.payloads();
        let mut inner = self.inner.write();
        match inner.insert(data, &self.config, &payloads) {
            Ok(outcome) => {
                self.metrics.blocks_inserted.inc();
                self.update_gauges(&inner);
                debug!(
                    block = %hash,
                    id = outcome.block.id,
                    layer = outcome.block.layer,
                    height = outcome.block.height,
                    order = outcome.block.order,
                    main_tip_changed = outcome.main_tip_changed,
                    "block added"
                );
                Ok(outcome)
            }
            Err(e) => {
                if e.is_fatal() {
                    error!(block = %hash, "insertion failed: {}", e);
                } else {
                    self.metrics.blocks_rejected.inc();
                    warn!(block = %hash, "block rejected: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Undo the most recent uncommitted insertion
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.rollback(&self.cache) {
            Ok(hash) => {
                self.metrics.rollbacks.inc();
                self.update_gauges(&inner);
                debug!(block = %hash, "insertion rolled back");
                Ok(())
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("rollback failed: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Write everything buffered since the last commit in one transaction.
    ///
    /// Returns `false` when there was nothing to write. On failure the
    /// buffers are kept, so the call can be retried.
    pub fn commit(&self) -> Result<bool> {
        let mut inner = self.inner.write();
        let (tx, flags) = inner.stage_commit()?;
        if tx.is_empty() {
            inner.snapshot = None;
            return Ok(false);
        }
        let ops = tx.len();
        if let Err(e) = self.db.write(tx) {
            self.metrics.commit_failures.inc();
            error!(ops, "commit failed: {}", e);
            return Err(e);
        }

        let blocks = inner.pending.new_blocks.len();
        inner.pending.clear();
        inner.committed_tips = flags;
        inner.instance.on_committed();
        inner.snapshot = None;
        self.metrics.commits.inc();
        debug!(ops, blocks, "DAG state committed");
        Ok(true)
    }

    pub fn has_pending(&self) -> bool {
        let inner = self.inner.read();
        !inner.pending.is_empty() || inner.instance.has_pending() || inner.tip_flags() != inner.committed_tips
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn has_block(&self, hash: &Hash) -> bool {
        self.inner.read().graph.has_block(hash)
    }

    pub fn get_block(&self, hash: &Hash) -> Option<Block> {
        self.inner.read().graph.get_by_hash(hash).cloned()
    }

    pub fn get_block_by_id(&self, id: BlockId) -> Option<Block> {
        self.inner.read().graph.block(id).cloned()
    }

    pub fn get_block_id(&self, hash: &Hash) -> Option<BlockId> {
        self.inner.read().graph.get_id(hash)
    }

    pub fn get_block_by_order(&self, order: u32) -> Option<Block> {
        let inner = self.inner.read();
        inner.graph.block_at_order(order).and_then(|id| inner.graph.block(id)).cloned()
    }

    pub fn get_block_hash_by_order(&self, order: u32) -> Option<Hash> {
        let inner = self.inner.read();
        inner.graph.block_at_order(order).and_then(|id| inner.graph.hash_of(id))
    }

    pub fn block_total(&self) -> u32 {
        self.inner.read().graph.total()
    }

    pub fn genesis_hash(&self) -> Option<Hash> {
        self.inner.read().graph.genesis()
    }

    /// Fail unless the DAG is empty or rooted at `expected`
    pub fn ensure_genesis(&self, expected: &Hash) -> Result<()> {
        match self.genesis_hash() {
            Some(actual) if actual != *expected => Err(DagError::GenesisMismatch { expected: *expected, actual }),
            _ => Ok(()),
        }
    }

    /// Tip hashes, main tip first
    pub fn tips(&self) -> Vec<Hash> {
        self.inner.read().tip_hashes()
    }

    pub fn main_chain_tip(&self) -> Option<Block> {
        self.inner.read().main_tip().cloned()
    }

    pub fn is_on_main_chain(&self, hash: &Hash) -> bool {
        let inner = self.inner.read();
        inner
            .graph
            .get_id(hash)
            .is_some_and(|id| inner.instance.is_on_main_chain(&inner.graph, id))
    }

    pub fn main_chain_block(&self, height: u32) -> Option<Hash> {
        let inner = self.inner.read();
        inner.instance.main_chain_block(height).and_then(|id| inner.graph.hash_of(id))
    }

    /// Main parent the active strategy picks among `parents`
    pub fn select_main_parent(&self, parents: &[Hash]) -> Result<Hash> {
        let inner = self.inner.read();
        let mut ids = Vec::with_capacity(parents.len());
        for p in parents {
            ids.push(inner.resolve(p)?);
        }
        let id = inner.instance.select_main_parent(&inner.graph, &ids)?;
        Ok(inner.graph.expect_block(id)?.hash)
    }

    /// Walk main parents from `hash` until the layer is at most `layer`
    pub fn get_main_ancestor(&self, hash: &Hash, layer: u32) -> Result<Option<Hash>> {
        let inner = self.inner.read();
        let mut cur = inner.graph.expect_block(inner.resolve(hash)?)?;
        while cur.layer > layer {
            match cur.main_parent() {
                Some(mp) => cur = inner.graph.expect_block(mp)?,
                None => return Ok(None),
            }
        }
        Ok(Some(cur.hash))
    }

    /// Main-parent ancestor `distance` steps below `hash`
    pub fn relative_main_ancestor(&self, hash: &Hash, distance: u32) -> Result<Option<Hash>> {
        let inner = self.inner.read();
        let mut cur = inner.graph.expect_block(inner.resolve(hash)?)?;
        for _ in 0..distance {
            match cur.main_parent() {
                Some(mp) => cur = inner.graph.expect_block(mp)?,
                None => return Ok(None),
            }
        }
        Ok(Some(cur.hash))
    }

    /// Main chain blocks on top of `hash`, counting the merging one
    pub fn get_confirmations(&self, hash: &Hash) -> Result<u32> {
        let inner = self.inner.read();
        inner.confirmations(inner.resolve(hash)?)
    }

    pub fn get_future_set(&self, hash: &Hash) -> Result<Vec<Hash>> {
        let inner = self.inner.read();
        let future = inner.graph.future_set(inner.resolve(hash)?);
        Ok(inner.hashes(future.sort_by_id(false)))
    }

    /// Anticone of `hash` relative to the current tips, skipping `exclude`
    pub fn get_anticone(&self, hash: &Hash, exclude: &[Hash]) -> Result<Vec<Hash>> {
        let inner = self.inner.read();
        let id = inner.resolve(hash)?;
        let exclude: IdSet = exclude.iter().filter_map(|h| inner.graph.get_id(h)).collect();
        let anticone = inner.graph.anticone(id, Some(&exclude));
        Ok(inner.hashes(anticone.sort_by_id(false)))
    }

    pub fn is_dag_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> bool {
        let inner = self.inner.read();
        match (inner.graph.get_id(ancestor), inner.graph.get_id(descendant)) {
            (Some(a), Some(d)) => inner.graph.is_dag_ancestor(a, d),
            _ => false,
        }
    }

    pub fn get_graph_state(&self) -> GraphState {
        self.inner.read().graph_state()
    }

    /// Ordered blocks a peer at `gs` is missing, at most `max`. Starts after
    /// the highest ordered main chain tip the peer reported and skips the
    /// past of every tip it knows.
    pub fn locate_blocks(&self, gs: &GraphState, max: usize) -> Vec<Hash> {
        let inner = self.inner.read();
        let known: Vec<BlockId> = gs.tips().iter().filter_map(|h| inner.graph.get_id(h)).collect();
        let start = known
            .iter()
            .filter(|id| inner.instance.is_on_main_chain(&inner.graph, **id))
            .filter_map(|id| inner.graph.block(*id))
            .map(|b| b.order + 1)
            .max()
            .unwrap_or(0);

        let mut out = Vec::new();
        for order in start..inner.graph.order_len() {
            if out.len() >= max {
                break;
            }
            let Some(id) = inner.graph.block_at_order(order) else { break };
            if known.contains(&id) || known.iter().any(|k| inner.graph.is_dag_ancestor(id, *k)) {
                continue;
            }
            if let Some(h) = inner.graph.hash_of(id) {
                out.push(h);
            }
        }
        out
    }

    pub fn get_blue_info(&self, hash: &Hash) -> Result<BlueInfo> {
        let inner = self.inner.read();
        inner.instance.blue_info(&inner.graph, inner.resolve(hash)?)
    }

    /// Block body, reloaded through the provider if evicted
    pub fn get_block_data(&self, hash: &Hash) -> Result<Arc<dyn BlockData>> {
        let inner = self.inner.read();
        let id = inner.resolve(hash)?;
        self.payloads().payload(id, hash)
    }

    pub fn set_block_state(&self, hash: &Hash, state: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.write();
        let id = inner.resolve(hash)?;
        if let Some(snapshot) = inner.snapshot.as_mut() {
            if snapshot.block != id {
                snapshot.pending.states.insert(id, state.clone());
            }
        }
        inner.pending.states.insert(id, state);
        Ok(())
    }

    pub fn get_block_state(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read();
        let id = inner.resolve(hash)?;
        if let Some(state) = inner.pending.states.get(&id) {
            return Ok(Some(state.clone()));
        }
        self.db.get(Bucket::BlockState, &id_key(id))
    }

    /// Flag a block invalid after body validation failed
    pub fn invalidate_block(&self, hash: &Hash) -> Result<()> {
        let mut inner = self.inner.write();
        let id = inner.resolve(hash)?;
        inner.graph.expect_block_mut(id)?.status.set(BlockStatus::INVALID);
        if let Some(snapshot) = inner.snapshot.as_mut() {
            if snapshot.block != id {
                snapshot.pending.dirty_blocks.add(id);
            }
        }
        inner.pending.dirty_blocks.add(id);
        warn!(block = %hash, "block marked invalid");
        Ok(())
    }

    /// Is `target` blue and at least `max` layers deep from `view`
    pub fn check_mature(&self, target: &Hash, view: &Hash, max: u32) -> Result<bool> {
        let inner = self.inner.read();
        let maturity = Maturity::new(&inner.graph, inner.instance.as_ref());
        let view_fork = maturity.main_fork(inner.resolve(view)?)?;
        maturity.check_mature(inner.resolve(target)?, view_fork, max)
    }

    /// Batch maturity: every target against every view. An empty `views`
    /// means the main chain tip.
    pub fn check_blue_and_mature(&self, targets: &[Hash], views: &[Hash], max: u32, parallel: bool) -> Result<bool> {
        let inner = self.inner.read();
        let mut target_ids = Vec::with_capacity(targets.len());
        for t in targets {
            target_ids.push(inner.resolve(t)?);
        }
        let mut view_ids = Vec::with_capacity(views.len());
        for v in views {
            view_ids.push(inner.resolve(v)?);
        }
        Maturity::new(&inner.graph, inner.instance.as_ref()).check_blue_and_mature(&target_ids, &view_ids, max, parallel)
    }

    /// Snapshot of the DAG for tooling, edges parent -> child
    pub fn export_graph(&self) -> DiGraph<Hash, ()> {
        self.inner.read().graph.export()
    }

    /// Every ordered block hash from `start`, at most `max`
    pub fn ordered_hashes(&self, start: u32, max: usize) -> Vec<Hash> {
        let inner = self.inner.read();
        (start..inner.graph.order_len())
            .take(max)
            .filter_map(|o| inner.graph.block_at_order(o))
            .filter_map(|id| inner.graph.hash_of(id))
            .collect()
    }
}
