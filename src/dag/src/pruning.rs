//! Frontier maintenance
//!
//! Tips that trail the main chain tip by more than
//! `stale_tip_layer_gap` layers will never be merged by honest producers.
//! They are dropped from the tip frontier (their records stay in the arena)
//! and the strategy recomputes its virtual block over what is left.
//! Payloads untouched for `payload_ttl_secs` are evicted from the cache.

use crate::error::Result;
use crate::meerdag::MeerDag;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub pruned_tips: usize,
    pub evicted_payloads: usize,
}

impl MeerDag {
    /// Remove stale side tips from the frontier; returns how many.
    ///
    /// Does nothing while an uncommitted insertion can still be rolled back.
    pub fn prune_stale_tips(&self) -> Result<usize> {
        let gap = self.config().stale_tip_layer_gap;
        self.with_payloads(|inner, payloads| {
            if inner.snapshot.is_some() {
                debug!("skipping tip pruning, an insertion is pending");
                return Ok(0);
            }
            let Some(main) = inner.main_tip().map(|b| (b.id, b.layer)) else {
                return Ok(0);
            };

            let stale: Vec<_> = inner
                .graph
                .tips()
                .ids()
                .filter(|id| *id != main.0)
                .filter_map(|id| inner.graph.block(id))
                .filter(|b| b.layer.saturating_add(gap) < main.1)
                .map(|b| (b.id, b.hash, b.layer))
                .collect();
            if stale.is_empty() {
                return Ok(0);
            }

            let tips_before = inner.graph.tips().clone();
            for (id, hash, layer) in &stale {
                inner.graph.tips_mut().remove(*id);
                warn!(tip = %hash, layer, main_layer = main.1, "pruning stale tip");
            }
            match inner.instance.tips_pruned(&mut inner.graph, payloads) {
                Ok(changes) => inner.pending.record_orders(&changes),
                Err(e) => {
                    inner.graph.set_tips(tips_before);
                    return Err(e);
                }
            }

            self.metrics().pruned_tips.inc_by(stale.len() as u64);
            self.update_gauges(inner);
            Ok(stale.len())
        })
    }

    /// Evict cached payloads past their time to live
    pub fn evict_expired_payloads(&self) -> usize {
        let evicted = self.cache().evict_expired(self.config().payload_ttl());
        if evicted > 0 {
            self.metrics().evicted_payloads.inc_by(evicted as u64);
            self.metrics().cached_payloads.set(self.cache().len() as i64);
            debug!(evicted, "evicted cached payloads");
        }
        evicted
    }

    /// One maintenance pass: prune, then evict
    pub fn run_maintenance(&self) -> Result<MaintenanceStats> {
        let pruned_tips = self.prune_stale_tips()?;
        let evicted_payloads = self.evict_expired_payloads();
        Ok(MaintenanceStats { pruned_tips, evicted_payloads })
    }

    /// Run maintenance every `maintenance_interval_secs` until the task is
    /// aborted. Failures are logged and the loop keeps going.
    pub fn spawn_maintenance(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = self.config().maintenance_interval();
        tokio::spawn(async move { self.maintenance_loop(period).await })
    }

    async fn maintenance_loop(&self, period: Duration) {
        let mut ticker = interval(period);
        info!(interval_secs = period.as_secs(), "DAG maintenance started");
        loop {
            ticker.tick().await;
            match self.run_maintenance() {
                Ok(stats) if stats != MaintenanceStats::default() => {
                    info!(
                        pruned_tips = stats.pruned_tips,
                        evicted_payloads = stats.evicted_payloads,
                        "DAG maintenance completed"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("DAG maintenance failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DagConfig;
    use crate::consensus::AlgorithmKind;
    use crate::data::{CandidateBlock, MemoryProvider};
    use crate::hash::Hash;
    use crate::meerdag::MeerDag;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn dag(kind: AlgorithmKind, gap: u32) -> (MeerDag, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new());
        let config = DagConfig { k: Some(3), stale_tip_layer_gap: gap, ..DagConfig::with_algorithm(kind) };
        let dag = MeerDag::open(config, Arc::new(MemoryStore::new()), provider.clone()).unwrap();
        (dag, provider)
    }

    fn add(dag: &MeerDag, provider: &MemoryProvider, name: &str, parents: &[Hash]) -> Hash {
        let hash = Hash::digest(name.as_bytes());
        let mut block = CandidateBlock::new(hash, parents.to_vec());
        if !parents.is_empty() {
            block = block.main_parent(dag.select_main_parent(parents).unwrap());
        }
        let block = Arc::new(block);
        provider.insert(block.clone());
        dag.add_block(block).unwrap();
        hash
    }

    #[test]
    fn test_stale_side_tip_is_pruned() {
        for kind in [AlgorithmKind::Phantom, AlgorithmKind::Ghostdag] {
            let (dag, provider) = dag(kind, 2);
            let g = add(&dag, &provider, "G", &[]);
            let side = add(&dag, &provider, "S", &[g]);
            let mut tip = add(&dag, &provider, "A0", &[g]);
            for i in 1..5 {
                tip = add(&dag, &provider, &format!("A{}", i), &[tip]);
            }
            assert_eq!(dag.tips().len(), 2);

            // Pending insertion blocks pruning
            assert_eq!(dag.prune_stale_tips().unwrap(), 0);
            dag.commit().unwrap();

            assert_eq!(dag.prune_stale_tips().unwrap(), 1);
            assert_eq!(dag.tips(), vec![tip]);
            assert!(dag.has_block(&side));
            assert_eq!(dag.metrics().pruned_tips.get(), 1);
            assert!(dag.commit().unwrap());
            assert_eq!(dag.prune_stale_tips().unwrap(), 0);
        }
    }

    #[test]
    fn test_maintenance_without_stale_tips() {
        let (dag, provider) = dag(AlgorithmKind::Ghostdag, 100);
        let g = add(&dag, &provider, "G", &[]);
        add(&dag, &provider, "A", &[g]);
        dag.commit().unwrap();
        let stats = dag.run_maintenance().unwrap();
        assert_eq!(stats.pruned_tips, 0);
        assert_eq!(stats.evicted_payloads, 0);
    }
}
