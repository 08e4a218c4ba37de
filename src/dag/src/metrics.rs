//! Prometheus metrics for the DAG container

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

const NAMESPACE: &str = "meerdag";

/// DAG metrics exposed to Prometheus
#[derive(Clone)]
pub struct DagMetrics {
    /// Blocks accepted into the DAG
    pub blocks_inserted: IntCounter,

    /// Candidate blocks rejected by validation
    pub blocks_rejected: IntCounter,

    pub rollbacks: IntCounter,

    /// Successful commits that wrote something
    pub commits: IntCounter,

    pub commit_failures: IntCounter,

    /// Stale tips removed from the frontier
    pub pruned_tips: IntCounter,

    pub evicted_payloads: IntCounter,

    pub tips: IntGauge,

    pub main_height: IntGauge,

    /// Number of ordered blocks
    pub main_order: IntGauge,

    pub cached_payloads: IntGauge,

    registry: Arc<Registry>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl DagMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            blocks_inserted: counter(&registry, "dag_blocks_inserted_total", "Blocks accepted into the DAG")?,
            blocks_rejected: counter(&registry, "dag_blocks_rejected_total", "Candidate blocks rejected")?,
            rollbacks: counter(&registry, "dag_rollbacks_total", "Insertions rolled back")?,
            commits: counter(&registry, "dag_commits_total", "Commits written to storage")?,
            commit_failures: counter(&registry, "dag_commit_failures_total", "Failed commits")?,
            pruned_tips: counter(&registry, "dag_pruned_tips_total", "Stale tips removed from the frontier")?,
            evicted_payloads: counter(&registry, "dag_evicted_payloads_total", "Block payloads evicted from the cache")?,
            tips: gauge(&registry, "dag_tips", "Current number of tips")?,
            main_height: gauge(&registry, "dag_main_height", "Height of the main chain tip")?,
            main_order: gauge(&registry, "dag_main_order", "Number of ordered blocks")?,
            cached_payloads: gauge(&registry, "dag_cached_payloads", "Block payloads held in memory")?,
            registry: Arc::new(registry),
        })
    }

    /// Get Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = DagMetrics::new().unwrap();
        assert_eq!(metrics.blocks_inserted.get(), 0);
        metrics.blocks_inserted.inc();
        assert_eq!(metrics.blocks_inserted.get(), 1);
    }

    #[test]
    fn test_metrics_export() {
        let metrics = DagMetrics::new().unwrap();
        metrics.tips.set(3);
        let exported = metrics.export().unwrap();
        assert!(exported.contains("meerdag_dag_tips 3"));
        assert!(exported.contains("meerdag_dag_blocks_inserted_total"));
    }
}
