//! DAG configuration

use crate::consensus::AlgorithmKind;
use crate::error::{DagError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consensus and maintenance parameters of a DAG instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    /// Blue/red protocol
    pub algorithm: AlgorithmKind,

    /// Explicit k; derived from the network parameters below when unset
    pub k: Option<u16>,

    /// Expected blocks per second
    pub block_rate: f64,

    /// Upper bound on propagation delay
    pub network_delay_secs: f64,

    /// Tolerated probability that an honest block exceeds k
    pub security_level: f64,

    pub max_parents: usize,

    /// Max layer difference among the parents of one block
    pub max_parent_layer_gap: u32,

    /// Non-main tips trailing the main tip by more layers are pruned
    pub stale_tip_layer_gap: u32,

    pub payload_ttl_secs: u64,

    pub maintenance_interval_secs: u64,

    /// Default maturity threshold in layers
    pub maturity: u32,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::default(),
            k: None,
            block_rate: 1.0,
            network_delay_secs: 5.0,
            security_level: 0.01,
            max_parents: 50,
            max_parent_layer_gap: 50,
            stale_tip_layer_gap: 100,
            payload_ttl_secs: 600,
            maintenance_interval_secs: 30,
            maturity: 720,
        }
    }
}

impl DagConfig {
    pub fn with_algorithm(algorithm: AlgorithmKind) -> Self {
        Self { algorithm, ..Default::default() }
    }

    pub fn k(&self) -> u16 {
        self.k
            .unwrap_or_else(|| ghostdag_k(self.block_rate, self.network_delay_secs, self.security_level))
    }

    pub fn payload_ttl(&self) -> Duration {
        Duration::from_secs(self.payload_ttl_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k.is_none() {
            if !(self.block_rate > 0.0) || !(self.network_delay_secs > 0.0) {
                return Err(DagError::Config(
                    "block_rate and network_delay_secs must be positive".to_string(),
                ));
            }
            if !(self.security_level > 0.0 && self.security_level < 1.0) {
                return Err(DagError::Config("security_level must be in (0, 1)".to_string()));
            }
        }
        if self.max_parents == 0 {
            return Err(DagError::Config("max_parents must be at least 1".to_string()));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(DagError::Config("maintenance_interval_secs must be positive".to_string()));
        }
        Ok(())
    }
}

/// Smallest k such that the chance of more than k blocks being created
/// within one round trip (`Poisson(2 * delay * rate)`) is below `delta`.
pub fn ghostdag_k(block_rate: f64, network_delay_secs: f64, delta: f64) -> u16 {
    let x = 2.0 * network_delay_secs * block_rate;
    let mut k: u16 = 0;
    let mut term = (-x).exp();
    let mut sigma = term;
    while 1.0 - sigma >= delta {
        if k == u16::MAX {
            break;
        }
        k += 1;
        term *= x / f64::from(k);
        sigma += term;
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_k() {
        // lambda = 10, 1% tail
        assert_eq!(DagConfig::default().k(), 18);
    }

    #[test]
    fn test_k_grows_with_latency() {
        let fast = ghostdag_k(1.0, 1.0, 0.01);
        let slow = ghostdag_k(1.0, 10.0, 0.01);
        assert!(slow > fast);
        assert_eq!(ghostdag_k(0.0, 5.0, 0.01), 0);
    }

    #[test]
    fn test_explicit_k_wins() {
        let config = DagConfig { k: Some(3), ..Default::default() };
        assert_eq!(config.k(), 3);
    }

    #[test]
    fn test_validate() {
        assert!(DagConfig::default().validate().is_ok());
        let bad = DagConfig { security_level: 1.5, ..Default::default() };
        assert!(matches!(bad.validate(), Err(DagError::Config(_))));
        let bad = DagConfig { max_parents: 0, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_toml_defaults() {
        let config: DagConfig = toml::from_str("algorithm = \"ghostdag\"\nk = 4").unwrap();
        assert_eq!(config.algorithm, AlgorithmKind::Ghostdag);
        assert_eq!(config.k(), 4);
        assert_eq!(config.max_parents, 50);
    }
}
