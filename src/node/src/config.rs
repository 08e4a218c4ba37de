//! Node configuration loading and validation

use anyhow::{Context, Result};
use meerdag::{DagConfig, RetargetParams, RocksDbConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub dag: DagConfig,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub metrics: MetricsSection,

    #[serde(default)]
    pub retarget: RetargetParams,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Hex hash the stored DAG must be rooted at
    #[serde(default)]
    pub genesis: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default = "default_write_buffer")]
    pub write_buffer_mb: usize,
    #[serde(default = "default_max_files")]
    pub max_open_files: i32,
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        NodeSection { data_dir: default_data_dir(), log_level: default_log_level(), genesis: None }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        StorageSection {
            path: default_storage_path(),
            write_buffer_mb: default_write_buffer(),
            max_open_files: default_max_files(),
            sync_writes: true,
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        MetricsSection { enabled: true, collection_interval_secs: default_collection_interval() }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_log_level() -> String { "info".to_string() }
fn default_storage_path() -> PathBuf { PathBuf::from("dag") }
fn default_write_buffer() -> usize { 64 }
fn default_max_files() -> i32 { 1000 }
fn default_collection_interval() -> u64 { 15 }

impl NodeConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {:?}", path.as_ref()))?;

        let config: NodeConfig = toml::from_str(&contents)
            .context("Failed to parse configuration file")?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.dag.validate().context("Invalid [dag] section")?;

        if self.storage.write_buffer_mb == 0 {
            anyhow::bail!("storage.write_buffer_mb must be positive");
        }

        if self.metrics.enabled && self.metrics.collection_interval_secs == 0 {
            anyhow::bail!("metrics.collection_interval_secs must be positive");
        }

        if self.retarget.window < 2 {
            anyhow::bail!("retarget.window must be at least 2");
        }

        if let Some(genesis) = &self.node.genesis {
            genesis
                .parse::<meerdag::Hash>()
                .map_err(|e| anyhow::anyhow!("node.genesis is not a valid hash: {}", e))?;
        }

        Ok(())
    }

    /// Get absolute data directory path
    pub fn data_dir(&self) -> PathBuf {
        if self.node.data_dir.is_absolute() {
            self.node.data_dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.node.data_dir)
        }
    }

    /// Get absolute storage path
    pub fn storage_path(&self) -> PathBuf {
        if self.storage.path.is_absolute() {
            self.storage.path.clone()
        } else {
            self.data_dir().join(&self.storage.path)
        }
    }

    pub fn rocksdb_config(&self) -> RocksDbConfig {
        RocksDbConfig {
            path: self.storage_path(),
            write_buffer_size: self.storage.write_buffer_mb * 1024 * 1024,
            max_open_files: self.storage.max_open_files,
            sync_writes: self.storage.sync_writes,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meerdag::AlgorithmKind;

    #[test]
    fn test_minimal_config() {
        let config: NodeConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.dag.algorithm, AlgorithmKind::Phantom);
        assert!(config.storage_path().ends_with("data/dag"));
    }

    #[test]
    fn test_sections_override_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [node]
            data_dir = "/var/lib/meerdag"

            [dag]
            algorithm = "ghostdag"
            k = 7

            [storage]
            path = "/mnt/dag"
            sync_writes = false
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.dag.algorithm, AlgorithmKind::Ghostdag);
        assert_eq!(config.dag.k(), 7);
        assert_eq!(config.storage_path(), PathBuf::from("/mnt/dag"));
        assert!(!config.rocksdb_config().sync_writes);
    }

    #[test]
    fn test_sample_config_parses() {
        let config: NodeConfig = toml::from_str(include_str!("../../../config/node.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.dag, DagConfig::default());
        assert_eq!(config.retarget, RetargetParams::default());
    }

    #[test]
    fn test_invalid_sections_are_rejected() {
        let mut config = NodeConfig::default();
        config.dag.max_parents = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.node.genesis = Some("not-a-hash".to_string());
        assert!(config.validate().is_err());
    }
}
