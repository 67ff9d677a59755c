//! Replica configuration

use crate::{ReplicaError, ReplicaResult};
use hyperdrive_consensus::ConsensusConfig;
use hyperdrive_core::FifoPool;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Settings of one node: consensus parameters plus how it is driven
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    pub consensus: ConsensusConfig,
    /// Capacity of the inbound message channel
    pub inbox_capacity: usize,
    /// Interval between timeout checks
    pub tick_interval_ms: u64,
    /// Maximum number of queued transactions per shard
    pub pool_capacity: usize,
    /// Dispatch keys remembered per shard for deduplication
    pub max_seen_actions: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            inbox_capacity: 1_024,
            tick_interval_ms: 50,
            pool_capacity: FifoPool::DEFAULT_CAPACITY,
            max_seen_actions: 10_000,
        }
    }
}

impl ReplicaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON or TOML file (by extension)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ReplicaResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ReplicaError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ReplicaConfig = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON or TOML file (by extension)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ReplicaResult<()> {
        let path = path.as_ref();
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> ReplicaResult<()> {
        self.consensus.validate()?;

        if self.inbox_capacity == 0 {
            return Err(ReplicaError::Config(
                "Inbox capacity must be greater than 0".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ReplicaError::Config(
                "Tick interval must be greater than 0".to_string(),
            ));
        }
        if self.tick_interval_ms > self.consensus.propose_timeout_ms {
            return Err(ReplicaError::Config(format!(
                "Tick interval ({}ms) is coarser than the propose timeout ({}ms)",
                self.tick_interval_ms, self.consensus.propose_timeout_ms
            )));
        }
        if self.pool_capacity == 0 {
            return Err(ReplicaError::Config(
                "Pool capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("toml")
}
