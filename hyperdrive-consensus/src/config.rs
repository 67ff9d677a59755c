//! Consensus configuration

use crate::{ConsensusError, ConsensusResult};
use hyperdrive_core::Round;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Consensus timing and buffering parameters
///
/// Timeouts grow linearly with the round number and are capped by
/// `max_timeout_ms`, so every round has a bounded, non-decreasing budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Time to wait for a proposal in round 0 before pre-voting nil
    pub propose_timeout_ms: u64,
    /// Extra propose time added per round
    pub propose_timeout_delta_ms: u64,
    /// Total time budget of round 0 before it expires
    pub round_timeout_ms: u64,
    /// Extra round time added per round
    pub round_timeout_delta_ms: u64,
    /// Upper bound for any timeout
    pub max_timeout_ms: u64,
    /// Maximum number of transactions drained into one block
    pub max_block_transactions: usize,
    /// How many heights ahead of the current one inputs are buffered
    pub future_height_window: u64,
    /// Maximum number of buffered future inputs
    pub max_buffered_inputs: usize,
    /// How many rounds ahead of the current one proposals and votes are kept
    pub future_round_window: u64,
    /// Round at which consensus resumes when a shard is accepted
    pub resume_round: Round,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            propose_timeout_ms: 1_000,
            propose_timeout_delta_ms: 500,
            round_timeout_ms: 3_000,
            round_timeout_delta_ms: 1_000,
            max_timeout_ms: 60_000,
            max_block_transactions: 1_000,
            future_height_window: 16,
            max_buffered_inputs: 10_000,
            future_round_window: 64,
            resume_round: 0,
        }
    }
}

impl ConsensusConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON or TOML file (by extension)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConsensusResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConsensusError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConsensusConfig = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON or TOML file (by extension)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConsensusResult<()> {
        let path = path.as_ref();
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        fs::write(path, content)
            .map_err(|e| ConsensusError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.propose_timeout_ms == 0 || self.round_timeout_ms == 0 {
            return Err(ConsensusError::Config(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.propose_timeout_ms >= self.round_timeout_ms {
            return Err(ConsensusError::Config(format!(
                "Propose timeout ({}ms) must be shorter than the round timeout ({}ms)",
                self.propose_timeout_ms, self.round_timeout_ms
            )));
        }

        if self.max_timeout_ms < self.round_timeout_ms {
            return Err(ConsensusError::Config(format!(
                "Max timeout ({}ms) must be at least the round timeout ({}ms)",
                self.max_timeout_ms, self.round_timeout_ms
            )));
        }

        if self.max_block_transactions == 0 {
            return Err(ConsensusError::Config(
                "Blocks must be allowed at least one transaction".to_string(),
            ));
        }

        Ok(())
    }

    /// Time to wait for a proposal at `round`
    pub fn propose_timeout(&self, round: Round) -> Duration {
        self.linear_timeout(self.propose_timeout_ms, self.propose_timeout_delta_ms, round)
    }

    /// Total time budget of `round`
    pub fn round_timeout(&self, round: Round) -> Duration {
        self.linear_timeout(self.round_timeout_ms, self.round_timeout_delta_ms, round)
    }

    fn linear_timeout(&self, base: u64, delta: u64, round: Round) -> Duration {
        let ms = base.saturating_add(delta.saturating_mul(round));
        Duration::from_millis(ms.min(self.max_timeout_ms))
    }

    /// Set the round-0 propose and round timeouts
    pub fn with_timeouts(mut self, propose: Duration, round: Duration) -> Self {
        self.propose_timeout_ms = propose.as_millis() as u64;
        self.round_timeout_ms = round.as_millis() as u64;
        self.max_timeout_ms = self.max_timeout_ms.max(self.round_timeout_ms);
        self
    }

    /// Set the per-round timeout increments
    pub fn with_timeout_deltas(mut self, propose: Duration, round: Duration) -> Self {
        self.propose_timeout_delta_ms = propose.as_millis() as u64;
        self.round_timeout_delta_ms = round.as_millis() as u64;
        self
    }

    /// Set the block size limit
    pub fn with_max_block_transactions(mut self, max: usize) -> Self {
        self.max_block_transactions = max;
        self
    }

    /// Set the round consensus resumes at
    pub fn with_resume_round(mut self, round: Round) -> Self {
        self.resume_round = round;
        self
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ConsensusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.propose_timeout(0), Duration::from_millis(1_000));
        assert_eq!(config.round_timeout(0), Duration::from_millis(3_000));
    }

    #[test]
    fn test_timeouts_are_monotone_and_bounded() {
        let config = ConsensusConfig::default();
        let mut previous = Duration::ZERO;
        for round in 0..200 {
            let timeout = config.round_timeout(round);
            assert!(timeout >= previous);
            assert!(timeout <= Duration::from_millis(config.max_timeout_ms));
            assert!(config.propose_timeout(round) <= timeout);
            previous = timeout;
        }
        assert_eq!(
            config.round_timeout(u64::MAX),
            Duration::from_millis(config.max_timeout_ms)
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = ConsensusConfig::default();

        config.propose_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.propose_timeout_ms = 5_000;
        assert!(config.validate().is_err());

        config = ConsensusConfig::default();
        config.max_timeout_ms = 10;
        assert!(config.validate().is_err());

        config = ConsensusConfig::default().with_max_block_transactions(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = ConsensusConfig::new()
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(200))
            .with_timeout_deltas(Duration::from_millis(10), Duration::from_millis(20))
            .with_resume_round(2);

        assert!(config.validate().is_ok());
        assert_eq!(config.propose_timeout(1), Duration::from_millis(60));
        assert_eq!(config.round_timeout(3), Duration::from_millis(260));
        assert_eq!(config.resume_round, 2);
    }

    #[test]
    fn test_file_operations() {
        let dir = tempdir().unwrap();
        let config = ConsensusConfig::default().with_max_block_transactions(64);

        for name in ["consensus.json", "consensus.toml"] {
            let file_path = dir.path().join(name);
            config.save_to_file(&file_path).unwrap();
            let loaded = ConsensusConfig::load_from_file(&file_path).unwrap();
            assert_eq!(config, loaded);
        }
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.json");
        fs::write(&file_path, r#"{ "max_block_transactions": 7 }"#).unwrap();

        let loaded = ConsensusConfig::load_from_file(&file_path).unwrap();
        assert_eq!(loaded.max_block_transactions, 7);
        assert_eq!(loaded.round_timeout_ms, 3_000);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.json");
        fs::write(&file_path, r#"{ "propose_timeout_ms": 9000 }"#).unwrap();
        assert!(matches!(
            ConsensusConfig::load_from_file(&file_path),
            Err(ConsensusError::Config(_))
        ));
        assert!(ConsensusConfig::load_from_file(dir.path().join("missing.json")).is_err());
    }
}
