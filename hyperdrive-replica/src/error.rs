//! Replica error types

use hyperdrive_consensus::ConsensusError;
use hyperdrive_core::CoreError;
use thiserror::Error;

/// Replica error type
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// Error raised by the state machine
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    /// Error from the core data model
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No tokio runtime to run dispatch tasks on
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ReplicaError {
    fn from(err: serde_json::Error) -> Self {
        ReplicaError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ReplicaError {
    fn from(err: toml::de::Error) -> Self {
        ReplicaError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ReplicaError {
    fn from(err: toml::ser::Error) -> Self {
        ReplicaError::Serialization(err.to_string())
    }
}

/// Result type for replica operations
pub type ReplicaResult<T> = Result<T, ReplicaError>;
