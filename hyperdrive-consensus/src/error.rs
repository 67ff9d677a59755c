//! Consensus error types

use hyperdrive_core::CoreError;
use thiserror::Error;

/// Consensus error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Proposal failed validation
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    /// Vote failed validation
    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    /// Quorum certificate failed validation
    #[error("Invalid polka: {0}")]
    InvalidPolka(String),

    /// Commit certificate failed validation
    #[error("Invalid commit: {0}")]
    InvalidCommit(String),

    /// Signer is not a member of the committee
    #[error("Signatory {0} is not a committee member")]
    Unauthorized(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the core data model
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<serde_json::Error> for ConsensusError {
    fn from(err: serde_json::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ConsensusError {
    fn from(err: toml::de::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ConsensusError {
    fn from(err: toml::ser::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
