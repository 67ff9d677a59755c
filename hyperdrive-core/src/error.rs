//! Error types for the core crate

use crate::{Hash, Height};
use thiserror::Error;

/// Core errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Bincode error: {0}")]
    Bincode(String),

    #[error("Duplicate signatory {0}")]
    DuplicateSignatory(String),

    #[error("Transaction pool is full (capacity {capacity})")]
    PoolFull { capacity: usize },

    #[error("Block header mismatch: expected {expected}, got {actual}")]
    HeaderMismatch { expected: Hash, actual: Hash },

    #[error("Block at height {actual} does not extend tip at height {tip}")]
    HeightMismatch { tip: Height, actual: Height },

    #[error("Block parent {actual} does not match tip header {expected}")]
    ParentMismatch { expected: Hash, actual: Hash },
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
