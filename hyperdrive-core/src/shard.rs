//! Shard descriptors

use crate::{Hash, Signatories};
use serde::{Deserialize, Serialize};

/// One consensus committee instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// Stable identifier for the lifetime of the shard
    pub hash: Hash,
    /// Committee, fixed when the shard is accepted
    pub signatories: Signatories,
}

impl Shard {
    pub fn new(hash: Hash, signatories: Signatories) -> Self {
        Self { hash, signatories }
    }

    /// Committee size N
    pub fn size(&self) -> usize {
        self.signatories.len()
    }

    /// Quorum threshold Q
    pub fn quorum(&self) -> usize {
        self.signatories.quorum()
    }
}
