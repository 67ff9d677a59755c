//! Payloads that proposals and votes sign
//!
//! Every signature binds the shard, height, round and the value voted for, so
//! a signature can be re-verified from a quorum certificate alone and cannot
//! be replayed on another shard or in another step.

use crate::{ConsensusError, ConsensusResult};
use hyperdrive_core::{Hash, Height, Round};

/// Step a signature belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Propose,
    PreVote,
    PreCommit,
}

impl Domain {
    fn tag(self) -> u8 {
        match self {
            Domain::Propose => 1,
            Domain::PreVote => 2,
            Domain::PreCommit => 3,
        }
    }
}

#[derive(bincode::Encode)]
struct SigningPreimage {
    domain: u8,
    shard: Hash,
    height: Height,
    round: Round,
    value: Option<Hash>,
}

/// Bytes signed for `value` (a block header, or nil) at (shard, height, round)
pub fn signing_bytes(
    domain: Domain,
    shard: &Hash,
    height: Height,
    round: Round,
    value: Option<Hash>,
) -> ConsensusResult<Vec<u8>> {
    let preimage = SigningPreimage {
        domain: domain.tag(),
        shard: *shard,
        height,
        round,
        value,
    };
    bincode::encode_to_vec(&preimage, bincode::config::standard())
        .map_err(|e| ConsensusError::Serialization(e.to_string()))
}
