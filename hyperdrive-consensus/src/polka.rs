//! Quorum certificates

use crate::aggregator::Quorum;
use crate::digest::{signing_bytes, Domain};
use crate::vote::{verify_voted_block, SignedPreCommit, SignedPreVote};
use crate::{ConsensusError, ConsensusResult};
use hyperdrive_core::{Hash, Height, Round, Shard, Signatory, Signature, SignedBlock, SignerVerifier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// At least Q distinct committee members pre-voted the same value at one
/// (height, round); `block` is `None` for a nil polka
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polka {
    pub height: Height,
    pub round: Round,
    pub block: Option<SignedBlock>,
    pub signatures: Vec<Signature>,
    pub signatories: Vec<Signatory>,
}

impl Polka {
    /// Assemble the certificate of a pre-vote quorum
    pub fn from_quorum(height: Height, quorum: Quorum<SignedPreVote>) -> Self {
        let block = quorum
            .votes
            .first()
            .and_then(|v| v.pre_vote.block.clone());
        let (signatories, signatures) = quorum
            .votes
            .into_iter()
            .map(|v| (v.signatory, v.signature))
            .unzip();
        Self {
            height,
            round: quorum.round,
            block,
            signatures,
            signatories,
        }
    }

    pub fn block_header(&self) -> Option<Hash> {
        self.block.as_ref().map(|b| b.header())
    }

    pub fn is_nil(&self) -> bool {
        self.block.is_none()
    }

    /// Check the certificate against the committee
    pub fn verify(&self, shard: &Shard, verifier: &dyn SignerVerifier) -> ConsensusResult<()> {
        if let Some(block) = &self.block {
            verify_voted_block(block, self.height, shard, verifier)
                .map_err(|e| ConsensusError::InvalidPolka(e.to_string()))?;
        }
        verify_signatures(
            Domain::PreVote,
            shard,
            self.height,
            self.round,
            self.block_header(),
            &self.signatories,
            &self.signatures,
            verifier,
        )
        .map_err(ConsensusError::InvalidPolka)
    }
}

/// At least Q distinct committee members pre-committed the block of `polka`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub polka: Polka,
    pub signatures: Vec<Signature>,
    pub signatories: Vec<Signatory>,
}

impl Commit {
    /// Assemble the certificate of a pre-commit quorum; `None` for a nil quorum
    pub fn from_quorum(quorum: Quorum<SignedPreCommit>) -> Option<Self> {
        quorum.value?;
        let polka = quorum.votes.first()?.polka().clone();
        let (signatories, signatures) = quorum
            .votes
            .into_iter()
            .map(|v| (v.signatory, v.signature))
            .unzip();
        Some(Self {
            polka,
            signatures,
            signatories,
        })
    }

    pub fn height(&self) -> Height {
        self.polka.height
    }

    pub fn round(&self) -> Round {
        self.polka.round
    }

    pub fn block(&self) -> Option<&SignedBlock> {
        self.polka.block.as_ref()
    }

    /// Check the pre-commit signatures and the justifying polka
    pub fn verify(&self, shard: &Shard, verifier: &dyn SignerVerifier) -> ConsensusResult<()> {
        if self.polka.is_nil() {
            return Err(ConsensusError::InvalidCommit("nil block".to_string()));
        }
        self.polka
            .verify(shard, verifier)
            .map_err(|e| ConsensusError::InvalidCommit(e.to_string()))?;
        verify_signatures(
            Domain::PreCommit,
            shard,
            self.polka.height,
            self.polka.round,
            self.polka.block_header(),
            &self.signatories,
            &self.signatures,
            verifier,
        )
        .map_err(ConsensusError::InvalidCommit)
    }
}

#[allow(clippy::too_many_arguments)]
fn verify_signatures(
    domain: Domain,
    shard: &Shard,
    height: Height,
    round: Round,
    value: Option<Hash>,
    signatories: &[Signatory],
    signatures: &[Signature],
    verifier: &dyn SignerVerifier,
) -> Result<(), String> {
    if signatories.len() != signatures.len() {
        return Err(format!(
            "{} signatories but {} signatures",
            signatories.len(),
            signatures.len()
        ));
    }

    let quorum = shard.quorum();
    let distinct: HashSet<&Signatory> = signatories.iter().collect();
    if distinct.len() != signatories.len() {
        return Err("signatory counted twice".to_string());
    }
    if distinct.len() < quorum {
        return Err(format!("{} signatures, quorum is {}", distinct.len(), quorum));
    }

    let bytes = signing_bytes(domain, &shard.hash, height, round, value).map_err(|e| e.to_string())?;
    for (signatory, signature) in signatories.iter().zip(signatures) {
        if !shard.signatories.contains(signatory) {
            return Err(format!("{} is not a committee member", signatory));
        }
        if !verifier.verify(signatory, &bytes, signature) {
            return Err(format!("bad signature from {}", signatory));
        }
    }
    Ok(())
}
