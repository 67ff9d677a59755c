//! Pre-votes and pre-commits

use crate::aggregator::Votable;
use crate::digest::{signing_bytes, Domain};
use crate::polka::Polka;
use crate::{ConsensusError, ConsensusResult};
use hyperdrive_core::{Hash, Height, Round, Shard, Signatory, Signature, SignedBlock, SignerVerifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two voting steps of a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize)]
pub enum VoteKind {
    PreVote,
    PreCommit,
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteKind::PreVote => write!(f, "pre-vote"),
            VoteKind::PreCommit => write!(f, "pre-commit"),
        }
    }
}

/// First-step vote; `None` is a nil vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreVote {
    pub height: Height,
    pub round: Round,
    pub block: Option<SignedBlock>,
}

impl PreVote {
    pub fn new(height: Height, round: Round, block: Option<SignedBlock>) -> Self {
        Self {
            height,
            round,
            block,
        }
    }

    pub fn nil(height: Height, round: Round) -> Self {
        Self::new(height, round, None)
    }

    pub fn block_header(&self) -> Option<Hash> {
        self.block.as_ref().map(|b| b.header())
    }

    /// Sign as a member of the shard
    pub fn sign(self, shard: &Hash, signer: &dyn SignerVerifier) -> ConsensusResult<SignedPreVote> {
        let bytes = signing_bytes(
            Domain::PreVote,
            shard,
            self.height,
            self.round,
            self.block_header(),
        )?;
        let signature = signer.sign(&bytes)?;
        Ok(SignedPreVote {
            pre_vote: self,
            signatory: signer.signatory(),
            signature,
        })
    }
}

/// Pre-vote attested by one committee member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreVote {
    pub pre_vote: PreVote,
    pub signatory: Signatory,
    pub signature: Signature,
}

impl SignedPreVote {
    pub fn height(&self) -> Height {
        self.pre_vote.height
    }

    pub fn round(&self) -> Round {
        self.pre_vote.round
    }

    pub fn block_header(&self) -> Option<Hash> {
        self.pre_vote.block_header()
    }

    /// Check membership, the vote signature and the carried block
    pub fn verify(&self, shard: &Shard, verifier: &dyn SignerVerifier) -> ConsensusResult<()> {
        if !shard.signatories.contains(&self.signatory) {
            return Err(ConsensusError::Unauthorized(self.signatory.to_string()));
        }

        let bytes = signing_bytes(
            Domain::PreVote,
            &shard.hash,
            self.height(),
            self.round(),
            self.block_header(),
        )?;
        if !verifier.verify(&self.signatory, &bytes, &self.signature) {
            return Err(ConsensusError::InvalidVote(format!(
                "bad pre-vote signature from {}",
                self.signatory
            )));
        }

        if let Some(block) = &self.pre_vote.block {
            verify_voted_block(block, self.height(), shard, verifier)?;
        }
        Ok(())
    }
}

impl Votable for SignedPreVote {
    fn kind(&self) -> VoteKind {
        VoteKind::PreVote
    }

    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn height(&self) -> Height {
        self.pre_vote.height
    }

    fn round(&self) -> Round {
        self.pre_vote.round
    }

    fn value(&self) -> Option<Hash> {
        self.pre_vote.block_header()
    }
}

/// Second-step vote, justified by the polka it carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCommit {
    pub polka: Polka,
}

impl PreCommit {
    pub fn new(polka: Polka) -> Self {
        Self { polka }
    }

    pub fn height(&self) -> Height {
        self.polka.height
    }

    pub fn round(&self) -> Round {
        self.polka.round
    }

    pub fn block_header(&self) -> Option<Hash> {
        self.polka.block_header()
    }

    /// Sign as a member of the shard
    pub fn sign(
        self,
        shard: &Hash,
        signer: &dyn SignerVerifier,
    ) -> ConsensusResult<SignedPreCommit> {
        let bytes = signing_bytes(
            Domain::PreCommit,
            shard,
            self.height(),
            self.round(),
            self.block_header(),
        )?;
        let signature = signer.sign(&bytes)?;
        Ok(SignedPreCommit {
            pre_commit: self,
            signatory: signer.signatory(),
            signature,
        })
    }
}

/// Pre-commit attested by one committee member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreCommit {
    pub pre_commit: PreCommit,
    pub signatory: Signatory,
    pub signature: Signature,
}

impl SignedPreCommit {
    pub fn height(&self) -> Height {
        self.pre_commit.height()
    }

    pub fn round(&self) -> Round {
        self.pre_commit.round()
    }

    pub fn block_header(&self) -> Option<Hash> {
        self.pre_commit.block_header()
    }

    pub fn polka(&self) -> &Polka {
        &self.pre_commit.polka
    }

    /// Check membership, the vote signature and the justifying polka
    pub fn verify(&self, shard: &Shard, verifier: &dyn SignerVerifier) -> ConsensusResult<()> {
        if !shard.signatories.contains(&self.signatory) {
            return Err(ConsensusError::Unauthorized(self.signatory.to_string()));
        }

        let bytes = signing_bytes(
            Domain::PreCommit,
            &shard.hash,
            self.height(),
            self.round(),
            self.block_header(),
        )?;
        if !verifier.verify(&self.signatory, &bytes, &self.signature) {
            return Err(ConsensusError::InvalidVote(format!(
                "bad pre-commit signature from {}",
                self.signatory
            )));
        }

        self.pre_commit.polka.verify(shard, verifier)
    }
}

impl Votable for SignedPreCommit {
    fn kind(&self) -> VoteKind {
        VoteKind::PreCommit
    }

    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn height(&self) -> Height {
        self.pre_commit.height()
    }

    fn round(&self) -> Round {
        self.pre_commit.round()
    }

    fn value(&self) -> Option<Hash> {
        self.pre_commit.block_header()
    }
}

/// A block carried by a vote or polka must be intact, signed by a member and
/// belong to the voted height
pub(crate) fn verify_voted_block(
    block: &SignedBlock,
    height: Height,
    shard: &Shard,
    verifier: &dyn SignerVerifier,
) -> ConsensusResult<()> {
    if block.height() != height {
        return Err(ConsensusError::InvalidVote(format!(
            "block at height {} voted at height {}",
            block.height(),
            height
        )));
    }
    if !shard.signatories.contains(&block.signatory) {
        return Err(ConsensusError::Unauthorized(block.signatory.to_string()));
    }
    block.verify(verifier)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperdrive_core::{Block, EcdsaSigner, Signatories};

    fn committee(n: usize) -> (Vec<EcdsaSigner>, Shard) {
        let signers: Vec<EcdsaSigner> = (0..n).map(|_| EcdsaSigner::random()).collect();
        let signatories =
            Signatories::new(signers.iter().map(|s| s.signatory()).collect()).unwrap();
        (signers, Shard::new(Hash::random(), signatories))
    }

    #[test]
    fn test_pre_vote_verifies() {
        let (signers, shard) = committee(4);
        let block = Block::new(1, 0, Hash::zero(), vec![])
            .unwrap()
            .sign(&signers[1])
            .unwrap();

        let vote = PreVote::new(1, 0, Some(block.clone()))
            .sign(&shard.hash, &signers[2])
            .unwrap();
        assert!(vote.verify(&shard, &signers[0]).is_ok());
        assert_eq!(vote.block_header(), Some(block.header()));

        let nil = PreVote::nil(1, 0).sign(&shard.hash, &signers[3]).unwrap();
        assert!(nil.verify(&shard, &signers[0]).is_ok());
        assert_eq!(nil.block_header(), None);
    }

    #[test]
    fn test_pre_vote_from_outsider_is_unauthorized() {
        let (signers, shard) = committee(4);
        let outsider = EcdsaSigner::random();
        let vote = PreVote::nil(1, 0).sign(&shard.hash, &outsider).unwrap();
        assert!(matches!(
            vote.verify(&shard, &signers[0]),
            Err(ConsensusError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_tampered_pre_vote_fails() {
        let (signers, shard) = committee(4);
        let mut vote = PreVote::nil(1, 0).sign(&shard.hash, &signers[1]).unwrap();
        vote.pre_vote.round = 1;
        assert!(matches!(
            vote.verify(&shard, &signers[0]),
            Err(ConsensusError::InvalidVote(_))
        ));

        // Signed for another shard
        let other = Shard::new(Hash::random(), shard.signatories.clone());
        let vote = PreVote::nil(1, 0).sign(&other.hash, &signers[1]).unwrap();
        assert!(vote.verify(&shard, &signers[0]).is_err());
    }

    #[test]
    fn test_pre_vote_for_block_at_wrong_height_fails() {
        let (signers, shard) = committee(4);
        let block = Block::new(2, 0, Hash::zero(), vec![])
            .unwrap()
            .sign(&signers[1])
            .unwrap();
        let vote = PreVote::new(1, 0, Some(block))
            .sign(&shard.hash, &signers[1])
            .unwrap();
        assert!(vote.verify(&shard, &signers[0]).is_err());
    }
}
