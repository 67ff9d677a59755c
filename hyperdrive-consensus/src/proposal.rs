//! Block proposals

use crate::digest::{signing_bytes, Domain};
use crate::vote::verify_voted_block;
use crate::{ConsensusError, ConsensusResult};
use hyperdrive_core::{Hash, Height, Round, Shard, Signatory, Signature, SignedBlock, SignerVerifier};
use serde::{Deserialize, Serialize};

/// A block put forward by the leader of (height, round)
///
/// The block keeps the signature of its author, so a locked block can be
/// proposed again in a later round by a different leader without changing
/// its header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propose {
    pub height: Height,
    pub round: Round,
    pub block: SignedBlock,
    pub signatory: Signatory,
    pub signature: Signature,
}

impl Propose {
    /// Sign `block` as the proposal of `signer` at (height, round)
    pub fn new(
        height: Height,
        round: Round,
        block: SignedBlock,
        shard: &Hash,
        signer: &dyn SignerVerifier,
    ) -> ConsensusResult<Self> {
        let bytes = signing_bytes(Domain::Propose, shard, height, round, Some(block.header()))?;
        let signature = signer.sign(&bytes)?;
        Ok(Self {
            height,
            round,
            block,
            signatory: signer.signatory(),
            signature,
        })
    }

    pub fn block_header(&self) -> Hash {
        self.block.header()
    }

    /// Check that the proposal comes from the leader of its round
    pub fn verify_leader(&self, shard: &Shard, verifier: &dyn SignerVerifier) -> ConsensusResult<()> {
        let leader = shard
            .signatories
            .leader(self.height, self.round)
            .ok_or_else(|| ConsensusError::InvalidProposal("empty committee".to_string()))?;
        if *leader != self.signatory {
            return Err(ConsensusError::Unauthorized(format!(
                "{} is not the leader of height {} round {}",
                self.signatory, self.height, self.round
            )));
        }

        let bytes = signing_bytes(
            Domain::Propose,
            &shard.hash,
            self.height,
            self.round,
            Some(self.block_header()),
        )?;
        if !verifier.verify(&self.signatory, &bytes, &self.signature) {
            return Err(ConsensusError::InvalidProposal(format!(
                "bad proposal signature from {}",
                self.signatory
            )));
        }
        Ok(())
    }

    /// Check the proposed block itself
    pub fn verify_block(&self, shard: &Shard, verifier: &dyn SignerVerifier) -> ConsensusResult<()> {
        verify_voted_block(&self.block, self.height, shard, verifier)
            .map_err(|e| ConsensusError::InvalidProposal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperdrive_core::{Block, EcdsaSigner, Signatories, Transaction};

    fn committee(n: usize) -> (Vec<EcdsaSigner>, Shard) {
        let signers: Vec<EcdsaSigner> = (0..n).map(|_| EcdsaSigner::random()).collect();
        let signatories =
            Signatories::new(signers.iter().map(|s| s.signatory()).collect()).unwrap();
        (signers, Shard::new(Hash::random(), signatories))
    }

    fn leader_of<'a>(signers: &'a [EcdsaSigner], shard: &Shard, height: Height, round: Round) -> &'a EcdsaSigner {
        let leader = shard.signatories.leader(height, round).unwrap();
        signers.iter().find(|s| s.signatory() == *leader).unwrap()
    }

    #[test]
    fn test_leader_proposal_verifies() {
        let (signers, shard) = committee(4);
        let leader = leader_of(&signers, &shard, 1, 0);
        let block = Block::new(1, 0, Hash::zero(), vec![Transaction::new(vec![1])])
            .unwrap()
            .sign(leader)
            .unwrap();

        let propose = Propose::new(1, 0, block, &shard.hash, leader).unwrap();
        assert!(propose.verify_leader(&shard, &signers[0]).is_ok());
        assert!(propose.verify_block(&shard, &signers[0]).is_ok());
    }

    #[test]
    fn test_non_leader_proposal_is_unauthorized() {
        let (signers, shard) = committee(4);
        let other = shard.signatories.leader(1, 1).unwrap();
        let other = signers.iter().find(|s| s.signatory() == *other).unwrap();
        let block = Block::new(1, 0, Hash::zero(), vec![]).unwrap().sign(other).unwrap();

        let propose = Propose::new(1, 0, block, &shard.hash, other).unwrap();
        assert!(matches!(
            propose.verify_leader(&shard, &signers[0]),
            Err(ConsensusError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_reproposed_block_keeps_author() {
        let (signers, shard) = committee(4);
        let first = leader_of(&signers, &shard, 1, 0);
        let second = leader_of(&signers, &shard, 1, 1);
        let block = Block::new(1, 0, Hash::zero(), vec![]).unwrap().sign(first).unwrap();

        let propose = Propose::new(1, 1, block.clone(), &shard.hash, second).unwrap();
        assert!(propose.verify_leader(&shard, &signers[0]).is_ok());
        assert!(propose.verify_block(&shard, &signers[0]).is_ok());
        assert_eq!(propose.block.signatory, first.signatory());
        assert_eq!(propose.block_header(), block.header());
    }

    #[test]
    fn test_tampered_proposal_fails() {
        let (signers, shard) = committee(4);
        let leader = leader_of(&signers, &shard, 1, 0);
        let block = Block::new(1, 0, Hash::zero(), vec![]).unwrap().sign(leader).unwrap();
        let mut propose = Propose::new(1, 0, block, &shard.hash, leader).unwrap();

        propose.block.block.transactions.push(Transaction::new(vec![9]));
        assert!(propose.verify_leader(&shard, &signers[0]).is_ok());
        assert!(matches!(
            propose.verify_block(&shard, &signers[0]),
            Err(ConsensusError::InvalidProposal(_))
        ));
    }
}
