//! Block data structures and operations

use crate::{
    CoreError, CoreResult, Hash, Height, Signatory, Signature, SignerVerifier, Timestamp,
    Transaction,
};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Domain separator for block signatures
const BLOCK_SIGNING_DOMAIN: &[u8] = b"hyperdrive/block";

/// Fields covered by the block header hash
#[derive(bincode::Encode)]
struct HeaderPreimage {
    height: Height,
    timestamp: Timestamp,
    parent_header: Hash,
    transactions_root: Hash,
}

/// Application payload agreed on at one height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode)]
pub struct Block {
    /// Block height
    pub height: Height,
    /// Creation time in milliseconds
    pub timestamp: Timestamp,
    /// Header of the parent block (zero for the first block)
    pub parent_header: Hash,
    /// Hash of the block contents
    pub header: Hash,
    /// Ordered transactions
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block, computing its header
    pub fn new(
        height: Height,
        timestamp: Timestamp,
        parent_header: Hash,
        transactions: Vec<Transaction>,
    ) -> CoreResult<Self> {
        let transactions_root = Self::transactions_root(&transactions);
        let header = Self::compute_header(height, timestamp, &parent_header, transactions_root)?;

        Ok(Self {
            height,
            timestamp,
            parent_header,
            header,
            transactions,
        })
    }

    /// Hash of the concatenated transaction hashes
    pub fn transactions_root(transactions: &[Transaction]) -> Hash {
        if transactions.is_empty() {
            return Hash::zero();
        }

        let mut hasher = Keccak256::new();
        for tx in transactions {
            hasher.update(tx.hash().as_bytes());
        }
        Hash::new(hasher.finalize().into())
    }

    fn compute_header(
        height: Height,
        timestamp: Timestamp,
        parent_header: &Hash,
        transactions_root: Hash,
    ) -> CoreResult<Hash> {
        let preimage = HeaderPreimage {
            height,
            timestamp,
            parent_header: *parent_header,
            transactions_root,
        };
        let encoded = bincode::encode_to_vec(&preimage, bincode::config::standard())
            .map_err(|e| CoreError::Bincode(e.to_string()))?;
        Ok(Hash::digest(&encoded))
    }

    /// Check that the header matches the block contents
    pub fn verify_header(&self) -> CoreResult<()> {
        let expected = Self::compute_header(
            self.height,
            self.timestamp,
            &self.parent_header,
            Self::transactions_root(&self.transactions),
        )?;
        if expected != self.header {
            return Err(CoreError::HeaderMismatch {
                expected,
                actual: self.header,
            });
        }
        Ok(())
    }

    /// Sign the block header
    pub fn sign(self, signer: &dyn SignerVerifier) -> CoreResult<SignedBlock> {
        let signature = signer.sign(&block_signing_bytes(&self.header))?;
        Ok(SignedBlock {
            block: self,
            signatory: signer.signatory(),
            signature,
        })
    }
}

fn block_signing_bytes(header: &Hash) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(BLOCK_SIGNING_DOMAIN.len() + 32);
    bytes.extend_from_slice(BLOCK_SIGNING_DOMAIN);
    bytes.extend_from_slice(header.as_bytes());
    bytes
}

/// Block signed by its proposer; immutable once signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
    pub signatory: Signatory,
    pub signature: Signature,
}

impl SignedBlock {
    pub fn header(&self) -> Hash {
        self.block.header
    }

    pub fn parent_header(&self) -> Hash {
        self.block.parent_header
    }

    pub fn height(&self) -> Height {
        self.block.height
    }

    /// Check the header and the proposer signature
    pub fn verify(&self, verifier: &dyn SignerVerifier) -> CoreResult<()> {
        self.block.verify_header()?;
        if !verifier.verify(
            &self.signatory,
            &block_signing_bytes(&self.block.header),
            &self.signature,
        ) {
            return Err(CoreError::InvalidSignature);
        }
        Ok(())
    }
}
