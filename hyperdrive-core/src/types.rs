//! Basic consensus types

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Index of a committed block; the first committed block has height 1
pub type Height = u64;

/// Proposal attempt within a height; resets to 0 whenever the height advances
pub type Round = u64;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = u64;

/// Keccak-256 output; identifies blocks, transactions and shards
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Serialize, Deserialize, bincode::Encode,
)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn digest(data: &[u8]) -> Self {
        Self(Keccak256::digest(data).into())
    }

    /// Random hash, used for shard identifiers in tests and demos
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; Self::LEN];
        hex::decode_to_slice(hex, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Header of the empty chain
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_hash_is_empty_chain_header() {
        assert!(Hash::zero().is_zero());
        assert_eq!(Hash::default(), Hash::zero());
        assert_eq!(Hash::zero().to_string(), format!("0x{}", "00".repeat(32)));
        assert!(!Hash::new([1u8; 32]).is_zero());
    }

    #[test]
    fn test_hex_parsing_requires_full_length() {
        let hash = Hash::digest(b"shard");
        assert_eq!(Hash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(Hash::from_hex("1234").is_err());
        assert!(Hash::from_hex("zz").is_err());
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(Hash::digest(b"hyperdrive"), Hash::digest(b"hyperdrive"));
        assert_ne!(Hash::digest(b"hyperdrive"), Hash::digest(b"hyperdriv3"));
    }
}
