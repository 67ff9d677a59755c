//! Signatories, signatures and the signer/verifier capability

use crate::{CoreError, CoreResult, Hash, Height, Round};
use secp256k1::{ecdsa, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Recoverable ECDSA signature
#[derive(Debug, Clone, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize, bincode::Encode)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl Signature {
    /// Create new signature
    pub fn new(r: [u8; 32], s: [u8; 32], v: u8) -> Self {
        Self { r, s, v }
    }

    /// Convert to bytes (65 bytes total)
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v;
        bytes
    }

    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != 65 {
            return Err(CoreError::InvalidSignature);
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);

        Ok(Self { r, s, v: bytes[64] })
    }
}

/// Identity of a committee member, derived from its public key
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    std::hash::Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
)]
pub struct Signatory([u8; 20]);

impl Signatory {
    /// Create a new signatory from byte array
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derive the signatory of a public key (last 20 bytes of its Keccak-256 hash)
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let uncompressed = public_key.serialize_uncompressed();
        // Skip the 0x04 prefix byte
        let digest = Keccak256::digest(&uncompressed[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..32]);
        Self(bytes)
    }

    /// Get the underlying byte array
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Signatory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<[u8; 20]> for Signatory {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

/// Ordered, duplicate-free committee of signatories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Signatory>", into = "Vec<Signatory>")]
pub struct Signatories(Vec<Signatory>);

impl TryFrom<Vec<Signatory>> for Signatories {
    type Error = CoreError;

    fn try_from(signatories: Vec<Signatory>) -> CoreResult<Self> {
        Self::new(signatories)
    }
}

impl From<Signatories> for Vec<Signatory> {
    fn from(signatories: Signatories) -> Self {
        signatories.0
    }
}

impl Signatories {
    /// Create a committee, rejecting duplicate members
    pub fn new(signatories: Vec<Signatory>) -> CoreResult<Self> {
        for (i, signatory) in signatories.iter().enumerate() {
            if signatories[..i].contains(signatory) {
                return Err(CoreError::DuplicateSignatory(signatory.to_string()));
            }
        }
        Ok(Self(signatories))
    }

    /// Number of members (N)
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Quorum threshold Q = floor(2N/3) + 1
    pub fn quorum(&self) -> usize {
        quorum_threshold(self.0.len())
    }

    /// Maximum number of faulty members tolerated, floor((N-1)/3)
    pub fn max_faulty(&self) -> usize {
        self.0.len().saturating_sub(1) / 3
    }

    pub fn contains(&self, signatory: &Signatory) -> bool {
        self.0.contains(signatory)
    }

    pub fn index_of(&self, signatory: &Signatory) -> Option<usize> {
        self.0.iter().position(|s| s == signatory)
    }

    pub fn get(&self, index: usize) -> Option<&Signatory> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signatory> {
        self.0.iter()
    }

    /// Round-robin proposer for (height, round); every member proposes once
    /// every N consecutive rounds and the rotation shifts with each height
    pub fn leader(&self, height: Height, round: Round) -> Option<&Signatory> {
        if self.0.is_empty() {
            return None;
        }
        let n = self.0.len() as u64;
        let index = (height % n + round % n) % n;
        self.0.get(index as usize)
    }
}

/// Q = floor(2N/3) + 1
pub fn quorum_threshold(n: usize) -> usize {
    2 * n / 3 + 1
}

/// Capability to sign payloads and to verify signatures of other members
pub trait SignerVerifier: Send + Sync {
    /// Identity of the local signer
    fn signatory(&self) -> Signatory;

    /// Sign an arbitrary payload
    fn sign(&self, data: &[u8]) -> CoreResult<Signature>;

    /// Check that `signature` over `data` was produced by `signatory`
    fn verify(&self, signatory: &Signatory, data: &[u8], signature: &Signature) -> bool;
}

/// secp256k1 recoverable ECDSA signer
pub struct EcdsaSigner {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    signatory: Signatory,
}

impl EcdsaSigner {
    /// Create a signer from a 32-byte private key
    pub fn from_secret_key(private_key: &[u8]) -> CoreResult<Self> {
        let secp = Secp256k1::new();
        let secret_key =
            SecretKey::from_slice(private_key).map_err(|e| CoreError::Crypto(e.to_string()))?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Ok(Self {
            secp,
            secret_key,
            signatory: Signatory::from_public_key(&public_key),
        })
    }

    /// Create a signer with a fresh random key
    pub fn random() -> Self {
        loop {
            let bytes: [u8; 32] = rand::random();
            // Rejects only zero and values above the curve order
            if let Ok(signer) = Self::from_secret_key(&bytes) {
                return signer;
            }
        }
    }

    fn message(data: &[u8]) -> Message {
        let digest = Hash::digest(data);
        Message::from_digest(*digest.as_bytes())
    }

    /// Recover the signatory that produced `signature` over `data`
    pub fn recover(&self, data: &[u8], signature: &Signature) -> CoreResult<Signatory> {
        let recovery_id = ecdsa::RecoveryId::from_u8_masked(signature.v);

        let mut sig_bytes = [0u8; 64];
        sig_bytes[0..32].copy_from_slice(&signature.r);
        sig_bytes[32..64].copy_from_slice(&signature.s);

        let recoverable_sig = ecdsa::RecoverableSignature::from_compact(&sig_bytes, recovery_id)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let public_key = self
            .secp
            .recover_ecdsa(Self::message(data), &recoverable_sig)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        Ok(Signatory::from_public_key(&public_key))
    }
}

impl fmt::Debug for EcdsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdsaSigner")
            .field("signatory", &self.signatory)
            .finish_non_exhaustive()
    }
}

impl SignerVerifier for EcdsaSigner {
    fn signatory(&self) -> Signatory {
        self.signatory
    }

    fn sign(&self, data: &[u8]) -> CoreResult<Signature> {
        let sig = self
            .secp
            .sign_ecdsa_recoverable(Self::message(data), &self.secret_key);
        let (recovery_id, sig_bytes) = sig.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[0..32]);
        s.copy_from_slice(&sig_bytes[32..64]);

        Ok(Signature::new(r, s, recovery_id as u8))
    }

    fn verify(&self, signatory: &Signatory, data: &[u8], signature: &Signature) -> bool {
        match self.recover(data, signature) {
            Ok(recovered) => recovered == *signatory,
            Err(_) => false,
        }
    }
}
