use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 256-bit hash function `H`. Each chain's escrow module verifies with its
/// own `H`, so the engine and the coordinator never assume a global one.
pub trait HashFunction: Send + Sync {
    fn digest(&self, data: &[u8]) -> [u8; 32];
}

pub struct Sha256Hasher;

impl HashFunction for Sha256Hasher {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(data));
        out
    }
}

// EVM-native keccak (not NIST SHA3-256; the padding differs)
pub struct Keccak256Hasher;

impl HashFunction for Keccak256Hasher {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        ethers::utils::keccak256(data)
    }
}

pub struct Blake3Hasher;

impl HashFunction for Blake3Hasher {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        *blake3::hash(data).as_bytes()
    }
}

// Serializable selector over the supported hash families, so a chain's
// published hash contract can live in config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha256,
    Keccak256,
    Blake3,
}

impl HashFunction for HashAlgorithm {
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        match self {
            HashAlgorithm::Sha256 => Sha256Hasher.digest(data),
            HashAlgorithm::Keccak256 => Keccak256Hasher.digest(data),
            HashAlgorithm::Blake3 => Blake3Hasher.digest(data),
        }
    }
}
