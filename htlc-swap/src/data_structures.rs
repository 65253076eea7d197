use serde::{Deserialize, Serialize};
use std::fmt;

// Chain identifier as used by the adapters (EVM chain ids fit in u64)
pub type ChainId = u64;

// Token amounts. u128 covers 18-decimal EVM balances without overflow in practice.
pub type Amount = u128;

// Seconds on a chain's own clock. Never compared across chains.
pub type Timestamp = u64;

// No Eq: hex::FromHexError is only PartialEq
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseBytesError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

/// Decodes an optionally `0x`-prefixed hex string into exactly 32 bytes.
pub fn decode_bytes32(s: &str) -> Result<[u8; 32], ParseBytesError> {
    let raw = hex::decode(s.trim_start_matches("0x"))?;
    raw.as_slice()
        .try_into()
        .map_err(|_| ParseBytesError::InvalidLength { expected: 32, got: raw.len() })
}

// Serde helper: 32-byte arrays travel as 0x-prefixed hex strings.
pub mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_bytes32(&s).map_err(serde::de::Error::custom)
    }
}

// A chain-native account, stored fixed-width so that contract-id serialization
// is unambiguous. Shorter native addresses (20-byte EVM) are left-padded.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(#[serde(with = "hex32")] pub [u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Address(bytes)
    }

    /// Left-pads a 20-byte EVM address into the fixed 32-byte form.
    pub fn from_evm(bytes: [u8; 20]) -> Self {
        let mut out = [0u8; 32];
        out[12..].copy_from_slice(&bytes);
        Address(out)
    }

    /// Parses a hex address of either 20 or 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, ParseBytesError> {
        let raw = hex::decode(s.trim_start_matches("0x"))?;
        match raw.len() {
            20 => {
                let mut evm = [0u8; 20];
                evm.copy_from_slice(&raw);
                Ok(Address::from_evm(evm))
            }
            32 => {
                let mut full = [0u8; 32];
                full.copy_from_slice(&raw);
                Ok(Address(full))
            }
            got => Err(ParseBytesError::InvalidLength { expected: 32, got }),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps engine logs readable
        write!(f, "Address(0x{}..)", hex::encode(&self.0[28..]))
    }
}

// Asset identifier on one chain (token contract address, denom hash, ...).
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(#[serde(with = "hex32")] pub [u8; 32]);

impl TokenId {
    // The chain's native asset. Safety deposits are always paid in it.
    pub const NATIVE: TokenId = TokenId([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        TokenId(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseBytesError> {
        Address::from_hex(s).map(|a| TokenId(a.0))
    }

    pub fn is_native(&self) -> bool {
        *self == TokenId::NATIVE
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "native")
        } else {
            write!(f, "0x{}", hex::encode(self.0))
        }
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", self)
    }
}
