use crate::data_structures::{decode_bytes32, ParseBytesError};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

// Fixed 32-byte identifiers. They share one shape, so one macro defines them.
macro_rules! bytes32_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "crate::data_structures::hex32")] pub [u8; 32]);

        impl $name {
            pub const fn new(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }

            /// Rejects anything that is not exactly 32 bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseBytesError> {
                bytes
                    .try_into()
                    .map($name)
                    .map_err(|_| ParseBytesError::InvalidLength { expected: 32, got: bytes.len() })
            }

            pub fn from_hex(s: &str) -> Result<Self, ParseBytesError> {
                decode_bytes32(s).map($name)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{}..)", stringify!($name), hex::encode(&self.0[..4]))
            }
        }
    };
}

bytes32_type!(
    /// Deterministic fingerprint of one escrow, see [`crate::identity::derive_contract_id`].
    ContractId
);

bytes32_type!(
    /// Opaque reference tying both legs of one logical swap together.
    OrderHash
);

bytes32_type!(
    /// Digest of the secret under one chain's hash scheme.
    Hashlock
);

impl OrderHash {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        OrderHash(bytes)
    }
}

// The swap secret. Debug output is redacted and there is no Display impl,
// so it cannot end up in a log line by accident.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preimage(#[serde(with = "crate::data_structures::hex32")] pub [u8; 32]);

impl Preimage {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Preimage(bytes)
    }

    /// Draws a fresh secret from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Preimage(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseBytesError> {
        bytes
            .try_into()
            .map(Preimage)
            .map_err(|_| ParseBytesError::InvalidLength { expected: 32, got: bytes.len() })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage(<redacted>)")
    }
}
