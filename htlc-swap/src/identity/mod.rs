// Hash & Identity module: preimage/hashlock arithmetic and contract-id derivation.
// Pure apart from random secret generation.

pub mod types;
pub mod hash;
pub mod preimage;
pub mod contract_id;

// Re-export key types for easier access
pub use contract_id::{derive_contract_id, encode_immutables, IMMUTABLES_ENCODED_LEN};
pub use hash::{Blake3Hasher, HashAlgorithm, HashFunction, Keccak256Hasher, Sha256Hasher};
pub use preimage::{verify_preimage, HashScheme, PreimageEncoding};
pub use types::{ContractId, Hashlock, OrderHash, Preimage};
