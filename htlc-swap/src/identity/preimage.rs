use super::hash::{HashAlgorithm, HashFunction};
use super::types::{Hashlock, Preimage};
use ethers::abi::{encode, Token};
use serde::{Deserialize, Serialize};

/// The exact bytes a chain's escrow feeds into `H` when it checks a secret.
///
/// A mismatch here looks exactly like a wrong secret on-chain, so every
/// adapter publishes its encoding next to its hash algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreimageEncoding {
    /// The 32 secret bytes as-is.
    Raw,
    /// UTF-8 bytes of the `0x`-prefixed lowercase hex string (66 bytes).
    HexString,
    /// Solidity `abi.encode(string)` of the same hex string: offset word,
    /// length word, then the right-padded string data.
    AbiString,
}

impl PreimageEncoding {
    pub fn encode(&self, preimage: &Preimage) -> Vec<u8> {
        match self {
            PreimageEncoding::Raw => preimage.as_bytes().to_vec(),
            PreimageEncoding::HexString => preimage.to_hex().into_bytes(),
            PreimageEncoding::AbiString => encode(&[Token::String(preimage.to_hex())]),
        }
    }
}

// Hash contract of one chain: which H, applied to which encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashScheme {
    pub algorithm: HashAlgorithm,
    pub encoding: PreimageEncoding,
}

impl HashScheme {
    pub const fn new(algorithm: HashAlgorithm, encoding: PreimageEncoding) -> Self {
        HashScheme { algorithm, encoding }
    }

    pub fn hashlock(&self, preimage: &Preimage) -> Hashlock {
        Hashlock(self.algorithm.digest(&self.encoding.encode(preimage)))
    }

    pub fn verify_preimage(&self, preimage: &Preimage, hashlock: &Hashlock) -> bool {
        self.hashlock(preimage) == *hashlock
    }
}

/// `H(encode(preimage)) == hashlock` under the given chain's scheme.
pub fn verify_preimage(scheme: &HashScheme, preimage: &Preimage, hashlock: &Hashlock) -> bool {
    scheme.verify_preimage(preimage, hashlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const ALL_SCHEMES: [HashScheme; 4] = [
        HashScheme::new(HashAlgorithm::Sha256, PreimageEncoding::Raw),
        HashScheme::new(HashAlgorithm::Keccak256, PreimageEncoding::AbiString),
        HashScheme::new(HashAlgorithm::Keccak256, PreimageEncoding::Raw),
        HashScheme::new(HashAlgorithm::Blake3, PreimageEncoding::HexString),
    ];

    fn flip_bit(p: &Preimage, bit: usize) -> Preimage {
        let mut bytes = p.0;
        bytes[bit / 8] ^= 1 << (bit % 8);
        Preimage(bytes)
    }

    #[test]
    fn random_preimages_verify_and_single_bit_flips_do_not() {
        let mut rng = rand::thread_rng();
        for scheme in ALL_SCHEMES {
            for _ in 0..16 {
                let preimage = Preimage::new(rng.gen());
                let hashlock = scheme.hashlock(&preimage);
                assert!(verify_preimage(&scheme, &preimage, &hashlock));

                let bit = rng.gen_range(0..256);
                assert!(!verify_preimage(&scheme, &flip_bit(&preimage, bit), &hashlock));
            }
        }
    }

    #[test]
    fn encoding_lengths_are_fixed() {
        let p = Preimage::new([0x11; 32]);
        assert_eq!(PreimageEncoding::Raw.encode(&p).len(), 32);
        assert_eq!(PreimageEncoding::HexString.encode(&p).len(), 66);
        // offset + length + 66 bytes padded to 96
        assert_eq!(PreimageEncoding::AbiString.encode(&p).len(), 32 + 32 + 96);
    }

    #[test]
    fn abi_string_layout() {
        let p = Preimage::new([0x11; 32]);
        let encoded = PreimageEncoding::AbiString.encode(&p);
        assert_eq!(encoded[31], 0x20); // offset of the dynamic string
        assert_eq!(encoded[63], 66); // string length
        assert_eq!(&encoded[64..66], b"0x");
        assert!(encoded[64 + 66..].iter().all(|b| *b == 0));
    }

    #[test]
    fn encoding_mismatch_reads_as_wrong_secret() {
        let preimage = Preimage::new([0x42; 32]);
        let published = HashScheme::new(HashAlgorithm::Keccak256, PreimageEncoding::AbiString);
        let guessed = HashScheme::new(HashAlgorithm::Keccak256, PreimageEncoding::HexString);

        let hashlock = published.hashlock(&preimage);
        assert!(published.verify_preimage(&preimage, &hashlock));
        assert!(!guessed.verify_preimage(&preimage, &hashlock));
    }

    #[test]
    fn same_secret_differs_across_chains() {
        let preimage = Preimage::new([0x07; 32]);
        let evm = HashScheme::new(HashAlgorithm::Keccak256, PreimageEncoding::Raw);
        let cosmos = HashScheme::new(HashAlgorithm::Sha256, PreimageEncoding::Raw);
        assert_ne!(evm.hashlock(&preimage), cosmos.hashlock(&preimage));
    }
}
