// Contract-id derivation.
//
// contract_id = H(order_hash || hashlock || maker || taker || token
//                 || amount || safety_deposit || timelocks)
//
// Layout is fixed-width: 32-byte hashes/addresses, u128 amounts and u64
// delays, all little-endian. deployed_at is not an input, so the id is known
// before the escrow lands and any party can recompute it from the immutables.

use super::hash::HashFunction;
use super::types::ContractId;
use crate::escrow::types::EscrowImmutables;

pub const IMMUTABLES_ENCODED_LEN: usize = 5 * 32 + 2 * 16 + 4 * 8;

pub fn encode_immutables(immutables: &EscrowImmutables) -> [u8; IMMUTABLES_ENCODED_LEN] {
    let mut out = [0u8; IMMUTABLES_ENCODED_LEN];
    let fields: [&[u8]; 5] = [
        immutables.order_hash.as_bytes(),
        immutables.hashlock.as_bytes(),
        immutables.maker.as_bytes(),
        immutables.taker.as_bytes(),
        immutables.token.as_bytes(),
    ];

    let mut offset = 0;
    for field in fields {
        out[offset..offset + 32].copy_from_slice(field);
        offset += 32;
    }
    for amount in [immutables.amount, immutables.safety_deposit] {
        out[offset..offset + 16].copy_from_slice(&amount.to_le_bytes());
        offset += 16;
    }
    let t = &immutables.timelocks;
    for delay in [
        t.withdrawal_delay,
        t.public_withdrawal_delay,
        t.cancellation_delay,
        t.public_cancellation_delay,
    ] {
        out[offset..offset + 8].copy_from_slice(&delay.to_le_bytes());
        offset += 8;
    }
    debug_assert_eq!(offset, IMMUTABLES_ENCODED_LEN);
    out
}

/// Pure and reproducible by any holder of the immutables. `hasher` must be
/// the hash the escrow's own chain uses.
pub fn derive_contract_id<H: HashFunction + ?Sized>(
    immutables: &EscrowImmutables,
    hasher: &H,
) -> ContractId {
    ContractId(hasher.digest(&encode_immutables(immutables)))
}
