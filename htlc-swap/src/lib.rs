// HTLC cross-chain atomic swaps: per-chain escrow engine, chain adapters and the swap coordinator

pub mod config;
pub mod cross_chain;
pub mod data_structures;
pub mod escrow;
pub mod identity;
pub mod onchain;

pub mod test_utils; // Shared helpers for unit and scenario tests
