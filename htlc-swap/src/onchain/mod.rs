// Chain access: the adapter trait, escrow calls and an in-process chain

pub mod chain_simulator;
pub mod escrow_contract;
pub mod interface;

pub use chain_simulator::{FaultPlan, SignerPolicy, SimulatedChain};
pub use escrow_contract::{CallEffect, CallReceipt, EscrowCall};
pub use interface::{ChainAdapter, ChainError, FinalityStatus, TxHandle};
