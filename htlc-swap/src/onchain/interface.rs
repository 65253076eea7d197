use crate::data_structures::{ChainId, Timestamp};
use crate::escrow::{EscrowError, EscrowImmutables, EscrowSnapshot};
use crate::identity::{ContractId, HashScheme, Preimage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// Opaque handle for a submitted transaction (chain-specific hash or sequence number)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalityStatus {
    /// Included and final. The escrow call took effect.
    Confirmed,
    /// Not confirmed within the timeout. The call may or may not have landed.
    Pending,
    /// Included and final, but the escrow rejected the call.
    Failed(EscrowError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// RPC or network failure. Whether the request reached the chain is unknown.
    #[error("Chain {chain_id} unavailable: {reason}")]
    Unavailable { chain_id: ChainId, reason: String },

    /// The chain's escrow refused the call synchronously.
    #[error("Escrow rejected call: {0}")]
    Rejected(#[from] EscrowError),

    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxHandle),

    #[error("Adapter for chain {actual} asked to act on chain {expected}")]
    WrongChain { expected: ChainId, actual: ChainId },
}

impl ChainError {
    // Only transport failures are worth resubmitting blindly
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Unavailable { .. })
    }
}

/// Per-chain escrow access used by the swap coordinator.
///
/// Implementations must be idempotent in effect: resubmitting a call that
/// already landed surfaces as `DuplicateEscrow` or `AlreadySettled`, never as
/// a second transfer. Time-dependent checks use `current_chain_time`, which
/// is the chain's own block clock.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Hash algorithm and preimage encoding this chain's escrow verifies with.
    fn hash_scheme(&self) -> HashScheme;

    async fn submit_create(&self, immutables: &EscrowImmutables) -> Result<TxHandle, ChainError>;

    async fn submit_withdraw(
        &self,
        contract_id: ContractId,
        preimage: &Preimage,
    ) -> Result<TxHandle, ChainError>;

    async fn submit_refund(&self, contract_id: ContractId) -> Result<TxHandle, ChainError>;

    /// `None` when no escrow exists under `contract_id`.
    async fn get_escrow_state(
        &self,
        contract_id: ContractId,
    ) -> Result<Option<EscrowSnapshot>, ChainError>;

    async fn await_finality(
        &self,
        tx: &TxHandle,
        timeout: Duration,
    ) -> Result<FinalityStatus, ChainError>;

    async fn current_chain_time(&self) -> Result<Timestamp, ChainError>;
}
