use super::types::EscrowState;
use crate::data_structures::{Amount, Timestamp, TokenId};
use crate::identity::ContractId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// How a caller should react to an engine error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller bug or tampering. Never retried.
    Integrity,
    /// Wrong moment. Re-check chain time and try again later.
    Timing,
    /// Bad secret. Fatal for this attempt, escrow untouched.
    Verification,
    /// The requested effect already exists. Treated as success.
    IdempotentConflict,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowError {
    #[error("Invalid amount: must be greater than zero")]
    InvalidAmount,

    #[error("Invalid timelocks: {0}")]
    InvalidTimelocks(String),

    #[error("Malformed immutables: {0}")]
    MalformedImmutables(String),

    #[error("Escrow {0} already exists with identical immutables")]
    DuplicateEscrow(ContractId),

    #[error("Escrow {0} already exists with different immutables")]
    HashCollision(ContractId),

    #[error("Escrow {0} not found")]
    EscrowNotFound(ContractId),

    #[error("Preimage does not match hashlock of escrow {0}")]
    WrongPreimage(ContractId),

    #[error("Escrow {contract_id} already settled ({state:?})")]
    AlreadySettled { contract_id: ContractId, state: EscrowState },

    #[error("Escrow {contract_id} not withdrawable by this caller before {opens_at}")]
    NotYetWithdrawable { contract_id: ContractId, opens_at: Timestamp },

    #[error("Withdrawal window of escrow {contract_id} closed at {closed_at}")]
    WithdrawalWindowClosed { contract_id: ContractId, closed_at: Timestamp },

    #[error("Timelock of escrow {contract_id} does not expire for this caller before {expires_at}")]
    TimelockNotExpired { contract_id: ContractId, expires_at: Timestamp },

    #[error("Insufficient funds: {token} required {required}, available {available}")]
    InsufficientFunds { token: TokenId, required: Amount, available: Amount },
}

impl EscrowError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EscrowError::InvalidAmount
            | EscrowError::InvalidTimelocks(_)
            | EscrowError::MalformedImmutables(_)
            | EscrowError::HashCollision(_)
            | EscrowError::EscrowNotFound(_)
            | EscrowError::InsufficientFunds { .. } => ErrorClass::Integrity,
            EscrowError::NotYetWithdrawable { .. }
            | EscrowError::WithdrawalWindowClosed { .. }
            | EscrowError::TimelockNotExpired { .. } => ErrorClass::Timing,
            EscrowError::WrongPreimage(_) => ErrorClass::Verification,
            EscrowError::DuplicateEscrow(_) | EscrowError::AlreadySettled { .. } => {
                ErrorClass::IdempotentConflict
            }
        }
    }
}
