// Escrow data model: immutables, timelocks, state and snapshots

use super::error::EscrowError;
use crate::data_structures::{Address, Amount, Timestamp, TokenId};
use crate::identity::{derive_contract_id, ContractId, HashFunction, Hashlock, OrderHash, Preimage};
use serde::{Deserialize, Serialize};

/// Deadlines in seconds relative to the escrow's `deployed_at`.
///
/// Must satisfy `withdrawal < public_withdrawal < cancellation < public_cancellation`,
/// which gives the taker an exclusive claim window before any fallback opens
/// and keeps refunds from racing a legitimate withdrawal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timelocks {
    pub withdrawal_delay: u64,
    pub public_withdrawal_delay: u64,
    pub cancellation_delay: u64,
    pub public_cancellation_delay: u64,
}

// Which code paths are open at a given moment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelockStage {
    Locked,
    PrivateWithdrawal,
    PublicWithdrawal,
    PrivateCancellation,
    PublicCancellation,
}

impl TimelockStage {
    pub fn is_withdrawable(&self) -> bool {
        matches!(self, TimelockStage::PrivateWithdrawal | TimelockStage::PublicWithdrawal)
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, TimelockStage::PrivateCancellation | TimelockStage::PublicCancellation)
    }
}

impl Timelocks {
    pub fn new(
        withdrawal_delay: u64,
        public_withdrawal_delay: u64,
        cancellation_delay: u64,
        public_cancellation_delay: u64,
    ) -> Result<Self, EscrowError> {
        let timelocks = Timelocks {
            withdrawal_delay,
            public_withdrawal_delay,
            cancellation_delay,
            public_cancellation_delay,
        };
        timelocks.validate()?;
        Ok(timelocks)
    }

    pub fn validate(&self) -> Result<(), EscrowError> {
        if self.withdrawal_delay >= self.public_withdrawal_delay {
            return Err(EscrowError::InvalidTimelocks(format!(
                "withdrawal_delay {} must be below public_withdrawal_delay {}",
                self.withdrawal_delay, self.public_withdrawal_delay
            )));
        }
        if self.public_withdrawal_delay >= self.cancellation_delay {
            return Err(EscrowError::InvalidTimelocks(format!(
                "public_withdrawal_delay {} must be below cancellation_delay {}",
                self.public_withdrawal_delay, self.cancellation_delay
            )));
        }
        if self.cancellation_delay >= self.public_cancellation_delay {
            return Err(EscrowError::InvalidTimelocks(format!(
                "cancellation_delay {} must be below public_cancellation_delay {}",
                self.cancellation_delay, self.public_cancellation_delay
            )));
        }
        Ok(())
    }

    // Absolute deadlines on the escrow's own chain clock
    pub fn withdrawal_start(&self, deployed_at: Timestamp) -> Timestamp {
        deployed_at.saturating_add(self.withdrawal_delay)
    }

    pub fn public_withdrawal_start(&self, deployed_at: Timestamp) -> Timestamp {
        deployed_at.saturating_add(self.public_withdrawal_delay)
    }

    pub fn cancellation_start(&self, deployed_at: Timestamp) -> Timestamp {
        deployed_at.saturating_add(self.cancellation_delay)
    }

    pub fn public_cancellation_start(&self, deployed_at: Timestamp) -> Timestamp {
        deployed_at.saturating_add(self.public_cancellation_delay)
    }

    pub fn stage_at(&self, deployed_at: Timestamp, now: Timestamp) -> TimelockStage {
        if now >= self.public_cancellation_start(deployed_at) {
            TimelockStage::PublicCancellation
        } else if now >= self.cancellation_start(deployed_at) {
            TimelockStage::PrivateCancellation
        } else if now >= self.public_withdrawal_start(deployed_at) {
            TimelockStage::PublicWithdrawal
        } else if now >= self.withdrawal_start(deployed_at) {
            TimelockStage::PrivateWithdrawal
        } else {
            TimelockStage::Locked
        }
    }
}

/// Everything fixed at escrow creation. The contract id is derived from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscrowImmutables {
    pub order_hash: OrderHash,
    pub hashlock: Hashlock,
    pub maker: Address, // depositor, receives refunds
    pub taker: Address, // recipient, receives the amount on withdrawal
    pub token: TokenId,
    pub amount: Amount,
    pub safety_deposit: Amount, // native token
    pub timelocks: Timelocks,
}

impl EscrowImmutables {
    /// Consumes and returns the record if it is well-formed.
    pub fn validated(self) -> Result<Self, EscrowError> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), EscrowError> {
        if self.amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        if self.hashlock.as_bytes() == &[0u8; 32] {
            // An all-zero digest is what an unset field or a failed encoding produces
            return Err(EscrowError::MalformedImmutables("hashlock is all zeroes".to_string()));
        }
        self.timelocks.validate()
    }

    pub fn contract_id<H: HashFunction + ?Sized>(&self, hasher: &H) -> ContractId {
        derive_contract_id(self, hasher)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowState {
    Uninitialized,
    Active,
    Withdrawn,
    Refunded,
}

impl EscrowState {
    pub fn is_settled(&self) -> bool {
        matches!(self, EscrowState::Withdrawn | EscrowState::Refunded)
    }
}

// Read-only view of one escrow, as returned by the chain adapter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSnapshot {
    pub contract_id: ContractId,
    pub immutables: EscrowImmutables,
    pub state: EscrowState,
    pub deployed_at: Timestamp,
    pub revealed_preimage: Option<Preimage>,
}

impl EscrowSnapshot {
    pub fn stage_at(&self, now: Timestamp) -> TimelockStage {
        self.immutables.timelocks.stage_at(self.deployed_at, now)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementKind {
    Withdrawn,
    Refunded,
}

/// Fund movements performed by one terminal transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub contract_id: ContractId,
    pub kind: SettlementKind,
    pub beneficiary: Address,
    pub token: TokenId,
    pub amount: Amount,
    pub deposit_recipient: Address,
    pub safety_deposit: Amount,
    pub settled_at: Timestamp,
}
