// Types for two-leg HTLC swaps driven by the coordinator

use crate::data_structures::{Address, Amount, ChainId, Timestamp, TokenId};
use crate::escrow::{EscrowError, EscrowImmutables, EscrowState, Timelocks};
use crate::identity::{ContractId, HashScheme, OrderHash, Preimage};
use crate::onchain::TxHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// Both legs share the order hash, so it doubles as the order id
pub type SwapOrderId = OrderHash;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegRole {
    /// Locks first, with the longer cancellation timelock.
    Source,
    /// Locks second; withdrawing it reveals the secret.
    Destination,
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegRole::Source => f.write_str("source"),
            LegRole::Destination => f.write_str("destination"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapStatus {
    Pending,
    SourceLocked,
    BothLocked,
    SecretRevealed,
    Completed,
    PartiallyFailed,
    Refunded,
}

impl SwapStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Completed | SwapStatus::PartiallyFailed | SwapStatus::Refunded)
    }
}

// Coordinator's view of one leg, synced from chain snapshots
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegStatus {
    NotCreated,
    Active,
    Withdrawn,
    Refunded,
    /// Retries exhausted or the chain rejected a call outright. Needs an operator.
    Stuck { reason: String },
}

impl LegStatus {
    pub fn from_state(state: EscrowState) -> Self {
        match state {
            EscrowState::Uninitialized => LegStatus::NotCreated,
            EscrowState::Active => LegStatus::Active,
            EscrowState::Withdrawn => LegStatus::Withdrawn,
            EscrowState::Refunded => LegStatus::Refunded,
        }
    }
}

/// Per-chain parameters of one leg. `maker` funds the escrow, `taker` receives it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegParams {
    pub chain_id: ChainId,
    pub maker: Address,
    pub taker: Address,
    pub token: TokenId,
    pub amount: Amount,
    pub safety_deposit: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLeg {
    pub role: LegRole,
    pub chain_id: ChainId,
    pub hash_scheme: HashScheme,
    pub immutables: EscrowImmutables,
    pub contract_id: ContractId,
    pub status: LegStatus,
    // Read from the leg's own chain once the escrow is visible
    pub deployed_at: Option<Timestamp>,
    pub last_tx: Option<TxHandle>,
}

impl SwapLeg {
    pub fn is_active(&self) -> bool {
        self.status == LegStatus::Active
    }

    pub fn is_stuck(&self) -> bool {
        matches!(self.status, LegStatus::Stuck { .. })
    }
}

/// What a caller sees for one leg: never folded into a single success flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegOutcome {
    NotCreated,
    InProgress,
    Succeeded,
    Refunded,
    Stuck(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegReport {
    pub role: LegRole,
    pub chain_id: ChainId,
    pub contract_id: ContractId,
    pub outcome: LegOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOrder {
    pub id: SwapOrderId,
    pub preimage: Preimage,
    pub source_leg: SwapLeg,
    pub destination_leg: SwapLeg,
    pub status: SwapStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapOrder {
    pub fn leg(&self, role: LegRole) -> &SwapLeg {
        match role {
            LegRole::Source => &self.source_leg,
            LegRole::Destination => &self.destination_leg,
        }
    }

    pub fn leg_mut(&mut self, role: LegRole) -> &mut SwapLeg {
        match role {
            LegRole::Source => &mut self.source_leg,
            LegRole::Destination => &mut self.destination_leg,
        }
    }

    pub fn has_active_legs(&self) -> bool {
        self.source_leg.is_active() || self.destination_leg.is_active()
    }

    pub fn has_stuck_legs(&self) -> bool {
        self.source_leg.is_stuck() || self.destination_leg.is_stuck()
    }

    /// Terminal status and nothing left on-chain for the coordinator to move.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal() && !self.has_active_legs()
    }

    pub fn leg_reports(&self) -> [LegReport; 2] {
        [report(&self.source_leg), report(&self.destination_leg)]
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn report(leg: &SwapLeg) -> LegReport {
    let outcome = match &leg.status {
        LegStatus::NotCreated => LegOutcome::NotCreated,
        LegStatus::Active => LegOutcome::InProgress,
        LegStatus::Withdrawn => LegOutcome::Succeeded,
        LegStatus::Refunded => LegOutcome::Refunded,
        LegStatus::Stuck { reason } => LegOutcome::Stuck(reason.clone()),
    };
    LegReport { role: leg.role, chain_id: leg.chain_id, contract_id: leg.contract_id, outcome }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid {role} timelocks: {source}")]
    InvalidLeg { role: LegRole, source: EscrowError },

    #[error(
        "Destination cancellation {destination_cancellation}s plus margin {margin}s exceeds source cancellation {source_cancellation}s"
    )]
    InsufficientMargin { source_cancellation: u64, destination_cancellation: u64, margin: u64 },
}

/// Timelocks for both legs of a swap.
///
/// The destination must cancel strictly earlier than the source, by at least
/// the configured margin, so a secret revealed on the destination leaves time
/// to claim the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockPolicy {
    pub source: Timelocks,
    pub destination: Timelocks,
}

impl TimelockPolicy {
    pub fn validate(&self, margin_secs: u64) -> Result<(), PolicyError> {
        self.source
            .validate()
            .map_err(|source| PolicyError::InvalidLeg { role: LegRole::Source, source })?;
        self.destination
            .validate()
            .map_err(|source| PolicyError::InvalidLeg { role: LegRole::Destination, source })?;

        let required = self.destination.cancellation_delay.saturating_add(margin_secs.max(1));
        if required > self.source.cancellation_delay {
            return Err(PolicyError::InsufficientMargin {
                source_cancellation: self.source.cancellation_delay,
                destination_cancellation: self.destination.cancellation_delay,
                margin: margin_secs,
            });
        }
        Ok(())
    }
}
