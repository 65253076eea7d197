// Calls that can be made to a chain's HTLC escrow contract, and their effects

use crate::data_structures::{Address, ChainId, Timestamp};
use crate::escrow::{EscrowEngine, EscrowError, EscrowImmutables, Settlement};
use crate::identity::{ContractId, Preimage};
use crate::onchain::interface::TxHandle;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscrowCall {
    // Maker locks funds under the hashlock
    Create {
        chain_id: ChainId,
        immutables: EscrowImmutables,
    },
    // Releases funds to the taker; `caller` collects the safety deposit
    Withdraw {
        chain_id: ChainId,
        contract_id: ContractId,
        preimage: Preimage,
        caller: Address,
    },
    // Returns funds to the maker after the cancellation timelock
    Refund {
        chain_id: ChainId,
        contract_id: ContractId,
        caller: Address,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallEffect {
    Created(ContractId),
    Settled(Settlement),
}

// Outcome of an included call, kept by the chain per transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallReceipt {
    pub tx: TxHandle,
    pub call: EscrowCall,
    pub block_number: u64,
    pub executed_at: Timestamp,
    pub result: Result<CallEffect, EscrowError>,
}

impl EscrowCall {
    pub fn chain_id(&self) -> ChainId {
        match self {
            EscrowCall::Create { chain_id, .. } => *chain_id,
            EscrowCall::Withdraw { chain_id, .. } => *chain_id,
            EscrowCall::Refund { chain_id, .. } => *chain_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EscrowCall::Create { .. } => "create",
            EscrowCall::Withdraw { .. } => "withdraw",
            EscrowCall::Refund { .. } => "refund",
        }
    }

    /// Escrow the call acts on. For creation this is derived with the engine's hash.
    pub fn contract_id(&self, engine: &EscrowEngine) -> ContractId {
        match self {
            EscrowCall::Create { immutables, .. } => engine.contract_id_for(immutables),
            EscrowCall::Withdraw { contract_id, .. } => *contract_id,
            EscrowCall::Refund { contract_id, .. } => *contract_id,
        }
    }

    // Executes the call against the escrow engine at chain time `now`
    pub fn apply(&self, engine: &mut EscrowEngine, now: Timestamp) -> Result<CallEffect, EscrowError> {
        match self {
            EscrowCall::Create { immutables, .. } => {
                engine.create(*immutables, now).map(CallEffect::Created)
            }
            EscrowCall::Withdraw { contract_id, preimage, caller, .. } => engine
                .withdraw(contract_id, preimage, caller, now)
                .map(CallEffect::Settled),
            EscrowCall::Refund { contract_id, caller, .. } => {
                engine.refund(contract_id, caller, now).map(CallEffect::Settled)
            }
        }
    }
}
