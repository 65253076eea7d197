// HTLC escrow engine for one chain.
//
// One state machine per contract id: Uninitialized -> Active -> {Withdrawn | Refunded}.
// Every operation validates fully before touching state or balances, so a
// failed call leaves no partial effect behind. Callers that share an engine
// across tasks must serialize access (the chain simulator wraps it in a mutex).

use super::error::EscrowError;
use super::types::{
    EscrowImmutables, EscrowSnapshot, EscrowState, Settlement, SettlementKind,
};
use crate::data_structures::{Address, Amount, ChainId, Timestamp, TokenId};
use crate::identity::{ContractId, HashScheme, Preimage};
use log::{debug, info, warn};
use std::collections::HashMap;

#[derive(Clone, Debug)]
struct EscrowRecord {
    immutables: EscrowImmutables,
    state: EscrowState,
    deployed_at: Timestamp,
    revealed_preimage: Option<Preimage>,
}

#[derive(Clone, Debug)]
pub struct EscrowEngine {
    chain_id: ChainId,
    // The hash this chain's escrow verifies with; also used for contract ids
    hash_scheme: HashScheme,
    escrows: HashMap<ContractId, EscrowRecord>,
    // Spendable balances outside of any escrow: (account, token) -> amount
    balances: HashMap<(Address, TokenId), Amount>,
}

impl EscrowEngine {
    pub fn new(chain_id: ChainId, hash_scheme: HashScheme) -> Self {
        EscrowEngine {
            chain_id,
            hash_scheme,
            escrows: HashMap::new(),
            balances: HashMap::new(),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn hash_scheme(&self) -> HashScheme {
        self.hash_scheme
    }

    /// Credits an account from outside the escrow system (faucet, bridge-in, test setup).
    pub fn deposit(&mut self, account: Address, token: TokenId, amount: Amount) {
        let balance = self.balances.entry((account, token)).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, account: &Address, token: &TokenId) -> Amount {
        self.balances.get(&(*account, *token)).copied().unwrap_or(0)
    }

    /// Total of `token` currently held by active escrows (amounts plus native deposits).
    pub fn escrowed_total(&self, token: &TokenId) -> Amount {
        self.escrows
            .values()
            .filter(|r| r.state == EscrowState::Active)
            .fold(0, |mut held: Amount, r| {
                if r.immutables.token == *token {
                    held = held.saturating_add(r.immutables.amount);
                }
                if token.is_native() {
                    held = held.saturating_add(r.immutables.safety_deposit);
                }
                held
            })
    }

    pub fn contract_id_for(&self, immutables: &EscrowImmutables) -> ContractId {
        immutables.contract_id(&self.hash_scheme.algorithm)
    }

    pub fn state_of(&self, contract_id: &ContractId) -> EscrowState {
        self.escrows
            .get(contract_id)
            .map(|r| r.state)
            .unwrap_or(EscrowState::Uninitialized)
    }

    pub fn snapshot(&self, contract_id: &ContractId) -> Option<EscrowSnapshot> {
        self.escrows.get(contract_id).map(|r| EscrowSnapshot {
            contract_id: *contract_id,
            immutables: r.immutables,
            state: r.state,
            deployed_at: r.deployed_at,
            revealed_preimage: r.revealed_preimage,
        })
    }

    pub fn escrow_count(&self) -> usize {
        self.escrows.len()
    }

    /// Locks `amount` of `token` plus the native `safety_deposit` from the maker
    /// and activates the escrow at `now`.
    pub fn create(
        &mut self,
        immutables: EscrowImmutables,
        now: Timestamp,
    ) -> Result<ContractId, EscrowError> {
        immutables.validate()?;
        let contract_id = self.contract_id_for(&immutables);

        if let Some(existing) = self.escrows.get(&contract_id) {
            if existing.immutables == immutables {
                debug!("[EscrowEngine chain {}] Duplicate create for {}", self.chain_id, contract_id);
                return Err(EscrowError::DuplicateEscrow(contract_id));
            }
            warn!(
                "[EscrowEngine chain {}] Contract id {} already bound to different immutables",
                self.chain_id, contract_id
            );
            return Err(EscrowError::HashCollision(contract_id));
        }

        // Check every requirement before debiting anything
        let requirements = Self::funding_requirements(&immutables)?;
        for (token, required) in &requirements {
            let available = self.balance_of(&immutables.maker, token);
            if available < *required {
                return Err(EscrowError::InsufficientFunds {
                    token: *token,
                    required: *required,
                    available,
                });
            }
        }
        for (token, required) in requirements {
            self.debit(immutables.maker, token, required);
        }

        self.escrows.insert(
            contract_id,
            EscrowRecord {
                immutables,
                state: EscrowState::Active,
                deployed_at: now,
                revealed_preimage: None,
            },
        );
        info!(
            "[EscrowEngine chain {}] Created escrow {} ({} {} from {}, deposit {}) at {}",
            self.chain_id,
            contract_id,
            immutables.amount,
            immutables.token,
            immutables.maker,
            immutables.safety_deposit,
            now
        );
        Ok(contract_id)
    }

    /// Releases the escrow to the taker against the secret.
    ///
    /// The taker may call from `withdrawal_delay`; anyone may call from
    /// `public_withdrawal_delay`. Both windows close at `cancellation_delay`.
    /// The caller collects the safety deposit.
    pub fn withdraw(
        &mut self,
        contract_id: &ContractId,
        preimage: &Preimage,
        caller: &Address,
        now: Timestamp,
    ) -> Result<Settlement, EscrowError> {
        let record = self.active_record(contract_id)?;
        let immutables = record.immutables;
        let timelocks = immutables.timelocks;
        let deployed_at = record.deployed_at;

        let closed_at = timelocks.cancellation_start(deployed_at);
        if now >= closed_at {
            return Err(EscrowError::WithdrawalWindowClosed { contract_id: *contract_id, closed_at });
        }
        let opens_at = if *caller == immutables.taker {
            timelocks.withdrawal_start(deployed_at)
        } else {
            timelocks.public_withdrawal_start(deployed_at)
        };
        if now < opens_at {
            return Err(EscrowError::NotYetWithdrawable { contract_id: *contract_id, opens_at });
        }
        if !self.hash_scheme.verify_preimage(preimage, &immutables.hashlock) {
            debug!("[EscrowEngine chain {}] Wrong preimage for {}", self.chain_id, contract_id);
            return Err(EscrowError::WrongPreimage(*contract_id));
        }

        self.credit(immutables.taker, immutables.token, immutables.amount);
        self.credit(*caller, TokenId::NATIVE, immutables.safety_deposit);
        if let Some(record) = self.escrows.get_mut(contract_id) {
            record.state = EscrowState::Withdrawn;
            record.revealed_preimage = Some(*preimage);
        }

        info!(
            "[EscrowEngine chain {}] Withdrawn {}: {} {} to {}, deposit {} to {}",
            self.chain_id,
            contract_id,
            immutables.amount,
            immutables.token,
            immutables.taker,
            immutables.safety_deposit,
            caller
        );
        Ok(Settlement {
            contract_id: *contract_id,
            kind: SettlementKind::Withdrawn,
            beneficiary: immutables.taker,
            token: immutables.token,
            amount: immutables.amount,
            deposit_recipient: *caller,
            safety_deposit: immutables.safety_deposit,
            settled_at: now,
        })
    }

    /// Returns the locked amount to the maker once the cancellation timelock
    /// has passed (for anyone else, once the public cancellation timelock has).
    /// The caller collects the safety deposit.
    pub fn refund(
        &mut self,
        contract_id: &ContractId,
        caller: &Address,
        now: Timestamp,
    ) -> Result<Settlement, EscrowError> {
        let record = self.active_record(contract_id)?;
        let immutables = record.immutables;
        let timelocks = immutables.timelocks;

        let expires_at = if *caller == immutables.maker {
            timelocks.cancellation_start(record.deployed_at)
        } else {
            timelocks.public_cancellation_start(record.deployed_at)
        };
        if now < expires_at {
            return Err(EscrowError::TimelockNotExpired { contract_id: *contract_id, expires_at });
        }

        self.credit(immutables.maker, immutables.token, immutables.amount);
        self.credit(*caller, TokenId::NATIVE, immutables.safety_deposit);
        if let Some(record) = self.escrows.get_mut(contract_id) {
            record.state = EscrowState::Refunded;
        }

        info!(
            "[EscrowEngine chain {}] Refunded {}: {} {} to {}, deposit {} to {}",
            self.chain_id,
            contract_id,
            immutables.amount,
            immutables.token,
            immutables.maker,
            immutables.safety_deposit,
            caller
        );
        Ok(Settlement {
            contract_id: *contract_id,
            kind: SettlementKind::Refunded,
            beneficiary: immutables.maker,
            token: immutables.token,
            amount: immutables.amount,
            deposit_recipient: *caller,
            safety_deposit: immutables.safety_deposit,
            settled_at: now,
        })
    }

    fn active_record(&self, contract_id: &ContractId) -> Result<&EscrowRecord, EscrowError> {
        let record = self
            .escrows
            .get(contract_id)
            .ok_or(EscrowError::EscrowNotFound(*contract_id))?;
        if record.state != EscrowState::Active {
            return Err(EscrowError::AlreadySettled { contract_id: *contract_id, state: record.state });
        }
        Ok(record)
    }

    // Per-token totals the maker must cover at creation
    fn funding_requirements(
        immutables: &EscrowImmutables,
    ) -> Result<Vec<(TokenId, Amount)>, EscrowError> {
        if immutables.token.is_native() {
            let total = immutables
                .amount
                .checked_add(immutables.safety_deposit)
                .ok_or_else(|| EscrowError::MalformedImmutables("amount overflow".to_string()))?;
            return Ok(vec![(TokenId::NATIVE, total)]);
        }
        let mut requirements = vec![(immutables.token, immutables.amount)];
        if immutables.safety_deposit > 0 {
            requirements.push((TokenId::NATIVE, immutables.safety_deposit));
        }
        Ok(requirements)
    }

    fn debit(&mut self, account: Address, token: TokenId, amount: Amount) {
        let balance = self.balances.entry((account, token)).or_insert(0);
        *balance = balance.saturating_sub(amount);
    }

    fn credit(&mut self, account: Address, token: TokenId, amount: Amount) {
        if amount == 0 {
            return;
        }
        let balance = self.balances.entry((account, token)).or_insert(0);
        *balance = balance.saturating_add(amount);
    }
}
