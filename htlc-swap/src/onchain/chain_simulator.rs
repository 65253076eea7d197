// In-process chain hosting one escrow engine.
//
// Submitted calls wait in a mempool and execute once their block is final
// (`finality_delay` blocks after submission). The chain clock only moves
// when a test or driver moves it, so timelock scenarios are deterministic.

use crate::data_structures::{Address, Amount, ChainId, Timestamp, TokenId};
use crate::escrow::{EscrowEngine, EscrowError, EscrowImmutables, EscrowSnapshot, EscrowState};
use crate::identity::{ContractId, HashScheme, Preimage};
use crate::onchain::escrow_contract::{CallReceipt, EscrowCall};
use crate::onchain::interface::{ChainAdapter, ChainError, FinalityStatus, TxHandle};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const FINALITY_POLL_INTERVAL: Duration = Duration::from_millis(10);

// Who signs withdraw and refund transactions sent through the adapter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignerPolicy {
    /// Withdrawals are sent by the taker, refunds by the maker.
    Delegated,
    /// Every call is sent from one account, e.g. a relayer using the public windows.
    Fixed(Address),
}

/// Injected failures, each consumed one at a time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Submissions rejected before reaching the mempool.
    pub unavailable_submissions: u32,
    /// Submissions that reach the mempool but whose response is lost.
    pub ambiguous_submissions: u32,
    /// Finality queries answered `Pending` even though the call executed.
    pub lost_confirmations: u32,
    /// Failed escrow state and clock reads.
    pub unavailable_reads: u32,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub finalized_calls: Vec<TxHandle>,
}

#[derive(Debug)]
struct ChainState {
    now: Timestamp,
    current_block_number: u64,
    blocks: Vec<Block>,
    finality_delay: u64,
    // (block_number_added, tx, call)
    pending_calls: Vec<(u64, TxHandle, EscrowCall)>,
    engine: EscrowEngine,
    receipts: HashMap<TxHandle, CallReceipt>,
    submitted: Vec<EscrowCall>,
    next_tx: u64,
    signer: SignerPolicy,
    faults: FaultPlan,
    auto_mine: bool,
}

impl ChainState {
    fn enqueue(&mut self, chain_id: ChainId, call: EscrowCall) -> TxHandle {
        self.next_tx += 1;
        let tx = TxHandle(format!("0x{:x}{:08x}", chain_id, self.next_tx));
        debug!("[SimulatedChain {}] Accepted {} as {}", chain_id, call.name(), tx);
        self.submitted.push(call.clone());
        self.pending_calls.push((self.current_block_number, tx.clone(), call));
        tx
    }

    fn mine_block(&mut self, chain_id: ChainId) -> u64 {
        self.current_block_number += 1;
        let finalized_block_cutoff = self.current_block_number.saturating_sub(self.finality_delay);

        let (finalized_now, still_pending): (Vec<_>, Vec<_>) = self
            .pending_calls
            .drain(..)
            .partition(|(block_added, _, _)| *block_added < finalized_block_cutoff);
        self.pending_calls = still_pending;

        let mut finalized_calls = Vec::with_capacity(finalized_now.len());
        for (_block_added, tx, call) in finalized_now {
            let result = call.apply(&mut self.engine, self.now);
            match &result {
                Ok(_) => debug!(
                    "[SimulatedChain {}] Block {}: {} {} succeeded",
                    chain_id, self.current_block_number, call.name(), tx
                ),
                Err(e) => info!(
                    "[SimulatedChain {}] Block {}: {} {} reverted: {}",
                    chain_id, self.current_block_number, call.name(), tx, e
                ),
            }
            self.receipts.insert(
                tx.clone(),
                CallReceipt {
                    tx: tx.clone(),
                    call,
                    block_number: self.current_block_number,
                    executed_at: self.now,
                    result,
                },
            );
            finalized_calls.push(tx);
        }

        self.blocks.push(Block {
            block_number: self.current_block_number,
            timestamp: self.now,
            finalized_calls,
        });
        self.current_block_number
    }

    fn is_known(&self, tx: &TxHandle) -> bool {
        self.receipts.contains_key(tx) || self.pending_calls.iter().any(|(_, t, _)| t == tx)
    }

    fn take_read_fault(&mut self, chain_id: ChainId) -> Result<(), ChainError> {
        if self.faults.unavailable_reads > 0 {
            self.faults.unavailable_reads -= 1;
            return Err(ChainError::Unavailable { chain_id, reason: "read timed out".to_string() });
        }
        Ok(())
    }
}

pub struct SimulatedChain {
    chain_id: ChainId,
    hash_scheme: HashScheme,
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    /// Starts at time 0, block 0, auto-mining on every finality query.
    pub fn new(chain_id: ChainId, hash_scheme: HashScheme, finality_delay: u64) -> Self {
        SimulatedChain {
            chain_id,
            hash_scheme,
            state: Mutex::new(ChainState {
                now: 0,
                current_block_number: 0,
                blocks: Vec::new(),
                finality_delay,
                pending_calls: Vec::new(),
                engine: EscrowEngine::new(chain_id, hash_scheme),
                receipts: HashMap::new(),
                submitted: Vec::new(),
                next_tx: 0,
                signer: SignerPolicy::Delegated,
                faults: FaultPlan::default(),
                auto_mine: true,
            }),
        }
    }

    pub fn with_signer(self, signer: SignerPolicy) -> Self {
        self.set_signer(signer);
        self
    }

    pub fn set_signer(&self, signer: SignerPolicy) {
        self.state().signer = signer;
    }

    // A panic while holding the lock leaves the state consistent, so poisoning is ignored
    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_time(&self, now: Timestamp) {
        self.state().now = now;
    }

    pub fn advance_time(&self, seconds: u64) -> Timestamp {
        let mut state = self.state();
        state.now = state.now.saturating_add(seconds);
        state.now
    }

    pub fn now(&self) -> Timestamp {
        self.state().now
    }

    pub fn set_auto_mine(&self, auto_mine: bool) {
        self.state().auto_mine = auto_mine;
    }

    pub fn inject_faults(&self, faults: FaultPlan) {
        self.state().faults = faults;
    }

    pub fn remaining_faults(&self) -> FaultPlan {
        self.state().faults.clone()
    }

    pub fn mine_block(&self) -> u64 {
        self.state().mine_block(self.chain_id)
    }

    pub fn block_number(&self) -> u64 {
        self.state().current_block_number
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.state().blocks.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending_calls.len()
    }

    pub fn deposit(&self, account: Address, token: TokenId, amount: Amount) {
        self.state().engine.deposit(account, token, amount);
    }

    pub fn balance_of(&self, account: &Address, token: &TokenId) -> Amount {
        self.state().engine.balance_of(account, token)
    }

    pub fn escrowed_total(&self, token: &TokenId) -> Amount {
        self.state().engine.escrowed_total(token)
    }

    pub fn escrow_state(&self, contract_id: &ContractId) -> EscrowState {
        self.state().engine.state_of(contract_id)
    }

    pub fn snapshot(&self, contract_id: &ContractId) -> Option<EscrowSnapshot> {
        self.state().engine.snapshot(contract_id)
    }

    // Every call that reached the mempool, in order
    pub fn submitted_calls(&self) -> Vec<EscrowCall> {
        self.state().submitted.clone()
    }

    pub fn receipt(&self, tx: &TxHandle) -> Option<CallReceipt> {
        self.state().receipts.get(tx).cloned()
    }

    /// Submits an arbitrary call, e.g. a third party using a public window.
    ///
    /// The call is dry-run against current state first; a call that would
    /// revert right now is rejected without entering the mempool.
    pub fn submit_call(&self, call: EscrowCall) -> Result<TxHandle, ChainError> {
        if call.chain_id() != self.chain_id {
            return Err(ChainError::WrongChain { expected: call.chain_id(), actual: self.chain_id });
        }
        let mut state = self.state();
        if state.faults.unavailable_submissions > 0 {
            state.faults.unavailable_submissions -= 1;
            warn!("[SimulatedChain {}] Dropping {} submission (injected)", self.chain_id, call.name());
            return Err(ChainError::Unavailable {
                chain_id: self.chain_id,
                reason: "connection refused".to_string(),
            });
        }

        let mut preview = state.engine.clone();
        call.apply(&mut preview, state.now)?;

        let tx = state.enqueue(self.chain_id, call);
        if state.faults.ambiguous_submissions > 0 {
            state.faults.ambiguous_submissions -= 1;
            warn!("[SimulatedChain {}] Losing response for {} (injected)", self.chain_id, tx);
            return Err(ChainError::Unavailable {
                chain_id: self.chain_id,
                reason: "response lost".to_string(),
            });
        }
        Ok(tx)
    }

    fn signer_for(&self, contract_id: &ContractId, withdrawing: bool) -> Result<Address, ChainError> {
        let state = self.state();
        match state.signer {
            SignerPolicy::Fixed(address) => Ok(address),
            SignerPolicy::Delegated => {
                let snapshot = state
                    .engine
                    .snapshot(contract_id)
                    .ok_or(EscrowError::EscrowNotFound(*contract_id))?;
                Ok(if withdrawing { snapshot.immutables.taker } else { snapshot.immutables.maker })
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn hash_scheme(&self) -> HashScheme {
        self.hash_scheme
    }

    async fn submit_create(&self, immutables: &EscrowImmutables) -> Result<TxHandle, ChainError> {
        self.submit_call(EscrowCall::Create { chain_id: self.chain_id, immutables: *immutables })
    }

    async fn submit_withdraw(
        &self,
        contract_id: ContractId,
        preimage: &Preimage,
    ) -> Result<TxHandle, ChainError> {
        let caller = self.signer_for(&contract_id, true)?;
        self.submit_call(EscrowCall::Withdraw {
            chain_id: self.chain_id,
            contract_id,
            preimage: *preimage,
            caller,
        })
    }

    async fn submit_refund(&self, contract_id: ContractId) -> Result<TxHandle, ChainError> {
        let caller = self.signer_for(&contract_id, false)?;
        self.submit_call(EscrowCall::Refund { chain_id: self.chain_id, contract_id, caller })
    }

    async fn get_escrow_state(
        &self,
        contract_id: ContractId,
    ) -> Result<Option<EscrowSnapshot>, ChainError> {
        let mut state = self.state();
        state.take_read_fault(self.chain_id)?;
        Ok(state.engine.snapshot(&contract_id))
    }

    async fn await_finality(
        &self,
        tx: &TxHandle,
        timeout: Duration,
    ) -> Result<FinalityStatus, ChainError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state();
                if !state.is_known(tx) {
                    return Err(ChainError::UnknownTransaction(tx.clone()));
                }
                if state.auto_mine {
                    // A pending call is final after at most finality_delay + 1 blocks
                    for _ in 0..=state.finality_delay {
                        if state.receipts.contains_key(tx) {
                            break;
                        }
                        state.mine_block(self.chain_id);
                    }
                }
                if let Some(receipt) = state.receipts.get(tx) {
                    let status = match &receipt.result {
                        Ok(_) => FinalityStatus::Confirmed,
                        Err(e) => FinalityStatus::Failed(e.clone()),
                    };
                    if state.faults.lost_confirmations > 0 {
                        state.faults.lost_confirmations -= 1;
                        warn!("[SimulatedChain {}] Losing confirmation of {} (injected)", self.chain_id, tx);
                        return Ok(FinalityStatus::Pending);
                    }
                    return Ok(status);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(FinalityStatus::Pending);
            }
            tokio::time::sleep(FINALITY_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn current_chain_time(&self) -> Result<Timestamp, ChainError> {
        let mut state = self.state();
        state.take_read_fault(self.chain_id)?;
        Ok(state.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::Timelocks;
    use crate::identity::{HashAlgorithm, OrderHash, PreimageEncoding};

    const MAKER: Address = Address::new([0xA1; 32]);
    const TAKER: Address = Address::new([0xB2; 32]);
    const RELAYER: Address = Address::new([0xC3; 32]);
    const SECRET: Preimage = Preimage::new([0x77; 32]);

    fn scheme() -> HashScheme {
        HashScheme::new(HashAlgorithm::Keccak256, PreimageEncoding::AbiString)
    }

    fn funded_chain(finality_delay: u64) -> SimulatedChain {
        let chain = SimulatedChain::new(7, scheme(), finality_delay);
        chain.deposit(MAKER, TokenId::NATIVE, 1_000);
        chain
    }

    fn immutables() -> EscrowImmutables {
        EscrowImmutables {
            order_hash: OrderHash::new([0x0D; 32]),
            hashlock: scheme().hashlock(&SECRET),
            maker: MAKER,
            taker: TAKER,
            token: TokenId::NATIVE,
            amount: 400,
            safety_deposit: 20,
            timelocks: Timelocks::new(10, 100, 200, 300).unwrap(),
        }
    }

    #[test]
    fn calls_execute_only_once_final() {
        let chain = SimulatedChain::new(7, scheme(), 2);
        chain.deposit(MAKER, TokenId::NATIVE, 1_000);
        let tx = chain.submit_call(EscrowCall::Create { chain_id: 7, immutables: immutables() }).unwrap();
        let id = immutables().contract_id(&HashAlgorithm::Keccak256);

        chain.mine_block();
        chain.mine_block();
        assert_eq!(chain.escrow_state(&id), EscrowState::Uninitialized);
        assert!(chain.receipt(&tx).is_none());
        assert_eq!(chain.pending_count(), 1);

        chain.mine_block();
        assert_eq!(chain.escrow_state(&id), EscrowState::Active);
        let receipt = chain.receipt(&tx).unwrap();
        assert_eq!(receipt.block_number, 3);
        assert_eq!(chain.blocks()[2].finalized_calls, vec![tx]);
        assert_eq!(chain.balance_of(&MAKER, &TokenId::NATIVE), 580);
    }

    #[test]
    fn wrong_chain_and_dry_run_rejections() {
        let chain = funded_chain(0);
        let foreign = EscrowCall::Create { chain_id: 8, immutables: immutables() };
        assert_eq!(
            chain.submit_call(foreign),
            Err(ChainError::WrongChain { expected: 8, actual: 7 })
        );

        let zero = EscrowImmutables { amount: 0, ..immutables() };
        assert_eq!(
            chain.submit_call(EscrowCall::Create { chain_id: 7, immutables: zero }),
            Err(ChainError::Rejected(EscrowError::InvalidAmount))
        );
        assert!(chain.submitted_calls().is_empty());
    }

    #[tokio::test]
    async fn adapter_flow_with_delegated_signer() {
        let chain = funded_chain(1);
        let tx = chain.submit_create(&immutables()).await.unwrap();
        let status = chain.await_finality(&tx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(status, FinalityStatus::Confirmed);

        let id = immutables().contract_id(&HashAlgorithm::Keccak256);
        let snapshot = chain.get_escrow_state(id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, EscrowState::Active);
        assert_eq!(snapshot.deployed_at, 0);

        // Taker window not open yet
        assert!(matches!(
            chain.submit_withdraw(id, &SECRET).await,
            Err(ChainError::Rejected(EscrowError::NotYetWithdrawable { opens_at: 10, .. }))
        ));

        chain.set_time(50);
        let tx = chain.submit_withdraw(id, &SECRET).await.unwrap();
        assert_eq!(
            chain.await_finality(&tx, Duration::from_secs(1)).await.unwrap(),
            FinalityStatus::Confirmed
        );
        assert_eq!(chain.balance_of(&TAKER, &TokenId::NATIVE), 420);
        let snapshot = chain.get_escrow_state(id).await.unwrap().unwrap();
        assert_eq!(snapshot.revealed_preimage, Some(SECRET));
    }

    #[tokio::test]
    async fn reverted_call_reports_failure() {
        let chain = funded_chain(0);
        let id = immutables().contract_id(&HashAlgorithm::Keccak256);
        let tx = chain.submit_create(&immutables()).await.unwrap();
        chain.await_finality(&tx, Duration::from_secs(1)).await.unwrap();

        chain.set_time(200);
        // Both refunds pass the dry run; the second reverts on inclusion
        let first = chain.submit_refund(id).await.unwrap();
        let second = chain.submit_refund(id).await.unwrap();
        assert_eq!(
            chain.await_finality(&first, Duration::from_secs(1)).await.unwrap(),
            FinalityStatus::Confirmed
        );
        assert_eq!(
            chain.await_finality(&second, Duration::from_secs(1)).await.unwrap(),
            FinalityStatus::Failed(EscrowError::AlreadySettled {
                contract_id: id,
                state: EscrowState::Refunded
            })
        );
        assert_eq!(chain.balance_of(&MAKER, &TokenId::NATIVE), 1_000);
    }

    #[tokio::test]
    async fn fixed_signer_collects_public_deposit() {
        let chain = funded_chain(0).with_signer(SignerPolicy::Fixed(RELAYER));
        let id = immutables().contract_id(&HashAlgorithm::Keccak256);
        let tx = chain.submit_create(&immutables()).await.unwrap();
        chain.await_finality(&tx, Duration::from_secs(1)).await.unwrap();

        chain.set_time(50);
        assert!(matches!(
            chain.submit_withdraw(id, &SECRET).await,
            Err(ChainError::Rejected(EscrowError::NotYetWithdrawable { opens_at: 100, .. }))
        ));
        chain.set_time(100);
        let tx = chain.submit_withdraw(id, &SECRET).await.unwrap();
        chain.await_finality(&tx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(chain.balance_of(&TAKER, &TokenId::NATIVE), 400);
        assert_eq!(chain.balance_of(&RELAYER, &TokenId::NATIVE), 20);
    }

    #[tokio::test]
    async fn injected_faults() {
        let chain = funded_chain(0);
        chain.inject_faults(FaultPlan {
            unavailable_submissions: 1,
            ambiguous_submissions: 1,
            lost_confirmations: 1,
            unavailable_reads: 1,
        });

        let refused = chain.submit_create(&immutables()).await;
        assert!(matches!(refused, Err(ChainError::Unavailable { .. })));
        assert!(chain.submitted_calls().is_empty());

        // Response lost, but the call is in the mempool
        let lost = chain.submit_create(&immutables()).await;
        assert!(matches!(lost, Err(ChainError::Unavailable { .. })));
        assert_eq!(chain.submitted_calls().len(), 1);
        chain.mine_block();

        assert!(chain.current_chain_time().await.is_err());
        assert_eq!(chain.current_chain_time().await, Ok(0));

        let id = immutables().contract_id(&HashAlgorithm::Keccak256);
        assert_eq!(chain.escrow_state(&id), EscrowState::Active);
        assert_eq!(chain.remaining_faults().lost_confirmations, 1);
        assert_eq!(chain.remaining_faults().unavailable_reads, 0);
    }

    #[tokio::test]
    async fn lost_confirmation_reports_pending_once() {
        let chain = funded_chain(0);
        chain.inject_faults(FaultPlan { lost_confirmations: 1, ..FaultPlan::default() });
        let tx = chain.submit_create(&immutables()).await.unwrap();
        assert_eq!(
            chain.await_finality(&tx, Duration::from_millis(5)).await.unwrap(),
            FinalityStatus::Pending
        );
        let id = immutables().contract_id(&HashAlgorithm::Keccak256);
        assert_eq!(chain.escrow_state(&id), EscrowState::Active);
        assert_eq!(
            chain.await_finality(&tx, Duration::from_millis(5)).await.unwrap(),
            FinalityStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn without_auto_mine_finality_times_out() {
        let chain = funded_chain(0);
        chain.set_auto_mine(false);
        let tx = chain.submit_create(&immutables()).await.unwrap();
        assert_eq!(
            chain.await_finality(&tx, Duration::from_millis(20)).await.unwrap(),
            FinalityStatus::Pending
        );
        chain.mine_block();
        assert_eq!(
            chain.await_finality(&tx, Duration::from_millis(20)).await.unwrap(),
            FinalityStatus::Confirmed
        );
        let unknown = TxHandle("0xdead".to_string());
        assert_eq!(
            chain.await_finality(&unknown, Duration::from_millis(1)).await,
            Err(ChainError::UnknownTransaction(unknown))
        );
    }

    #[tokio::test]
    async fn clock_is_manual() {
        let chain = funded_chain(0);
        assert_eq!(chain.now(), 0);
        assert_eq!(chain.advance_time(30), 30);
        chain.mine_block();
        assert_eq!(chain.current_chain_time().await, Ok(30));
        assert_eq!(chain.block_number(), 1);
        assert_eq!(chain.blocks()[0].timestamp, 30);
    }
}
