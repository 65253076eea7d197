// Swap coordinator: drives one SwapOrder at a time through both chains.
//
// Each `advance` performs at most one protocol step per leg and writes the
// order back to the repository. All timing decisions use the clock of the
// chain the leg lives on; the coordinator's own clock is only used for
// bookkeeping timestamps.

use crate::config::SwapConfig;
use crate::cross_chain::repository::{RepositoryError, SwapRepository};
use crate::cross_chain::types::{
    LegParams, LegRole, LegStatus, PolicyError, SwapLeg, SwapOrder, SwapOrderId, SwapStatus,
    TimelockPolicy,
};
use crate::data_structures::{ChainId, Timestamp};
use crate::escrow::{ErrorClass, EscrowError, EscrowImmutables, EscrowSnapshot, EscrowState, Timelocks};
use crate::identity::{OrderHash, Preimage};
use crate::onchain::{ChainAdapter, ChainError, FinalityStatus, TxHandle};
use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Unknown swap order {0}")]
    UnknownSwap(SwapOrderId),

    #[error("No adapter registered for chain {0}")]
    UnknownChain(ChainId),

    #[error("Unsafe timelock policy: {0}")]
    UnsafeTimelockPolicy(#[from] PolicyError),

    #[error("Invalid {role} leg: {source}")]
    InvalidLeg { role: LegRole, source: EscrowError },

    #[error("Swap order {0} has no leg eligible for refund")]
    NotRefundable(SwapOrderId),

    #[error("Swap order {0} is not settled")]
    NotSettled(SwapOrderId),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for CoordinatorError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => CoordinatorError::UnknownSwap(id),
            other => CoordinatorError::Repository(other),
        }
    }
}

impl CoordinatorError {
    // Worth another `advance` later
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinatorError::Chain(e) if e.is_transient())
    }
}

#[derive(Clone, Copy, Debug)]
enum LegAction {
    Create,
    Withdraw(Preimage),
    Refund,
}

impl LegAction {
    fn name(&self) -> &'static str {
        match self {
            LegAction::Create => "create",
            LegAction::Withdraw(_) => "withdraw",
            LegAction::Refund => "refund",
        }
    }
}

// Result of one escrow call after retries
#[derive(Clone, Debug, PartialEq, Eq)]
enum CallOutcome {
    Applied(TxHandle),
    // Duplicate create or already-settled escrow; the caller re-reads the chain
    AlreadyApplied,
    // Timing error: wait and try again on a later step
    NotReady(EscrowError),
    Rejected(String),
    Exhausted(String),
}

impl CallOutcome {
    fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Rejected(_) | CallOutcome::Exhausted(_))
    }
}

fn classify(err: EscrowError) -> CallOutcome {
    match err.class() {
        ErrorClass::IdempotentConflict => CallOutcome::AlreadyApplied,
        ErrorClass::Timing => CallOutcome::NotReady(err),
        ErrorClass::Integrity | ErrorClass::Verification => CallOutcome::Rejected(err.to_string()),
    }
}

pub struct SwapCoordinator {
    config: SwapConfig,
    chains: HashMap<ChainId, Arc<dyn ChainAdapter>>,
    repository: Arc<dyn SwapRepository>,
    // One async lock per order: at most one outstanding call per leg
    order_locks: Mutex<HashMap<SwapOrderId, Arc<AsyncMutex<()>>>>,
}

impl SwapCoordinator {
    pub fn new(config: SwapConfig, repository: Arc<dyn SwapRepository>) -> Self {
        SwapCoordinator { config, chains: HashMap::new(), repository, order_locks: Mutex::new(HashMap::new()) }
    }

    pub fn register_chain(&mut self, adapter: Arc<dyn ChainAdapter>) {
        let chain_id = adapter.chain_id();
        info!(
            "[SwapCoordinator] Registered chain {} ({:?})",
            chain_id,
            adapter.hash_scheme()
        );
        self.chains.insert(chain_id, adapter);
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    fn chain(&self, chain_id: ChainId) -> Result<Arc<dyn ChainAdapter>, CoordinatorError> {
        self.chains.get(&chain_id).cloned().ok_or(CoordinatorError::UnknownChain(chain_id))
    }

    fn order_lock(&self, id: &SwapOrderId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.order_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(*id).or_default())
    }

    async fn lock_order(&self, id: &SwapOrderId) -> OwnedMutexGuard<()> {
        self.order_lock(id).lock_owned().await
    }

    /// Creates a new order with a fresh secret. Nothing is submitted until the first `advance`.
    ///
    /// Each leg's hashlock is computed from the same secret under that leg's
    /// chain hash scheme. `None` uses the configured default policy.
    pub async fn start_swap(
        &self,
        source: LegParams,
        destination: LegParams,
        timelock_policy: Option<TimelockPolicy>,
    ) -> Result<SwapOrderId, CoordinatorError> {
        let policy = timelock_policy.unwrap_or(self.config.default_timelock_policy);
        policy.validate(self.config.min_timelock_margin_secs)?;

        let preimage = Preimage::random();
        let order_hash = OrderHash::random();
        let source_leg = self.build_leg(LegRole::Source, &source, policy.source, order_hash, &preimage)?;
        let destination_leg =
            self.build_leg(LegRole::Destination, &destination, policy.destination, order_hash, &preimage)?;

        let now = Utc::now();
        let order = SwapOrder {
            id: order_hash,
            preimage,
            source_leg,
            destination_leg,
            status: SwapStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        info!(
            "[SwapCoordinator] Started swap {}: chain {} -> chain {} (source escrow {}, destination escrow {})",
            order.id,
            source.chain_id,
            destination.chain_id,
            order.source_leg.contract_id,
            order.destination_leg.contract_id
        );
        self.repository.insert(order).await?;
        Ok(order_hash)
    }

    fn build_leg(
        &self,
        role: LegRole,
        params: &LegParams,
        timelocks: Timelocks,
        order_hash: OrderHash,
        preimage: &Preimage,
    ) -> Result<SwapLeg, CoordinatorError> {
        let chain = self.chain(params.chain_id)?;
        let hash_scheme = chain.hash_scheme();
        let immutables = EscrowImmutables {
            order_hash,
            hashlock: hash_scheme.hashlock(preimage),
            maker: params.maker,
            taker: params.taker,
            token: params.token,
            amount: params.amount,
            safety_deposit: params.safety_deposit,
            timelocks,
        }
        .validated()
        .map_err(|source| CoordinatorError::InvalidLeg { role, source })?;

        Ok(SwapLeg {
            role,
            chain_id: params.chain_id,
            hash_scheme,
            contract_id: immutables.contract_id(&hash_scheme.algorithm),
            immutables,
            status: LegStatus::NotCreated,
            deployed_at: None,
            last_tx: None,
        })
    }

    pub async fn get_swap_status(&self, id: &SwapOrderId) -> Result<SwapOrder, CoordinatorError> {
        Ok(self.repository.get(id).await?)
    }

    pub async fn active_swap_ids(&self) -> Result<Vec<SwapOrderId>, CoordinatorError> {
        Ok(self.repository.list_active().await?.into_iter().map(|o| o.id).collect())
    }

    /// Performs the next protocol step for one order and persists the result.
    ///
    /// Changes made before a failing chain read are still persisted; the
    /// error is returned so the caller can retry later.
    pub async fn advance(&self, id: &SwapOrderId) -> Result<SwapStatus, CoordinatorError> {
        let _guard = self.lock_order(id).await;
        let mut order = self.repository.get(id).await?;
        // Stuck legs are re-read on every call; a late confirmation may have landed
        if order.is_settled() && !order.has_stuck_legs() {
            return Ok(order.status);
        }
        let before = order.clone();
        let result = self.step(&mut order).await;
        self.persist(&before, &mut order).await?;
        result.map(|_| order.status)
    }

    async fn persist(&self, before: &SwapOrder, order: &mut SwapOrder) -> Result<(), CoordinatorError> {
        if order == before {
            return Ok(());
        }
        if order.status != before.status {
            info!("[SwapCoordinator] Swap {}: {:?} -> {:?}", order.id, before.status, order.status);
        }
        order.touch();
        self.repository.update(order.clone()).await?;
        Ok(())
    }

    async fn step(&self, order: &mut SwapOrder) -> Result<(), CoordinatorError> {
        match order.status {
            SwapStatus::Pending => self.lock_source(order).await,
            SwapStatus::SourceLocked => self.lock_destination(order).await,
            SwapStatus::BothLocked => self.reveal_secret(order).await,
            SwapStatus::SecretRevealed => self.claim_source(order).await,
            SwapStatus::Completed | SwapStatus::PartiallyFailed | SwapStatus::Refunded => {
                self.reconcile_legs(order).await
            }
        }
    }

    async fn lock_source(&self, order: &mut SwapOrder) -> Result<(), CoordinatorError> {
        self.sync_leg(order, LegRole::Source).await?;
        if order.source_leg.status == LegStatus::NotCreated {
            let outcome = self.run_leg_call(order, LegRole::Source, LegAction::Create).await?;
            if outcome.is_failure() {
                return Ok(());
            }
            self.sync_leg(order, LegRole::Source).await?;
        }
        if order.source_leg.is_active() {
            order.status = SwapStatus::SourceLocked;
        }
        Ok(())
    }

    async fn lock_destination(&self, order: &mut SwapOrder) -> Result<(), CoordinatorError> {
        let source = self.sync_leg(order, LegRole::Source).await?;
        let Some(source) = source.filter(|s| s.state == EscrowState::Active) else {
            self.settle_status(order);
            return Ok(());
        };

        self.sync_leg(order, LegRole::Destination).await?;
        if order.destination_leg.status == LegStatus::NotCreated {
            // Margin is measured on the source chain's clock from the source's deployment
            let source_now = self.chain(order.source_leg.chain_id)?.current_chain_time().await?;
            let source_cancellation = source.immutables.timelocks.cancellation_start(source.deployed_at);
            let remaining = source_cancellation.saturating_sub(source_now);
            let needed = order
                .destination_leg
                .immutables
                .timelocks
                .cancellation_delay
                .saturating_add(self.config.min_timelock_margin_secs);
            if remaining < needed {
                warn!(
                    "[SwapCoordinator] Swap {}: {}s left on source, {}s needed; not locking destination",
                    order.id, remaining, needed
                );
                if source_now >= source_cancellation {
                    self.refund_leg(order, LegRole::Source, &source, source_now).await?;
                }
                self.settle_status(order);
                return Ok(());
            }

            let outcome = self.run_leg_call(order, LegRole::Destination, LegAction::Create).await?;
            if outcome.is_failure() {
                return Ok(());
            }
            self.sync_leg(order, LegRole::Destination).await?;
        }
        if order.destination_leg.is_active() {
            order.status = SwapStatus::BothLocked;
        }
        Ok(())
    }

    async fn reveal_secret(&self, order: &mut SwapOrder) -> Result<(), CoordinatorError> {
        let source = self.sync_leg(order, LegRole::Source).await?;
        let destination = self.sync_leg(order, LegRole::Destination).await?;

        if let Some(destination) = destination.filter(|s| s.state == EscrowState::Active) {
            let now = self.chain(order.destination_leg.chain_id)?.current_chain_time().await?;
            let stage = destination.stage_at(now);
            // Never hand over the destination once the source is gone
            if stage.is_withdrawable() && order.source_leg.is_active() {
                let preimage = order.preimage;
                let outcome =
                    self.run_leg_call(order, LegRole::Destination, LegAction::Withdraw(preimage)).await?;
                if outcome.is_failure() {
                    return Ok(());
                }
                self.sync_leg(order, LegRole::Destination).await?;
            } else if stage.is_refundable() {
                self.refund_leg(order, LegRole::Destination, &destination, now).await?;
            }
        }

        if order.destination_leg.status == LegStatus::Withdrawn {
            order.status = SwapStatus::SecretRevealed;
            return Ok(());
        }
        if let Some(source) = source.filter(|s| s.state == EscrowState::Active) {
            let now = self.chain(order.source_leg.chain_id)?.current_chain_time().await?;
            self.refund_leg(order, LegRole::Source, &source, now).await?;
        }
        self.settle_status(order);
        Ok(())
    }

    async fn claim_source(&self, order: &mut SwapOrder) -> Result<(), CoordinatorError> {
        let destination = self.sync_leg(order, LegRole::Destination).await?;
        // The secret as published on the destination chain
        let secret = destination.and_then(|s| s.revealed_preimage).unwrap_or(order.preimage);
        let source_lock = order.source_leg.immutables.hashlock;
        if !order.source_leg.hash_scheme.verify_preimage(&secret, &source_lock) {
            error!(
                "[SwapCoordinator] Swap {}: revealed secret does not open source hashlock {}",
                order.id, source_lock
            );
            self.mark_stuck(order, LegRole::Source, "revealed secret does not match source hashlock".to_string());
            return Ok(());
        }

        let source = self.sync_leg(order, LegRole::Source).await?;
        if let Some(source) = source.filter(|s| s.state == EscrowState::Active) {
            let now = self.chain(order.source_leg.chain_id)?.current_chain_time().await?;
            let stage = source.stage_at(now);
            if stage.is_withdrawable() {
                let outcome = self.run_leg_call(order, LegRole::Source, LegAction::Withdraw(secret)).await?;
                if outcome.is_failure() {
                    return Ok(());
                }
                self.sync_leg(order, LegRole::Source).await?;
            } else if stage.is_refundable() {
                warn!(
                    "[SwapCoordinator] Swap {}: source withdrawal window closed at {}, refunding",
                    order.id,
                    source.immutables.timelocks.cancellation_start(source.deployed_at)
                );
                self.refund_leg(order, LegRole::Source, &source, now).await?;
            }
        }
        self.settle_status(order);
        Ok(())
    }

    // Terminal orders may still hold active legs, or stuck legs whose call
    // landed on-chain after the coordinator gave up on it
    async fn reconcile_legs(&self, order: &mut SwapOrder) -> Result<(), CoordinatorError> {
        let destination = self.resync_leg(order, LegRole::Destination).await?;
        let source = self.resync_leg(order, LegRole::Source).await?;

        // The secret is public once the destination is withdrawn; the source must be claimed
        let source_open = source.as_ref().is_some_and(|s| s.state == EscrowState::Active);
        if order.destination_leg.status == LegStatus::Withdrawn && source_open {
            info!(
                "[SwapCoordinator] Swap {}: destination withdrawal found on-chain, claiming source",
                order.id
            );
            order.status = SwapStatus::SecretRevealed;
            return self.claim_source(order).await;
        }

        for (role, snapshot) in [(LegRole::Destination, destination), (LegRole::Source, source)] {
            // Stuck legs still on-chain wait for force_refund
            if !order.leg(role).is_active() {
                continue;
            }
            if let Some(snapshot) = snapshot.filter(|s| s.state == EscrowState::Active) {
                let now = self.chain(order.leg(role).chain_id)?.current_chain_time().await?;
                self.refund_leg(order, role, &snapshot, now).await?;
            }
        }
        self.settle_status(order);
        Ok(())
    }

    // Re-reads a leg that may still change on-chain; settled legs are skipped
    async fn resync_leg(
        &self,
        order: &mut SwapOrder,
        role: LegRole,
    ) -> Result<Option<EscrowSnapshot>, CoordinatorError> {
        let leg = order.leg(role);
        if !(leg.is_active() || leg.is_stuck()) {
            return Ok(None);
        }
        self.sync_leg(order, role).await
    }

    // Refunds an active leg if its cancellation timelock has passed. Returns whether it is now refunded.
    async fn refund_leg(
        &self,
        order: &mut SwapOrder,
        role: LegRole,
        snapshot: &EscrowSnapshot,
        now: Timestamp,
    ) -> Result<bool, CoordinatorError> {
        if !snapshot.stage_at(now).is_refundable() {
            return Ok(false);
        }
        let outcome = self.run_leg_call(order, role, LegAction::Refund).await?;
        if outcome.is_failure() {
            return Ok(false);
        }
        self.sync_leg(order, role).await?;
        Ok(order.leg(role).status == LegStatus::Refunded)
    }

    /// Manual escape hatch: refunds every leg whose cancellation timelock has passed,
    /// including legs marked stuck.
    pub async fn force_refund(&self, id: &SwapOrderId) -> Result<SwapStatus, CoordinatorError> {
        let _guard = self.lock_order(id).await;
        let mut order = self.repository.get(id).await?;
        let before = order.clone();
        let result = self.refund_eligible_legs(&mut order).await;
        self.persist(&before, &mut order).await?;
        match result {
            Ok(true) => Ok(order.status),
            Ok(false) => Err(CoordinatorError::NotRefundable(*id)),
            Err(e) => Err(e),
        }
    }

    async fn refund_eligible_legs(&self, order: &mut SwapOrder) -> Result<bool, CoordinatorError> {
        let mut refunded_any = false;
        for role in [LegRole::Destination, LegRole::Source] {
            let leg = order.leg(role);
            if !(leg.is_active() || leg.is_stuck()) {
                continue;
            }
            let chain = self.chain(leg.chain_id)?;
            let Some(snapshot) = chain.get_escrow_state(leg.contract_id).await? else {
                continue;
            };
            if snapshot.state != EscrowState::Active {
                self.sync_leg(order, role).await?;
                continue;
            }
            let now = chain.current_chain_time().await?;
            if self.refund_leg(order, role, &snapshot, now).await? {
                info!("[SwapCoordinator] Swap {}: force-refunded {} leg", order.id, role);
                refunded_any = true;
            }
        }
        self.settle_status(order);
        Ok(refunded_any)
    }

    /// Runs `advance` on many orders concurrently, one step each.
    pub async fn drive_all(&self, ids: &[SwapOrderId]) -> Vec<Result<SwapStatus, CoordinatorError>> {
        join_all(ids.iter().map(|id| self.advance(id))).await
    }

    /// Advances an order until it is settled, sleeping `poll_interval` whenever
    /// a step makes no progress. Transient chain errors are logged and retried.
    pub async fn drive(&self, id: &SwapOrderId) -> Result<SwapStatus, CoordinatorError> {
        loop {
            let before = self.repository.get(id).await?;
            if before.is_settled() {
                return Ok(before.status);
            }
            match self.advance(id).await {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!("[SwapCoordinator] Swap {}: transient error, will retry: {}", id, e);
                }
                Err(e) => return Err(e),
            }
            let after = self.repository.get(id).await?;
            if after.is_settled() {
                return Ok(after.status);
            }
            if after == before {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    pub fn spawn_driver(self: &Arc<Self>, id: SwapOrderId) -> JoinHandle<Result<SwapStatus, CoordinatorError>> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.drive(&id).await })
    }

    /// Removes a settled order from the active set.
    pub async fn archive_swap(&self, id: &SwapOrderId) -> Result<SwapOrder, CoordinatorError> {
        let guard = self.lock_order(id).await;
        let order = self.repository.get(id).await?;
        if !order.is_settled() {
            return Err(CoordinatorError::NotSettled(*id));
        }
        let archived = self.repository.archive(id).await?;
        drop(guard);
        self.order_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
        info!("[SwapCoordinator] Archived swap {} ({:?})", id, archived.status);
        Ok(archived)
    }

    // Reads the leg's escrow and updates the coordinator's view of it
    async fn sync_leg(
        &self,
        order: &mut SwapOrder,
        role: LegRole,
    ) -> Result<Option<EscrowSnapshot>, CoordinatorError> {
        let (chain_id, contract_id) = {
            let leg = order.leg(role);
            (leg.chain_id, leg.contract_id)
        };
        let snapshot = self.chain(chain_id)?.get_escrow_state(contract_id).await?;

        let leg = order.leg_mut(role);
        match &snapshot {
            Some(s) if s.immutables != leg.immutables => {
                error!("[SwapCoordinator] Escrow {} on chain {} has unexpected immutables", contract_id, chain_id);
                leg.status = LegStatus::Stuck { reason: "on-chain immutables differ".to_string() };
            }
            Some(s) => {
                leg.deployed_at = Some(s.deployed_at);
                // A stuck leg only clears once the chain shows a final state
                if !leg.is_stuck() || s.state.is_settled() {
                    leg.status = LegStatus::from_state(s.state);
                }
            }
            None => {
                if !leg.is_stuck() {
                    leg.status = LegStatus::NotCreated;
                }
            }
        }
        Ok(snapshot)
    }

    fn mark_stuck(&self, order: &mut SwapOrder, role: LegRole, reason: String) {
        order.leg_mut(role).status = LegStatus::Stuck { reason };
        order.status = SwapStatus::PartiallyFailed;
    }

    // Derives a terminal status from the legs, if they have reached one
    fn settle_status(&self, order: &mut SwapOrder) {
        use LegStatus::*;
        let next = match (&order.source_leg.status, &order.destination_leg.status) {
            (Stuck { .. }, _) | (_, Stuck { .. }) => SwapStatus::PartiallyFailed,
            (Withdrawn, Withdrawn) => SwapStatus::Completed,
            (Refunded, Refunded) | (Refunded, NotCreated) => SwapStatus::Refunded,
            (Withdrawn, Refunded) | (Refunded, Withdrawn) => SwapStatus::PartiallyFailed,
            _ => return,
        };
        order.status = next;
    }

    async fn run_leg_call(
        &self,
        order: &mut SwapOrder,
        role: LegRole,
        action: LegAction,
    ) -> Result<CallOutcome, CoordinatorError> {
        let leg = order.leg(role).clone();
        let outcome = self.execute(&leg, action).await?;
        match &outcome {
            CallOutcome::Applied(tx) => {
                info!(
                    "[SwapCoordinator] Swap {}: {} {} leg on chain {} confirmed ({})",
                    order.id,
                    action.name(),
                    role,
                    leg.chain_id,
                    tx
                );
                order.leg_mut(role).last_tx = Some(tx.clone());
            }
            CallOutcome::AlreadyApplied => {
                debug!("[SwapCoordinator] Swap {}: {} {} leg already applied", order.id, action.name(), role);
            }
            CallOutcome::NotReady(e) => {
                debug!("[SwapCoordinator] Swap {}: {} {} leg not ready: {}", order.id, action.name(), role, e);
            }
            CallOutcome::Rejected(reason) | CallOutcome::Exhausted(reason) => {
                error!(
                    "[SwapCoordinator] Swap {}: {} {} leg failed: {}",
                    order.id,
                    action.name(),
                    role,
                    reason
                );
                self.mark_stuck(order, role, format!("{} failed: {}", action.name(), reason));
            }
        }
        Ok(outcome)
    }

    // Submits one escrow call with bounded retries.
    //
    // After an unconfirmed attempt the chain is re-read first: if the effect is
    // already visible nothing is resubmitted, and a still-pending transaction
    // is awaited again instead of being sent twice.
    async fn execute(&self, leg: &SwapLeg, action: LegAction) -> Result<CallOutcome, CoordinatorError> {
        let chain = self.chain(leg.chain_id)?;
        let attempts = self.config.max_submit_retries.saturating_add(1);
        let mut pending_tx: Option<TxHandle> = None;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.backoff_for(attempt - 1)).await;
                match effect_visible(chain.as_ref(), leg, action).await {
                    Ok(true) => return Ok(CallOutcome::AlreadyApplied),
                    Ok(false) => {}
                    Err(e) => {
                        warn!("[SwapCoordinator] Re-check of escrow {} failed: {}", leg.contract_id, e);
                        last_error = e.to_string();
                        continue;
                    }
                }
            }

            let tx = match pending_tx.take() {
                Some(tx) => tx,
                None => {
                    let submitted = match action {
                        LegAction::Create => chain.submit_create(&leg.immutables).await,
                        LegAction::Withdraw(preimage) => chain.submit_withdraw(leg.contract_id, &preimage).await,
                        LegAction::Refund => chain.submit_refund(leg.contract_id).await,
                    };
                    match submitted {
                        Ok(tx) => tx,
                        Err(ChainError::Rejected(e)) => return Ok(classify(e)),
                        Err(e) if e.is_transient() => {
                            warn!(
                                "[SwapCoordinator] {} on chain {} attempt {}/{} failed: {}",
                                action.name(),
                                leg.chain_id,
                                attempt,
                                attempts,
                                e
                            );
                            last_error = e.to_string();
                            continue;
                        }
                        Err(e) => return Ok(CallOutcome::Rejected(e.to_string())),
                    }
                }
            };

            let timeout = self.config.finality_timeout;
            match tokio::time::timeout(timeout, chain.await_finality(&tx, timeout)).await {
                Ok(Ok(FinalityStatus::Confirmed)) => return Ok(CallOutcome::Applied(tx)),
                Ok(Ok(FinalityStatus::Failed(e))) => return Ok(classify(e)),
                Ok(Ok(FinalityStatus::Pending)) | Err(_) => {
                    warn!("[SwapCoordinator] {} not final after {:?}", tx, timeout);
                    last_error = format!("{} not final after {:?}", tx, timeout);
                    pending_tx = Some(tx);
                }
                Ok(Err(ChainError::UnknownTransaction(tx))) => {
                    // Dropped from the mempool: safe to resubmit after the re-check
                    last_error = format!("{} dropped", tx);
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    pending_tx = Some(tx);
                }
            }
        }
        Ok(CallOutcome::Exhausted(last_error))
    }
}

async fn effect_visible(chain: &dyn ChainAdapter, leg: &SwapLeg, action: LegAction) -> Result<bool, ChainError> {
    let state = chain.get_escrow_state(leg.contract_id).await?.map(|s| s.state);
    Ok(match (action, state) {
        (LegAction::Create, Some(_)) => true,
        (LegAction::Withdraw(_), Some(EscrowState::Withdrawn)) => true,
        (LegAction::Refund, Some(EscrowState::Refunded)) => true,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::Timelocks;
    use crate::onchain::FaultPlan;
    use crate::test_utils::{
        destination_params, fast_policy, setup_swap_env, source_params, test_config, DESTINATION_CHAIN,
        SOURCE_CHAIN,
    };

    #[tokio::test]
    async fn start_swap_validates_inputs() {
        let env = setup_swap_env(test_config());

        let unknown = LegParams { chain_id: 99, ..destination_params(500) };
        assert_eq!(
            env.coordinator.start_swap(source_params(1_000), unknown, None).await,
            Err(CoordinatorError::UnknownChain(99))
        );

        let zero = source_params(0);
        assert!(matches!(
            env.coordinator.start_swap(zero, destination_params(500), None).await,
            Err(CoordinatorError::InvalidLeg { role: LegRole::Source, source: EscrowError::InvalidAmount })
        ));

        let inverted = TimelockPolicy {
            source: Timelocks::new(0, 100, 200, 300).unwrap(),
            destination: Timelocks::new(0, 100, 200, 300).unwrap(),
        };
        assert!(matches!(
            env.coordinator.start_swap(source_params(1_000), destination_params(500), Some(inverted)).await,
            Err(CoordinatorError::UnsafeTimelockPolicy(_))
        ));
        assert!(env.coordinator.active_swap_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn legs_use_their_own_chain_hash() {
        let env = setup_swap_env(test_config());
        let id = env.coordinator.start_swap(source_params(1_000), destination_params(500), None).await.unwrap();
        let order = env.coordinator.get_swap_status(&id).await.unwrap();

        assert_eq!(order.status, SwapStatus::Pending);
        assert_eq!(order.source_leg.chain_id, SOURCE_CHAIN);
        assert_eq!(order.destination_leg.chain_id, DESTINATION_CHAIN);
        assert_ne!(order.source_leg.immutables.hashlock, order.destination_leg.immutables.hashlock);
        assert!(order.source_leg.hash_scheme.verify_preimage(&order.preimage, &order.source_leg.immutables.hashlock));
        assert!(order
            .destination_leg
            .hash_scheme
            .verify_preimage(&order.preimage, &order.destination_leg.immutables.hashlock));
        assert_eq!(order.source_leg.immutables.order_hash, id);
        assert_eq!(order.destination_leg.immutables.order_hash, id);
    }

    #[tokio::test]
    async fn advance_locks_both_legs() {
        let env = setup_swap_env(test_config());
        let id = env.coordinator.start_swap(source_params(1_000), destination_params(500), None).await.unwrap();

        assert_eq!(env.coordinator.advance(&id).await, Ok(SwapStatus::SourceLocked));
        assert_eq!(env.coordinator.advance(&id).await, Ok(SwapStatus::BothLocked));
        let order = env.coordinator.get_swap_status(&id).await.unwrap();
        assert_eq!(order.source_leg.deployed_at, Some(0));
        assert_eq!(env.source.escrow_state(&order.source_leg.contract_id), EscrowState::Active);
        assert_eq!(env.destination.escrow_state(&order.destination_leg.contract_id), EscrowState::Active);
        // Inside the locked stage nothing moves
        assert_eq!(env.coordinator.advance(&id).await, Ok(SwapStatus::BothLocked));
    }

    #[tokio::test]
    async fn destination_not_locked_without_margin() {
        let env = setup_swap_env(test_config());
        let id = env.coordinator.start_swap(source_params(1_000), destination_params(500), None).await.unwrap();
        env.coordinator.advance(&id).await.unwrap();

        // 4199s left on the source, the destination needs 3600 + 600
        env.source.set_time(3_001);
        assert_eq!(env.coordinator.advance(&id).await, Ok(SwapStatus::SourceLocked));
        let order = env.coordinator.get_swap_status(&id).await.unwrap();
        assert_eq!(order.destination_leg.status, LegStatus::NotCreated);
        assert!(env.destination.submitted_calls().is_empty());

        env.source.set_time(7_200);
        assert_eq!(env.coordinator.advance(&id).await, Ok(SwapStatus::Refunded));
        let order = env.coordinator.get_swap_status(&id).await.unwrap();
        assert!(order.is_settled());
    }

    #[tokio::test]
    async fn transport_exhaustion_marks_leg_stuck() {
        let env = setup_swap_env(test_config());
        let id = env.coordinator.start_swap(source_params(1_000), destination_params(500), None).await.unwrap();
        env.source.inject_faults(FaultPlan { unavailable_submissions: 10, ..FaultPlan::default() });

        assert_eq!(env.coordinator.advance(&id).await, Ok(SwapStatus::PartiallyFailed));
        let order = env.coordinator.get_swap_status(&id).await.unwrap();
        assert!(order.source_leg.is_stuck());
        // One attempt plus the configured retries
        assert_eq!(env.source.remaining_faults().unavailable_submissions, 10 - 4);
        assert!(order.is_settled());
    }

    #[tokio::test]
    async fn unsettled_orders_cannot_be_archived_or_refunded() {
        let env = setup_swap_env(test_config());
        let id = env.coordinator.start_swap(source_params(1_000), destination_params(500), None).await.unwrap();
        env.coordinator.advance(&id).await.unwrap();

        assert_eq!(env.coordinator.archive_swap(&id).await, Err(CoordinatorError::NotSettled(id)));
        assert_eq!(env.coordinator.force_refund(&id).await, Err(CoordinatorError::NotRefundable(id)));
        let missing = OrderHash::new([0xEE; 32]);
        assert_eq!(env.coordinator.advance(&missing).await, Err(CoordinatorError::UnknownSwap(missing)));
    }

    #[tokio::test]
    async fn spawned_driver_runs_to_completion() {
        let env = setup_swap_env(test_config());
        let id = env
            .coordinator
            .start_swap(source_params(1_000), destination_params(500), Some(fast_policy()))
            .await
            .unwrap();

        let status = env.coordinator.spawn_driver(id).await.unwrap();
        assert_eq!(status, Ok(SwapStatus::Completed));
        let archived = env.coordinator.archive_swap(&id).await.unwrap();
        assert_eq!(archived.status, SwapStatus::Completed);
        assert!(env.coordinator.active_swap_ids().await.unwrap().is_empty());
    }

    #[test]
    fn repository_not_found_maps_to_unknown_swap() {
        let id = OrderHash::new([1; 32]);
        assert_eq!(
            CoordinatorError::from(RepositoryError::NotFound(id)),
            CoordinatorError::UnknownSwap(id)
        );
    }

    #[test]
    fn error_classes_map_to_outcomes() {
        let id = crate::identity::ContractId::new([1; 32]);
        assert_eq!(classify(EscrowError::DuplicateEscrow(id)), CallOutcome::AlreadyApplied);
        assert!(matches!(
            classify(EscrowError::TimelockNotExpired { contract_id: id, expires_at: 5 }),
            CallOutcome::NotReady(_)
        ));
        assert!(classify(EscrowError::WrongPreimage(id)).is_failure());
        assert!(classify(EscrowError::HashCollision(id)).is_failure());
    }
}
