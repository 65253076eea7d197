// Shared helpers for unit tests and the scenario tests under tests/.
//
// Two simulated chains with deliberately different hash contracts: the source
// verifies SHA-256 over the raw secret, the destination keccak256 over the
// ABI-encoded hex string.

use crate::config::SwapConfig;
use crate::cross_chain::{
    InMemorySwapRepository, LegParams, LegRole, LegStatus, SwapCoordinator, SwapLeg, SwapOrder,
    SwapStatus, TimelockPolicy,
};
use crate::data_structures::{Address, ChainId, Timestamp, TokenId};
use crate::escrow::{EscrowImmutables, Timelocks};
use crate::identity::{HashAlgorithm, HashScheme, OrderHash, Preimage, PreimageEncoding};
use crate::onchain::{ChainAdapter, SimulatedChain};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub const SOURCE_CHAIN: ChainId = 1;
pub const DESTINATION_CHAIN: ChainId = 2;

pub const SOURCE_SCHEME: HashScheme = HashScheme::new(HashAlgorithm::Sha256, PreimageEncoding::Raw);
pub const DESTINATION_SCHEME: HashScheme =
    HashScheme::new(HashAlgorithm::Keccak256, PreimageEncoding::AbiString);

pub const SOURCE_TOKEN: TokenId = TokenId::new([0x5A; 32]);
pub const DESTINATION_TOKEN: TokenId = TokenId::new([0xDB; 32]);

pub const STARTING_BALANCE: u128 = 1_000_000;
pub const SAFETY_DEPOSIT: u128 = 100;

/// Deterministic address, distinct per seed.
pub fn test_address(seed: u8) -> Address {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xAD;
    bytes[31] = seed;
    Address::new(bytes)
}

// Locks on the source chain, receives on the destination chain
pub fn user() -> Address {
    test_address(1)
}

// Counterparty: receives on the source chain, locks on the destination chain
pub fn resolver() -> Address {
    test_address(2)
}

// Unrelated third party for public windows
pub fn relayer() -> Address {
    test_address(3)
}

/// Short timeouts and backoffs so retry paths finish quickly.
pub fn test_config() -> SwapConfig {
    SwapConfig {
        finality_timeout: Duration::from_millis(200),
        max_submit_retries: 3,
        retry_backoff: Duration::from_millis(1),
        max_retry_backoff: Duration::from_millis(4),
        poll_interval: Duration::from_millis(5),
        ..SwapConfig::default()
    }
}

/// Default policy with no exclusive-wait on withdrawals, so a swap can
/// complete without moving the clocks.
pub fn fast_policy() -> TimelockPolicy {
    let mut policy = SwapConfig::default().default_timelock_policy;
    policy.source.withdrawal_delay = 0;
    policy.destination.withdrawal_delay = 0;
    policy
}

pub fn source_params(amount: u128) -> LegParams {
    LegParams {
        chain_id: SOURCE_CHAIN,
        maker: user(),
        taker: resolver(),
        token: SOURCE_TOKEN,
        amount,
        safety_deposit: SAFETY_DEPOSIT,
    }
}

pub fn destination_params(amount: u128) -> LegParams {
    LegParams {
        chain_id: DESTINATION_CHAIN,
        maker: resolver(),
        taker: user(),
        token: DESTINATION_TOKEN,
        amount,
        safety_deposit: SAFETY_DEPOSIT,
    }
}

/// Source chain funds the user, destination chain funds the resolver.
pub fn funded_chains() -> (Arc<SimulatedChain>, Arc<SimulatedChain>) {
    let source = SimulatedChain::new(SOURCE_CHAIN, SOURCE_SCHEME, 1);
    source.deposit(user(), SOURCE_TOKEN, STARTING_BALANCE);
    source.deposit(user(), TokenId::NATIVE, STARTING_BALANCE);

    let destination = SimulatedChain::new(DESTINATION_CHAIN, DESTINATION_SCHEME, 2);
    destination.deposit(resolver(), DESTINATION_TOKEN, STARTING_BALANCE);
    destination.deposit(resolver(), TokenId::NATIVE, STARTING_BALANCE);

    (Arc::new(source), Arc::new(destination))
}

pub struct TestSwapEnv {
    pub source: Arc<SimulatedChain>,
    pub destination: Arc<SimulatedChain>,
    pub repository: Arc<InMemorySwapRepository>,
    pub coordinator: Arc<SwapCoordinator>,
}

impl TestSwapEnv {
    /// Moves both chain clocks to the same value.
    pub fn set_time(&self, now: Timestamp) {
        self.source.set_time(now);
        self.destination.set_time(now);
    }
}

pub fn setup_swap_env(config: SwapConfig) -> TestSwapEnv {
    let (source, destination) = funded_chains();
    setup_swap_env_with_chains(config, source, destination)
}

pub fn setup_swap_env_with_chains(
    config: SwapConfig,
    source: Arc<SimulatedChain>,
    destination: Arc<SimulatedChain>,
) -> TestSwapEnv {
    let repository = Arc::new(InMemorySwapRepository::new());
    let mut coordinator = SwapCoordinator::new(config, repository.clone());
    coordinator.register_chain(source.clone() as Arc<dyn ChainAdapter>);
    coordinator.register_chain(destination.clone() as Arc<dyn ChainAdapter>);
    TestSwapEnv { source, destination, repository, coordinator: Arc::new(coordinator) }
}

/// A stand-alone order for repository tests; never submitted anywhere.
pub fn sample_order(seed: u8) -> SwapOrder {
    let preimage = Preimage::new([seed; 32]);
    let order_hash = OrderHash::new([seed.wrapping_add(0x80); 32]);
    let policy = SwapConfig::default().default_timelock_policy;
    let leg = |role: LegRole, params: LegParams, scheme: HashScheme, timelocks: Timelocks| {
        let immutables = EscrowImmutables {
            order_hash,
            hashlock: scheme.hashlock(&preimage),
            maker: params.maker,
            taker: params.taker,
            token: params.token,
            amount: params.amount,
            safety_deposit: params.safety_deposit,
            timelocks,
        };
        SwapLeg {
            role,
            chain_id: params.chain_id,
            hash_scheme: scheme,
            contract_id: immutables.contract_id(&scheme.algorithm),
            immutables,
            status: LegStatus::NotCreated,
            deployed_at: None,
            last_tx: None,
        }
    };
    let now = Utc::now();
    SwapOrder {
        id: order_hash,
        preimage,
        source_leg: leg(LegRole::Source, source_params(1_000), SOURCE_SCHEME, policy.source),
        destination_leg: leg(LegRole::Destination, destination_params(500), DESTINATION_SCHEME, policy.destination),
        status: SwapStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}
