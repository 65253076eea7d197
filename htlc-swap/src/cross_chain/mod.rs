// Cross-chain swap coordination over two HTLC escrows

pub mod repository;
pub mod swap_coordinator;
pub mod types;

pub use repository::{InMemorySwapRepository, RepositoryError, SwapRepository};
pub use swap_coordinator::{CoordinatorError, SwapCoordinator};
pub use types::{
    LegOutcome, LegParams, LegReport, LegRole, LegStatus, PolicyError, SwapLeg, SwapOrder,
    SwapOrderId, SwapStatus, TimelockPolicy,
};
