pub mod engine;
pub mod error;
pub mod types;

pub use engine::EscrowEngine;
pub use error::{ErrorClass, EscrowError};
pub use types::{
    EscrowImmutables, EscrowSnapshot, EscrowState, Settlement, SettlementKind, TimelockStage,
    Timelocks,
};
