use super::types::{SwapOrder, SwapOrderId};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Swap order {0} not found")]
    NotFound(SwapOrderId),

    #[error("Swap order {0} already exists")]
    AlreadyExists(SwapOrderId),

    #[error("Repository backend error: {0}")]
    Backend(String),
}

/// Storage the coordinator keeps its swap orders in.
///
/// Orders are written back after every protocol step, so a restarted
/// coordinator can pick up active orders where the chains left them.
#[async_trait]
pub trait SwapRepository: Send + Sync {
    async fn insert(&self, order: SwapOrder) -> Result<(), RepositoryError>;

    async fn get(&self, id: &SwapOrderId) -> Result<SwapOrder, RepositoryError>;

    /// Replaces an existing order.
    async fn update(&self, order: SwapOrder) -> Result<(), RepositoryError>;

    /// Orders not yet archived, oldest first.
    async fn list_active(&self) -> Result<Vec<SwapOrder>, RepositoryError>;

    /// Moves an order out of the active set. Archived orders stay readable via `get`.
    async fn archive(&self, id: &SwapOrderId) -> Result<SwapOrder, RepositoryError>;
}

#[derive(Default)]
struct Tables {
    active: HashMap<SwapOrderId, SwapOrder>,
    archived: HashMap<SwapOrderId, SwapOrder>,
}

// In-memory implementation for simulations and tests
#[derive(Default)]
pub struct InMemorySwapRepository {
    tables: Mutex<Tables>,
}

impl InMemorySwapRepository {
    pub fn new() -> Self {
        Default::default()
    }
}

#[async_trait]
impl SwapRepository for InMemorySwapRepository {
    async fn insert(&self, order: SwapOrder) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        if tables.active.contains_key(&order.id) || tables.archived.contains_key(&order.id) {
            return Err(RepositoryError::AlreadyExists(order.id));
        }
        tables.active.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: &SwapOrderId) -> Result<SwapOrder, RepositoryError> {
        let tables = self.tables.lock().await;
        tables
            .active
            .get(id)
            .or_else(|| tables.archived.get(id))
            .cloned()
            .ok_or(RepositoryError::NotFound(*id))
    }

    async fn update(&self, order: SwapOrder) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        match tables.active.get_mut(&order.id) {
            Some(existing) => {
                *existing = order;
                Ok(())
            }
            None => Err(RepositoryError::NotFound(order.id)),
        }
    }

    async fn list_active(&self) -> Result<Vec<SwapOrder>, RepositoryError> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<SwapOrder> = tables.active.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn archive(&self, id: &SwapOrderId) -> Result<SwapOrder, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let order = tables.active.remove(id).ok_or(RepositoryError::NotFound(*id))?;
        tables.archived.insert(*id, order.clone());
        Ok(order)
    }
}
