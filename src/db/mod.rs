pub mod orders;

pub use orders::PostgresOrderStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::OrderFill;

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("there is no db connection")]
    NotConnected,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Durable store for order fills, consumed by the trader.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn connect(&self) -> Result<(), OrderStoreError>;

    /// Persists a fill. Fails with [`OrderStoreError::NotConnected`] before
    /// `connect` has succeeded.
    async fn add_order(&self, fill: &OrderFill) -> Result<(), OrderStoreError>;

    /// Returns up to `limit` persisted fills, oldest first.
    async fn get_orders(&self, limit: i64) -> Result<Vec<OrderFill>, OrderStoreError>;

    async fn shutdown(&self);
}
