use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use super::{OrderStore, OrderStoreError};
use crate::models::OrderFill;

/// Postgres-backed order store.
pub struct PostgresOrderStore {
    dsn: String,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresOrderStore {
    pub fn new(dsn: impl Into<String>) -> Self {
        PostgresOrderStore {
            dsn: dsn.into(),
            pool: RwLock::new(None),
        }
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn connect(&self) -> Result<(), OrderStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&self.dsn)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("connected to postgres");
        *self.pool.write().await = Some(pool);
        Ok(())
    }

    async fn add_order(&self, fill: &OrderFill) -> Result<(), OrderStoreError> {
        let pool = self.pool.read().await;
        let pool = pool.as_ref().ok_or(OrderStoreError::NotConnected)?;
        sqlx::query(
            "INSERT INTO orders(name, orderID, price, amount, side) VALUES($1, $2, $3, $4, $5)",
        )
        .bind(&fill.symbol)
        .bind(&fill.order_id)
        .bind(fill.price)
        .bind(fill.amount)
        .bind(&fill.side)
        .execute(pool)
        .await?;
        tracing::debug!(symbol = %fill.symbol, order_id = %fill.order_id, "order persisted");
        Ok(())
    }

    async fn get_orders(&self, limit: i64) -> Result<Vec<OrderFill>, OrderStoreError> {
        let pool = self.pool.read().await;
        let pool = pool.as_ref().ok_or(OrderStoreError::NotConnected)?;
        let rows = sqlx::query(
            "SELECT name, orderID, price, amount, side FROM orders ORDER BY id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        let mut fills = Vec::with_capacity(rows.len());
        for row in rows {
            fills.push(OrderFill {
                symbol: row.get("name"),
                order_id: row.get("orderid"),
                price: row.get("price"),
                amount: row.get("amount"),
                side: row.get("side"),
            });
        }
        Ok(fills)
    }

    async fn shutdown(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }
}
