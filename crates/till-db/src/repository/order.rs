//! # Order Repository
//!
//! Orders and their lines are owned by the ordering module. This core
//! reads them and flips `orders.status` when a sale is finalized or
//! cancelled. `create` exists for seeding and tests.

use chrono::Utc;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use till_core::{Order, OrderLine, OrderStatus};

/// A line to add to a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl NewOrderLine {
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price_cents: i64) -> Self {
        NewOrderLine {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
        }
    }
}

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Creates an OPEN order with its lines in one transaction.
    pub async fn create(
        &self,
        customer_id: Option<&str>,
        lines: &[NewOrderLine],
    ) -> DbResult<(Order, Vec<OrderLine>)> {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.map(str::to_string),
            status: OrderStatus::Open,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %order.id, lines = lines.len(), "Creating order");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&order.id)
        .bind(&order.customer_id)
        .bind(order.status)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        let mut created = Vec::with_capacity(lines.len());
        for line in lines {
            let line = OrderLine {
                id: Uuid::new_v4().to_string(),
                order_id: order.id.clone(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
            };

            sqlx::query(
                r#"
                INSERT INTO order_lines (id, order_id, product_id, quantity, unit_price_cents)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&line.id)
            .bind(&line.order_id)
            .bind(&line.product_id)
            .bind(line.quantity)
            .bind(line.unit_price_cents)
            .execute(&mut *tx)
            .await?;

            created.push(line);
        }

        tx.commit().await?;

        Ok((order, created))
    }

    /// Gets an order by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        fetch_by_id(&self.pool, id).await
    }

    /// Gets an order by ID while holding the write lock.
    pub async fn get_by_id_locked(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Order>> {
        fetch_by_id(conn, id).await
    }

    /// Lines of an order.
    pub async fn lines(&self, order_id: &str) -> DbResult<Vec<OrderLine>> {
        fetch_lines(&self.pool, order_id).await
    }

    /// Lines of an order, read under the write lock.
    pub async fn lines_locked(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> DbResult<Vec<OrderLine>> {
        fetch_lines(conn, order_id).await
    }

    /// Sets the order status.
    pub async fn set_status(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        status: OrderStatus,
    ) -> DbResult<()> {
        debug!(id = %id, status = %status, "Updating order status");

        let result = sqlx::query("UPDATE orders SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .bind(Utc::now())
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", id));
        }

        Ok(())
    }
}

async fn fetch_by_id<'e, E>(executor: E, id: &str) -> DbResult<Option<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let order = sqlx::query_as::<_, Order>(
        "SELECT id, customer_id, status, created_at, updated_at FROM orders WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(order)
}

async fn fetch_lines<'e, E>(executor: E, order_id: &str) -> DbResult<Vec<OrderLine>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let lines = sqlx::query_as::<_, OrderLine>(
        r#"
        SELECT id, order_id, product_id, quantity, unit_price_cents
        FROM order_lines
        WHERE order_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;

    Ok(lines)
}

// =============================================================================
// Unit Tests
// =============================================================================
