//! # Sale Repository
//!
//! Database operations for sales.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. FINALIZE (one locked transaction)                                  │
//! │     └── next_invoice_number() → "20260131-0001"                        │
//! │     └── insert() → Sale { status: Completed }                          │
//! │                                                                         │
//! │  2. (OPTIONAL) CANCEL                                                  │
//! │     └── cancel() → Sale { status: Cancelled, cancelled_at, reason }    │
//! │                                                                         │
//! │  A sale row is never deleted. Cancel is guarded by                     │
//! │  `status = 'completed'` so it can only happen once.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::Sale;

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        fetch_by_id(&self.pool, id).await
    }

    /// Gets a sale by ID while holding the write lock.
    pub async fn get_by_id_locked(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Sale>> {
        fetch_by_id(conn, id).await
    }

    /// Most recent sale created from an order.
    ///
    /// An order whose sale was cancelled can be finalized again, so there
    /// may be older cancelled sales for the same order.
    pub async fn find_by_order(&self, order_id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(
            r#"
            SELECT
                id, order_id, customer_id, operator_id, session_id, created_at,
                gross_total_cents, discount_total_cents, net_total_cents,
                amount_paid_cents, change_due_cents, payment_method,
                installment_count, status, invoice_number,
                cancelled_at, cancellation_reason
            FROM sales
            WHERE order_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Inserts a sale.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - invoice number taken, or the order
    ///   already has a completed sale
    pub async fn insert(&self, conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, order_id = %sale.order_id, invoice = ?sale.invoice_number, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, order_id, customer_id, operator_id, session_id, created_at,
                gross_total_cents, discount_total_cents, net_total_cents,
                amount_paid_cents, change_due_cents, payment_method,
                installment_count, status, invoice_number,
                cancelled_at, cancellation_reason
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9,
                ?10, ?11, ?12,
                ?13, ?14, ?15,
                ?16, ?17
            )
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.order_id)
        .bind(&sale.customer_id)
        .bind(&sale.operator_id)
        .bind(&sale.session_id)
        .bind(sale.created_at)
        .bind(sale.gross_total_cents)
        .bind(sale.discount_total_cents)
        .bind(sale.net_total_cents)
        .bind(sale.amount_paid_cents)
        .bind(sale.change_due_cents)
        .bind(sale.payment_method)
        .bind(sale.installment_count)
        .bind(sale.status)
        .bind(&sale.invoice_number)
        .bind(sale.cancelled_at)
        .bind(&sale.cancellation_reason)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Marks a completed sale as cancelled.
    pub async fn cancel(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        cancelled_at: DateTime<Utc>,
        reason: &str,
    ) -> DbResult<()> {
        debug!(id = %id, reason = %reason, "Cancelling sale");

        let result = sqlx::query(
            r#"
            UPDATE sales
            SET status = 'cancelled',
                cancelled_at = ?2,
                cancellation_reason = ?3
            WHERE id = ?1 AND status = 'completed'
            "#,
        )
        .bind(id)
        .bind(cancelled_at)
        .bind(reason)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale (completed)", id));
        }

        Ok(())
    }

    /// Next invoice number for `date`, in format `YYYYMMDD-NNNN`.
    ///
    /// ## Sequence
    /// The per-day counter is the highest suffix already used that day plus
    /// one. Must run inside the locked transaction that inserts the sale, so
    /// two writers cannot draw the same number.
    pub async fn next_invoice_number(
        &self,
        conn: &mut SqliteConnection,
        date: NaiveDate,
    ) -> DbResult<String> {
        let prefix = date.format("%Y%m%d").to_string();

        let last: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(CAST(substr(invoice_number, 10) AS INTEGER)), 0)
            FROM sales
            WHERE invoice_number LIKE ?1 || '-%'
            "#,
        )
        .bind(&prefix)
        .fetch_one(conn)
        .await?;

        Ok(format!("{}-{:04}", prefix, last + 1))
    }
}

async fn fetch_by_id<'e, E>(executor: E, id: &str) -> DbResult<Option<Sale>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sale = sqlx::query_as::<_, Sale>(
        r#"
        SELECT
            id, order_id, customer_id, operator_id, session_id, created_at,
            gross_total_cents, discount_total_cents, net_total_cents,
            amount_paid_cents, change_due_cents, payment_method,
            installment_count, status, invoice_number,
            cancelled_at, cancellation_reason
        FROM sales
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(sale)
}

// =============================================================================
// Unit Tests
// =============================================================================
