//! # Cash Movement Repository
//!
//! The append-only cash journal. Rows are inserted and aggregated, never
//! updated or deleted.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::{CashMovement, MovementTotals};

/// Repository for cash movement database operations.
#[derive(Debug, Clone)]
pub struct CashMovementRepository {
    pool: SqlitePool,
}

impl CashMovementRepository {
    /// Creates a new CashMovementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CashMovementRepository { pool }
    }

    /// Appends a movement to the journal.
    pub async fn insert(&self, conn: &mut SqliteConnection, movement: &CashMovement) -> DbResult<()> {
        debug!(
            id = %movement.id,
            session_id = %movement.session_id,
            movement_type = %movement.movement_type,
            amount_cents = movement.amount_cents,
            "Appending cash movement"
        );

        sqlx::query(
            r#"
            INSERT INTO cash_movements (
                id, session_id, movement_type, amount_cents, description,
                created_at, operator_id, payment_method, sale_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.session_id)
        .bind(movement.movement_type)
        .bind(movement.amount_cents)
        .bind(&movement.description)
        .bind(movement.created_at)
        .bind(&movement.operator_id)
        .bind(movement.payment_method)
        .bind(&movement.sale_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Movements of a session in the order they were committed.
    pub async fn list_for_session(&self, session_id: &str) -> DbResult<Vec<CashMovement>> {
        let movements = sqlx::query_as::<_, CashMovement>(
            r#"
            SELECT
                id, session_id, movement_type, amount_cents, description,
                created_at, operator_id, payment_method, sale_id
            FROM cash_movements
            WHERE session_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Movements produced by a sale (its entry, and a refund exit if any).
    pub async fn list_for_sale(&self, sale_id: &str) -> DbResult<Vec<CashMovement>> {
        let movements = sqlx::query_as::<_, CashMovement>(
            r#"
            SELECT
                id, session_id, movement_type, amount_cents, description,
                created_at, operator_id, payment_method, sale_id
            FROM cash_movements
            WHERE sale_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Entry/exit totals of one session.
    pub async fn totals_for_session(&self, session_id: &str) -> DbResult<MovementTotals> {
        session_totals(&self.pool, session_id).await
    }

    /// Entry/exit totals of one session, read under the write lock.
    pub async fn totals_for_session_locked(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> DbResult<MovementTotals> {
        session_totals(conn, session_id).await
    }

    /// Entry/exit totals of the movements tied to a sale, read under the
    /// write lock.
    pub async fn totals_for_sale_locked(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<MovementTotals> {
        let totals = sqlx::query_as::<_, MovementTotals>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN movement_type = 'entry' THEN amount_cents END), 0) AS entries_cents,
                COALESCE(SUM(CASE WHEN movement_type = 'exit' THEN amount_cents END), 0) AS exits_cents
            FROM cash_movements
            WHERE sale_id = ?1
            "#,
        )
        .bind(sale_id)
        .fetch_one(conn)
        .await?;

        Ok(totals)
    }

    /// Entry/exit totals over all sessions opened within `[start, end]`, read
    /// on `conn`.
    pub async fn totals_for_sessions_opened_between(
        &self,
        conn: &mut SqliteConnection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<MovementTotals> {
        let totals = sqlx::query_as::<_, MovementTotals>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN m.movement_type = 'entry' THEN m.amount_cents END), 0) AS entries_cents,
                COALESCE(SUM(CASE WHEN m.movement_type = 'exit' THEN m.amount_cents END), 0) AS exits_cents
            FROM cash_movements m
            JOIN cash_sessions s ON s.id = m.session_id
            WHERE s.opened_at >= ?1 AND s.opened_at <= ?2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(conn)
        .await?;

        Ok(totals)
    }
}

async fn session_totals<'e, E>(executor: E, session_id: &str) -> DbResult<MovementTotals>
where
    E: Executor<'e, Database = Sqlite>,
{
    let totals = sqlx::query_as::<_, MovementTotals>(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN movement_type = 'entry' THEN amount_cents END), 0) AS entries_cents,
            COALESCE(SUM(CASE WHEN movement_type = 'exit' THEN amount_cents END), 0) AS exits_cents
        FROM cash_movements
        WHERE session_id = ?1
        "#,
    )
    .bind(session_id)
    .fetch_one(executor)
    .await?;

    Ok(totals)
}

// =============================================================================
// Unit Tests
// =============================================================================
