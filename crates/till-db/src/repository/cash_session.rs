//! # Cash Session Repository
//!
//! Database operations for register sessions.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Cash Session Lifecycle                             │
//! │                                                                         │
//! │  1. OPEN                                                               │
//! │     └── find_open_locked() == None → insert()                          │
//! │                                                                         │
//! │  2. MOVEMENTS                                                          │
//! │     └── apply_balance_delta(+entry / -exit) per journal append         │
//! │                                                                         │
//! │  3. CLOSE                                                              │
//! │     └── close() → status closed, closed_at + closing balance stamped   │
//! │                                                                         │
//! │  Every UPDATE is guarded by `status = 'open'`: a closed session is     │
//! │  never touched again.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::CashSession;

/// Repository for cash session database operations.
#[derive(Debug, Clone)]
pub struct CashSessionRepository {
    pool: SqlitePool,
}

impl CashSessionRepository {
    /// Creates a new CashSessionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CashSessionRepository { pool }
    }

    /// Gets a session by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CashSession>> {
        fetch_by_id(&self.pool, id).await
    }

    /// Gets a session by ID while holding the write lock.
    pub async fn get_by_id_locked(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<CashSession>> {
        fetch_by_id(conn, id).await
    }

    /// Returns the OPEN session, if any.
    pub async fn find_open(&self) -> DbResult<Option<CashSession>> {
        fetch_open(&self.pool).await
    }

    /// Returns the OPEN session while holding the write lock.
    pub async fn find_open_locked(&self, conn: &mut SqliteConnection) -> DbResult<Option<CashSession>> {
        fetch_open(conn).await
    }

    /// Sessions opened within `[start, end]`, oldest first, read on `conn` so
    /// the caller can pair it with other reads of the same snapshot.
    pub async fn list_opened_between(
        &self,
        conn: &mut SqliteConnection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<Vec<CashSession>> {
        let sessions = sqlx::query_as::<_, CashSession>(
            r#"
            SELECT
                id, operator_id, opened_at, closed_at,
                opening_balance_cents, current_balance_cents, closing_balance_cents,
                status, note
            FROM cash_sessions
            WHERE opened_at >= ?1 AND opened_at <= ?2
            ORDER BY opened_at, rowid
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(conn)
        .await?;

        Ok(sessions)
    }

    /// Inserts a new session.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - another session is already OPEN
    pub async fn insert(&self, conn: &mut SqliteConnection, session: &CashSession) -> DbResult<()> {
        debug!(id = %session.id, operator = %session.operator_id, "Inserting cash session");

        sqlx::query(
            r#"
            INSERT INTO cash_sessions (
                id, operator_id, opened_at, closed_at,
                opening_balance_cents, current_balance_cents, closing_balance_cents,
                status, note
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&session.id)
        .bind(&session.operator_id)
        .bind(session.opened_at)
        .bind(session.closed_at)
        .bind(session.opening_balance_cents)
        .bind(session.current_balance_cents)
        .bind(session.closing_balance_cents)
        .bind(session.status)
        .bind(&session.note)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Adds `delta_cents` (signed) to the running balance of an OPEN session.
    pub async fn apply_balance_delta(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        delta_cents: i64,
    ) -> DbResult<()> {
        debug!(id = %id, delta_cents, "Updating running balance");

        let result = sqlx::query(
            r#"
            UPDATE cash_sessions
            SET current_balance_cents = current_balance_cents + ?2
            WHERE id = ?1 AND status = 'open'
            "#,
        )
        .bind(id)
        .bind(delta_cents)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CashSession (open)", id));
        }

        Ok(())
    }

    /// Seals an OPEN session with its final balance.
    pub async fn close(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        closing_balance_cents: i64,
        closed_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> DbResult<()> {
        debug!(id = %id, closing_balance_cents, "Closing cash session");

        let result = sqlx::query(
            r#"
            UPDATE cash_sessions
            SET status = 'closed',
                closed_at = ?2,
                closing_balance_cents = ?3,
                current_balance_cents = ?3,
                note = COALESCE(?4, note)
            WHERE id = ?1 AND status = 'open'
            "#,
        )
        .bind(id)
        .bind(closed_at)
        .bind(closing_balance_cents)
        .bind(note)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CashSession (open)", id));
        }

        Ok(())
    }

    /// Number of OPEN sessions. Never more than one.
    pub async fn count_open(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cash_sessions WHERE status = 'open'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}

async fn fetch_by_id<'e, E>(executor: E, id: &str) -> DbResult<Option<CashSession>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let session = sqlx::query_as::<_, CashSession>(
        r#"
        SELECT
            id, operator_id, opened_at, closed_at,
            opening_balance_cents, current_balance_cents, closing_balance_cents,
            status, note
        FROM cash_sessions
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(session)
}

async fn fetch_open<'e, E>(executor: E) -> DbResult<Option<CashSession>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let session = sqlx::query_as::<_, CashSession>(
        r#"
        SELECT
            id, operator_id, opened_at, closed_at,
            opening_balance_cents, current_balance_cents, closing_balance_cents,
            status, note
        FROM cash_sessions
        WHERE status = 'open'
        LIMIT 1
        "#,
    )
    .fetch_optional(executor)
    .await?;

    Ok(session)
}

// =============================================================================
// Unit Tests
// =============================================================================
