//! # Write-Locked Transactions
//!
//! SQLite has no `SELECT ... FOR UPDATE`. Instead, every read-modify-write
//! unit opens with `BEGIN IMMEDIATE`, which takes the database write lock
//! before the first statement runs.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Locked Read-Modify-Write                            │
//! │                                                                         │
//! │  Conn A                               Conn B                            │
//! │  ──────                               ──────                            │
//! │  BEGIN IMMEDIATE   ◄── write lock                                       │
//! │  SELECT open session                  BEGIN IMMEDIATE                   │
//! │  INSERT movement                        │ waits (busy_timeout)          │
//! │  UPDATE running balance                 │                               │
//! │  COMMIT            ──► lock released    ▼                               │
//! │                                       SELECT sees A's committed write   │
//! │                                                                         │
//! │  If B waits longer than busy_timeout: SQLITE_BUSY → LockTimeout         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every read made through [`LockedTransaction::conn`] is therefore a
//! locking read: no other writer can interleave between it and the write
//! that depends on it. Plain readers in WAL mode keep reading the last
//! committed snapshot and never observe a half-applied unit.

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// A `BEGIN IMMEDIATE` transaction on a dedicated pool connection.
///
/// Finish it with [`commit`](Self::commit), [`rollback`](Self::rollback) or
/// [`finish`](Self::finish). A transaction dropped unfinished (panic, early
/// return, cancelled future) detaches its connection from the pool and
/// closes it, which makes SQLite roll back. A connection with an open
/// transaction is never handed back to the pool.
#[derive(Debug)]
pub struct LockedTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl LockedTransaction {
    /// Acquires a connection and the database write lock.
    ///
    /// ## Errors
    /// - `LockTimeout` if another writer holds the lock past busy_timeout
    /// - `PoolExhausted` if no connection frees up in time
    pub async fn begin(pool: &SqlitePool) -> DbResult<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        debug!("Write lock acquired");
        Ok(LockedTransaction { conn: Some(conn) })
    }

    /// The connection holding the lock.
    pub fn conn(&mut self) -> DbResult<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DbError::TransactionFailed("transaction already finished".to_string()))
    }

    /// Commits and returns the connection to the pool.
    pub async fn commit(mut self) -> DbResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Err(DbError::TransactionFailed(
                "transaction already finished".to_string(),
            ));
        };

        match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => {
                debug!("Transaction committed");
                Ok(())
            }
            Err(e) => {
                // closing the connection rolls the transaction back
                drop(conn.detach());
                Err(DbError::TransactionFailed(format!("commit failed: {}", e)))
            }
        }
    }

    /// Rolls back and returns the connection to the pool.
    pub async fn rollback(mut self) -> DbResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            drop(conn.detach());
            return Err(DbError::TransactionFailed(format!("rollback failed: {}", e)));
        }

        debug!("Transaction rolled back");
        Ok(())
    }

    /// Commits on `Ok`, rolls back on `Err`.
    ///
    /// A rollback failure is logged and the original error is returned.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed, connection discarded");
                }
                Err(e)
            }
        }
    }
}

impl Drop for LockedTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Locked transaction dropped without commit, discarding connection");
            drop(conn.detach());
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_db;
    use std::time::Duration;

    async fn count_products(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn insert_product(conn: &mut SqliteConnection, sku: &str) {
        sqlx::query(
            "INSERT INTO products (id, sku, name, price_cents, current_stock, is_active, created_at, updated_at)
             VALUES (?1, ?1, 'Test', 100, 1, 1, '2024-01-01T00:00:00+00:00', '2024-01-01T00:00:00+00:00')",
        )
        .bind(sku)
        .execute(conn)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let (_dir, db) = temp_db().await;

        let mut tx = LockedTransaction::begin(db.pool()).await.unwrap();
        insert_product(tx.conn().unwrap(), "A").await;
        tx.commit().await.unwrap();

        assert_eq!(count_products(db.pool()).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let (_dir, db) = temp_db().await;

        let mut tx = LockedTransaction::begin(db.pool()).await.unwrap();
        insert_product(tx.conn().unwrap(), "A").await;
        tx.rollback().await.unwrap();

        assert_eq!(count_products(db.pool()).await, 0);
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let (_dir, db) = temp_db().await;

        {
            let mut tx = LockedTransaction::begin(db.pool()).await.unwrap();
            insert_product(tx.conn().unwrap(), "A").await;
        }

        // the lock must be free again for the next writer
        let mut tx = LockedTransaction::begin(db.pool()).await.unwrap();
        insert_product(tx.conn().unwrap(), "B").await;
        tx.commit().await.unwrap();

        assert_eq!(count_products(db.pool()).await, 1);
    }

    #[tokio::test]
    async fn test_finish_routes_on_result() {
        let (_dir, db) = temp_db().await;

        let mut tx = LockedTransaction::begin(db.pool()).await.unwrap();
        insert_product(tx.conn().unwrap(), "A").await;
        let result: Result<(), DbError> = Err(DbError::not_found("Product", "X"));
        assert!(tx.finish(result).await.is_err());
        assert_eq!(count_products(db.pool()).await, 0);

        let mut tx = LockedTransaction::begin(db.pool()).await.unwrap();
        insert_product(tx.conn().unwrap(), "A").await;
        let value = tx.finish(Ok::<_, DbError>(7)).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(count_products(db.pool()).await, 1);
    }

    #[tokio::test]
    async fn test_second_writer_times_out() {
        let (_dir, db) = crate::test_support::temp_db_with(|c| {
            c.busy_timeout(Duration::from_millis(50))
        })
        .await;

        let holder = LockedTransaction::begin(db.pool()).await.unwrap();
        let err = LockedTransaction::begin(db.pool()).await.unwrap_err();
        assert!(matches!(err, DbError::LockTimeout(_)), "got {:?}", err);
        assert!(err.is_transient());

        holder.rollback().await.unwrap();
        assert!(LockedTransaction::begin(db.pool()).await.is_ok());
    }
}
