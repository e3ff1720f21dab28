//! # Pool and Handle
//!
//! One `Database` per process (or per test), cloned into every component.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Readers and the Single Writer                        │
//! │                                                                         │
//! │   SqlitePool (max_connections, WAL, busy_timeout, foreign_keys)        │
//! │   ┌───────────────────────────────────────────────────────────────┐    │
//! │   │                                                               │    │
//! │   │  repo.get_by_id(..)      ──► any idle conn, committed snapshot│    │
//! │   │  repo.list_for_sale(..)  ──► any idle conn, committed snapshot│    │
//! │   │                                                               │    │
//! │   │  db.begin_locked()       ──► one conn + BEGIN IMMEDIATE       │    │
//! │   │      ├── writer #1 holds the lock                             │    │
//! │   │      ├── writer #2 waits up to busy_timeout ─► LockTimeout    │    │
//! │   │      └── no idle conn within connect_timeout ─► PoolExhausted │    │
//! │   └───────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::cash_movement::CashMovementRepository;
use crate::repository::cash_session::CashSessionRepository;
use crate::repository::installment::InstallmentRepository;
use crate::repository::order::OrderRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::tx::LockedTransaction;

// =============================================================================
// Configuration
// =============================================================================

/// How to open the database file and size its pool.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/till.db")
///     .max_connections(5)
///     .busy_timeout(Duration::from_millis(250));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Created on first connect.
    pub database_path: PathBuf,

    /// Default: 5
    pub max_connections: u32,

    /// Connections kept warm. Default: 1
    pub min_connections: u32,

    /// Pool acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long a writer waits for the write lock before SQLITE_BUSY.
    /// Default: 250 ms
    pub busy_timeout: Duration,

    /// Apply embedded migrations on connect. Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Defaults for a database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_millis(250),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the pool acquire timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the lock wait bound.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the pool; hands out repositories and locked transactions.
///
/// Cloning is cheap: the pool is reference counted. Repositories are
/// constructed per call from the shared pool, so there are no process-wide
/// singletons and tests can point a fresh `Database` at a throw-away file.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) the database file, builds the pool and applies
    /// pending migrations.
    ///
    /// ## Errors
    /// - `ConnectionFailed` - file cannot be opened or created
    /// - `MigrationFailed` - an embedded migration did not apply
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Opening till database"
        );

        let connect_options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // off by default in SQLite
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        debug!(busy_timeout_ms = config.busy_timeout.as_millis() as u64, "Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// The raw pool, for ad hoc reads and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a write-locked transaction on a pooled connection.
    pub async fn begin_locked(&self) -> DbResult<LockedTransaction> {
        LockedTransaction::begin(&self.pool).await
    }

    pub fn cash_sessions(&self) -> CashSessionRepository {
        CashSessionRepository::new(self.pool.clone())
    }

    pub fn cash_movements(&self) -> CashMovementRepository {
        CashMovementRepository::new(self.pool.clone())
    }

    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.pool.clone())
    }

    pub fn installments(&self) -> InstallmentRepository {
        InstallmentRepository::new(self.pool.clone())
    }

    /// Returns the order repository (externally owned table).
    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    /// Returns the product repository (externally owned table).
    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections and closes the pool. Later
    /// operations fail with `PoolExhausted` or `ConnectionFailed`.
    pub async fn close(&self) {
        info!("Closing till database");
        self.pool.close().await;
    }

    /// True when a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
