//! # till-db: Persistence Gateway for Till
//!
//! This crate provides database access for the Till transactional core.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Till Data Flow                                 │
//! │                                                                         │
//! │  till-engine use case (finalize_sale)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     till-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐   ┌────────────────────┐  ┌─────────────┐  │   │
//! │  │   │   Database    │   │    Repositories    │  │ Migrations  │  │   │
//! │  │   │   (pool.rs)   │   │                    │  │ (embedded)  │  │   │
//! │  │   │               │   │ CashSessionRepo    │  │             │  │   │
//! │  │   │ SqlitePool    │◄──│ CashMovementRepo   │  │ 001_init    │  │   │
//! │  │   │ LockedTx      │   │ SaleRepo           │  │             │  │   │
//! │  │   │ (tx.rs)       │   │ InstallmentRepo    │  │             │  │   │
//! │  │   │               │   │ OrderRepo/Product  │  │             │  │   │
//! │  │   └───────────────┘   └────────────────────┘  └─────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reads vs Locked Writes
//!
//! Repository methods that take only `&self` read through the pool and see
//! the last committed state. Methods that take a `&mut SqliteConnection`
//! are meant to run on [`LockedTransaction::conn`], where the write lock is
//! already held.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("till.db")).await?;
//!
//! let mut tx = db.begin_locked().await?;
//! let open = db.cash_sessions().find_open_locked(tx.conn()?).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod tx;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use tx::LockedTransaction;

// Repository re-exports for convenience
pub use repository::cash_movement::CashMovementRepository;
pub use repository::cash_session::CashSessionRepository;
pub use repository::installment::InstallmentRepository;
pub use repository::order::{NewOrderLine, OrderRepository};
pub use repository::product::{ProductRepository, StockChange};
pub use repository::sale::SaleRepository;

// =============================================================================
// Test Support
// =============================================================================
