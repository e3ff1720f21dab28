//! # till-engine: Transactional Use Cases for Till
//!
//! The register lifecycle and sale finalization, each public operation one
//! write-locked transaction wrapped in a retry policy.
//!
//! ## Module Organization
//! ```text
//! till_engine/
//! ├── lib.rs          ◄─── You are here (Engine facade)
//! ├── config.rs       ◄─── till.toml + TILL_* environment overrides
//! ├── error.rs        ◄─── EngineError taxonomy, ErrorKind codes
//! ├── retry.rs        ◄─── Jittered exponential backoff on lock contention
//! ├── journal.rs      ◄─── Cash movement journal (append inside a tx)
//! ├── session.rs      ◄─── CashSessionManager: open / movements / close
//! ├── ledger.rs       ◄─── InstallmentLedger: schedule / pay / cancel
//! ├── finalize.rs     ◄─── SaleFinalizer: finalize / cancel
//! ├── worker.rs       ◄─── Background execution with result tickets
//! └── telemetry.rs    ◄─── tracing-subscriber setup for binaries
//! ```
//!
//! ## Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine::connect                                │
//! │                                                                         │
//! │  EngineConfig ──► Database (pool + migrations)                         │
//! │                      │                                                  │
//! │        ┌─────────────┼──────────────────┬───────────────────┐          │
//! │        ▼             ▼                  ▼                   ▼          │
//! │   CashJournal   InstallmentLedger   CashSessionManager  SaleFinalizer  │
//! │        │             │                  ▲   (journal)    ▲  (journal,  │
//! │        └─────────────┴──────────────────┴────────────────┘   ledger)   │
//! │                                                                         │
//! │  Every component holds a clone of the same Database handle; there are  │
//! │  no process-wide singletons.                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```rust,ignore
//! let engine = Engine::connect(EngineConfig::load(None)?).await?;
//!
//! let session = engine.sessions().open("U1", Money::from_cents(10_000)).await?;
//! let sale = engine
//!     .sales()
//!     .finalize_sale(&order_id, PaymentInfo::cash("U1", gross, paid))
//!     .await?;
//! engine.sessions().close(&session.id, Some("eod")).await?;
//! ```

pub mod config;
pub mod error;
pub mod finalize;
pub mod journal;
pub mod ledger;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod worker;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use finalize::SaleFinalizer;
pub use journal::{CashJournal, JournalEntry};
pub use ledger::InstallmentLedger;
pub use retry::{with_retry, RetryPolicy};
pub use session::CashSessionManager;
pub use worker::{Ticket, Worker};

use tracing::info;
use till_db::Database;

/// Entry point wiring all use cases to one database.
///
/// Cloning is cheap and every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    config: EngineConfig,
    sessions: CashSessionManager,
    sales: SaleFinalizer,
    installments: InstallmentLedger,
}

impl Engine {
    /// Opens the database (running migrations) and wires the use cases.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        info!(path = %config.database.path.display(), "Engine connected");
        Ok(Engine::with_database(db, config))
    }

    /// Wires the use cases to an already opened database.
    pub fn with_database(db: Database, config: EngineConfig) -> Self {
        let retry = config.retry_policy();
        let journal = CashJournal::new(db.clone());
        let installments = InstallmentLedger::new(
            db.clone(),
            retry.clone(),
            config.installments.interval_days,
            config.installments.max_installments,
        );
        let sessions = CashSessionManager::new(db.clone(), journal.clone(), retry.clone());
        let sales = SaleFinalizer::new(
            db.clone(),
            journal,
            installments.clone(),
            retry,
            config.total_tolerance(),
            config.installments.max_installments,
            config.cancellation_policy(),
        );

        Engine {
            db,
            config,
            sessions,
            sales,
            installments,
        }
    }

    pub fn sessions(&self) -> &CashSessionManager {
        &self.sessions
    }

    pub fn sales(&self) -> &SaleFinalizer {
        &self.sales
    }

    pub fn installments(&self) -> &InstallmentLedger {
        &self.installments
    }

    /// The underlying database, for the externally owned tables
    /// (orders, products) and for tests.
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Closes the pool. Every later operation fails.
    pub async fn shutdown(&self) {
        self.db.close().await;
    }
}

// =============================================================================
// Test Support
// =============================================================================
