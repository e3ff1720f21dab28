//! # Cash Movement Journal
//!
//! Append-only entries and exits of a cash session.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Journal Append                                   │
//! │                                                                         │
//! │  inside the caller's LockedTransaction:                                │
//! │                                                                         │
//! │   session (locked read) ──► ensure OPEN                                │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   INSERT cash_movements (amount > 0, type = entry | exit)              │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   UPDATE cash_sessions SET current_balance += signed amount            │
//! │                                                                         │
//! │  Both rows commit together or not at all.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The journal never opens its own transaction: the session manager and the
//! sale finalizer each append as one step of their own locked unit.

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::EngineResult;
use till_core::validation::validate_movement_amount;
use till_core::{CashMovement, CashSession, Money, MovementTotals, MovementType, PaymentMethod};
use till_db::Database;

/// A movement to append.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub movement_type: MovementType,
    pub amount: Money,
    pub description: String,
    pub operator_id: String,
    pub payment_method: Option<PaymentMethod>,
    pub sale_id: Option<String>,
}

impl JournalEntry {
    pub fn new(
        movement_type: MovementType,
        amount: Money,
        description: impl Into<String>,
        operator_id: impl Into<String>,
    ) -> Self {
        JournalEntry {
            movement_type,
            amount,
            description: description.into(),
            operator_id: operator_id.into(),
            payment_method: None,
            sale_id: None,
        }
    }

    pub fn for_sale(mut self, sale_id: impl Into<String>, method: PaymentMethod) -> Self {
        self.sale_id = Some(sale_id.into());
        self.payment_method = Some(method);
        self
    }
}

/// The cash journal.
#[derive(Debug, Clone)]
pub struct CashJournal {
    db: Database,
}

impl CashJournal {
    pub fn new(db: Database) -> Self {
        CashJournal { db }
    }

    /// Appends `entry` to `session` and moves its running balance.
    ///
    /// `session` must have been read through `conn`, i.e. under the lock.
    pub(crate) async fn append(
        &self,
        conn: &mut SqliteConnection,
        session: &CashSession,
        entry: JournalEntry,
    ) -> EngineResult<CashMovement> {
        validate_movement_amount(entry.amount)?;
        session.ensure_open("record a movement")?;

        let movement = CashMovement {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            movement_type: entry.movement_type,
            amount_cents: entry.amount.cents(),
            description: entry.description,
            created_at: Utc::now(),
            operator_id: entry.operator_id,
            payment_method: entry.payment_method,
            sale_id: entry.sale_id,
        };

        self.db.cash_movements().insert(&mut *conn, &movement).await?;
        self.db
            .cash_sessions()
            .apply_balance_delta(&mut *conn, &session.id, movement.signed_amount().cents())
            .await?;

        Ok(movement)
    }

    /// Movements of a session, oldest first.
    pub async fn list(&self, session_id: &str) -> EngineResult<Vec<CashMovement>> {
        Ok(self.db.cash_movements().list_for_session(session_id).await?)
    }

    /// Movements produced by a sale.
    pub async fn list_for_sale(&self, sale_id: &str) -> EngineResult<Vec<CashMovement>> {
        Ok(self.db.cash_movements().list_for_sale(sale_id).await?)
    }

    /// Entry/exit totals of a session, read under the lock.
    pub(crate) async fn totals_locked(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> EngineResult<MovementTotals> {
        Ok(self
            .db
            .cash_movements()
            .totals_for_session_locked(conn, session_id)
            .await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
