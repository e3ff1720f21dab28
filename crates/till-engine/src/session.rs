//! # CashSession Manager
//!
//! Open/close lifecycle of the register and its balance.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cash Session State Machine                           │
//! │                                                                         │
//! │        open()                                close()                    │
//! │   ─────────────►  ┌────────┐  ─────────────────────►  ┌────────┐        │
//! │   (no other OPEN) │  OPEN  │                          │ CLOSED │        │
//! │                   └───┬────┘                          └────────┘        │
//! │                       │  ▲                              terminal        │
//! │          add_movement │  │ running balance ± amount                    │
//! │                       └──┘                                              │
//! │                                                                         │
//! │  At most one OPEN session exists at any time. Every mutator runs in    │
//! │  one LockedTransaction and is wrapped in the retry policy.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Closing Balance
//! `close` recomputes `opening + Σentries − Σexits` from the journal inside
//! the locked transaction. The journal wins if the stored running balance
//! disagrees.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::journal::{CashJournal, JournalEntry};
use crate::retry::RetryPolicy;
use till_core::validation::{
    validate_movement_amount, validate_non_negative, validate_operator, validate_optional_text,
};
use till_core::{
    CashMovement, CashSession, CashSessionStatus, Money, MovementType, PeriodBalance,
    ValidationError,
};
use till_db::{Database, DbError};

/// Cash session use cases.
#[derive(Debug, Clone)]
pub struct CashSessionManager {
    db: Database,
    journal: CashJournal,
    retry: RetryPolicy,
}

impl CashSessionManager {
    pub fn new(db: Database, journal: CashJournal, retry: RetryPolicy) -> Self {
        CashSessionManager { db, journal, retry }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens a new session.
    ///
    /// ## Errors
    /// - `Validation` - empty operator, negative opening balance
    /// - `Conflict` - another session is already OPEN
    #[instrument(skip(self), fields(opening = %opening_balance))]
    pub async fn open(&self, operator_id: &str, opening_balance: Money) -> EngineResult<CashSession> {
        let operator_id = validate_operator(operator_id)?;
        validate_non_negative("opening_balance", opening_balance)?;
        let operator_id = operator_id.as_str();

        let session = self
            .retry
            .run("open_session", move |_| self.try_open(operator_id, opening_balance))
            .await?;

        info!(session_id = %session.id, operator = %session.operator_id, opening = %opening_balance, "Cash session opened");
        Ok(session)
    }

    async fn try_open(&self, operator_id: &str, opening_balance: Money) -> EngineResult<CashSession> {
        let mut tx = self.db.begin_locked().await?;
        let result: EngineResult<CashSession> = async {
            let conn = tx.conn()?;
            if let Some(existing) = self.db.cash_sessions().find_open_locked(&mut *conn).await? {
                return Err(EngineError::Conflict(format!(
                    "cash session {} is already open",
                    existing.id
                )));
            }

            let session = CashSession {
                id: Uuid::new_v4().to_string(),
                operator_id: operator_id.to_string(),
                opened_at: Utc::now(),
                closed_at: None,
                opening_balance_cents: opening_balance.cents(),
                current_balance_cents: opening_balance.cents(),
                closing_balance_cents: None,
                status: CashSessionStatus::Open,
                note: None,
            };
            self.db.cash_sessions().insert(conn, &session).await?;
            Ok(session)
        }
        .await;
        tx.finish(result).await
    }

    /// Closes an OPEN session and seals its closing balance.
    ///
    /// ## Errors
    /// - `NotFound` - unknown session
    /// - `InvalidState` - session already CLOSED
    #[instrument(skip(self))]
    pub async fn close(&self, session_id: &str, note: Option<&str>) -> EngineResult<CashSession> {
        let note = validate_optional_text("note", note)?;
        let note = note.as_deref();

        let session = self
            .retry
            .run("close_session", move |_| self.try_close(session_id, note))
            .await?;

        info!(
            session_id = %session.id,
            closing = %session.effective_balance(),
            "Cash session closed"
        );
        Ok(session)
    }

    async fn try_close(&self, session_id: &str, note: Option<&str>) -> EngineResult<CashSession> {
        let mut tx = self.db.begin_locked().await?;
        let result: EngineResult<CashSession> = async {
            let conn = tx.conn()?;
            let repo = self.db.cash_sessions();

            let session = repo
                .get_by_id_locked(&mut *conn, session_id)
                .await?
                .ok_or_else(|| EngineError::not_found("CashSession", session_id))?;
            session.ensure_open("close")?;

            let totals = self.journal.totals_locked(&mut *conn, session_id).await?;
            let closing = session.opening_balance() + totals.net();
            if closing != session.current_balance() {
                warn!(
                    session_id = %session_id,
                    running = %session.current_balance(),
                    journal = %closing,
                    "Running balance drifted from journal, using journal total"
                );
            }

            repo.close(&mut *conn, session_id, closing.cents(), Utc::now(), note)
                .await?;

            repo.get_by_id_locked(conn, session_id)
                .await?
                .ok_or_else(|| EngineError::not_found("CashSession", session_id))
        }
        .await;
        tx.finish(result).await
    }

    /// Records a manual entry or exit on an OPEN session.
    ///
    /// ## Errors
    /// - `Validation` - amount not positive, description too long
    /// - `NotFound` - unknown session
    /// - `InvalidState` - session CLOSED
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn add_movement(
        &self,
        session_id: &str,
        movement_type: MovementType,
        amount: Money,
        description: &str,
    ) -> EngineResult<CashMovement> {
        validate_movement_amount(amount)?;
        let description = validate_optional_text("description", Some(description))?.unwrap_or_default();
        let description = description.as_str();

        let movement = self
            .retry
            .run("add_movement", move |_| {
                self.try_add_movement(session_id, movement_type, amount, description)
            })
            .await?;

        info!(
            session_id = %session_id,
            movement_id = %movement.id,
            movement_type = %movement.movement_type,
            amount = %amount,
            "Cash movement recorded"
        );
        Ok(movement)
    }

    async fn try_add_movement(
        &self,
        session_id: &str,
        movement_type: MovementType,
        amount: Money,
        description: &str,
    ) -> EngineResult<CashMovement> {
        let mut tx = self.db.begin_locked().await?;
        let result: EngineResult<CashMovement> = async {
            let conn = tx.conn()?;
            let session = self
                .db
                .cash_sessions()
                .get_by_id_locked(&mut *conn, session_id)
                .await?
                .ok_or_else(|| EngineError::not_found("CashSession", session_id))?;

            let entry = JournalEntry::new(movement_type, amount, description, &session.operator_id);
            self.journal.append(conn, &session, entry).await
        }
        .await;
        tx.finish(result).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The OPEN session, if any.
    pub async fn find_open_session(&self) -> EngineResult<Option<CashSession>> {
        Ok(self.db.cash_sessions().find_open().await?)
    }

    /// Gets a session by ID.
    pub async fn get(&self, session_id: &str) -> EngineResult<CashSession> {
        self.db
            .cash_sessions()
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CashSession", session_id))
    }

    /// Journal of a session, oldest first.
    pub async fn movements(&self, session_id: &str) -> EngineResult<Vec<CashMovement>> {
        self.get(session_id).await?;
        self.journal.list(session_id).await
    }

    /// Aggregates the sessions opened within `[start, end]`.
    ///
    /// Opening balance comes from the first session in range, closing
    /// balance from the last one (its running balance if still open).
    #[instrument(skip(self))]
    pub async fn compute_balance(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<PeriodBalance> {
        if start > end {
            return Err(ValidationError::invalid("period", "start is after end").into());
        }

        // one read transaction: sessions and totals come from the same snapshot
        let mut snapshot = self.db.pool().begin().await.map_err(DbError::from)?;
        let sessions = self
            .db
            .cash_sessions()
            .list_opened_between(&mut *snapshot, start, end)
            .await?;
        let totals = self
            .db
            .cash_movements()
            .totals_for_sessions_opened_between(&mut *snapshot, start, end)
            .await?;
        snapshot.commit().await.map_err(DbError::from)?;

        let (Some(first), Some(last)) = (sessions.first(), sessions.last()) else {
            return Ok(PeriodBalance::default());
        };

        Ok(PeriodBalance {
            opening_balance_cents: first.opening_balance_cents,
            closing_balance_cents: last.effective_balance().cents(),
            total_entries_cents: totals.entries_cents,
            total_exits_cents: totals.exits_cents,
            net_balance_cents: totals.net().cents(),
            session_count: sessions.len() as i64,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_engine;

    #[tokio::test]
    async fn test_open_rejects_bad_input() {
        let (_dir, engine) = temp_engine().await;
        let sessions = engine.sessions();

        let err = sessions.open("  ", Money::zero()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = sessions.open("U1", Money::from_cents(-1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        assert!(sessions.find_open_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_open_is_conflict() {
        let (_dir, engine) = temp_engine().await;
        let sessions = engine.sessions();

        let first = sessions.open("U1", Money::from_cents(100)).await.unwrap();
        let err = sessions.open("U2", Money::zero()).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let open = sessions.find_open_session().await.unwrap().unwrap();
        assert_eq!(open.id, first.id);
    }

    #[tokio::test]
    async fn test_movement_rules() {
        let (_dir, engine) = temp_engine().await;
        let sessions = engine.sessions();
        let session = sessions.open("U1", Money::from_cents(1000)).await.unwrap();

        let err = sessions
            .add_movement(&session.id, MovementType::Entry, Money::zero(), "nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = sessions
            .add_movement("missing", MovementType::Entry, Money::from_cents(5), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));

        let movement = sessions
            .add_movement(&session.id, MovementType::Exit, Money::from_cents(300), "  change fund ")
            .await
            .unwrap();
        assert_eq!(movement.description, "change fund");
        assert_eq!(movement.operator_id, "U1");

        let reread = sessions.get(&session.id).await.unwrap();
        assert_eq!(reread.current_balance_cents, 700);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_movements() {
        let (_dir, engine) = temp_engine().await;
        let sessions = engine.sessions();
        let session = sessions.open("U1", Money::zero()).await.unwrap();
        sessions.close(&session.id, None).await.unwrap();

        let err = sessions
            .add_movement(&session.id, MovementType::Entry, Money::from_cents(100), "late")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert!(sessions.movements(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_trusts_journal_over_running_balance() {
        let (_dir, engine) = temp_engine().await;
        let sessions = engine.sessions();
        let session = sessions.open("U1", Money::from_cents(1000)).await.unwrap();
        sessions
            .add_movement(&session.id, MovementType::Entry, Money::from_cents(500), "float")
            .await
            .unwrap();

        // corrupt the running balance behind the engine's back
        sqlx::query("UPDATE cash_sessions SET current_balance_cents = 99 WHERE id = ?1")
            .bind(&session.id)
            .execute(engine.db().pool())
            .await
            .unwrap();

        let closed = sessions.close(&session.id, Some("eod")).await.unwrap();
        assert_eq!(closed.closing_balance_cents, Some(1500));
        assert_eq!(closed.current_balance_cents, 1500);
    }

    #[tokio::test]
    async fn test_compute_balance_over_period() {
        let (_dir, engine) = temp_engine().await;
        let sessions = engine.sessions();
        let start = Utc::now() - chrono::Duration::seconds(1);

        let first = sessions.open("U1", Money::from_cents(10000)).await.unwrap();
        sessions
            .add_movement(&first.id, MovementType::Entry, Money::from_cents(5000), "sale")
            .await
            .unwrap();
        sessions.close(&first.id, None).await.unwrap();

        let second = sessions.open("U2", Money::from_cents(15000)).await.unwrap();
        sessions
            .add_movement(&second.id, MovementType::Exit, Money::from_cents(2500), "supplier")
            .await
            .unwrap();

        let end = Utc::now() + chrono::Duration::seconds(1);
        let balance = sessions.compute_balance(start, end).await.unwrap();
        assert_eq!(balance.session_count, 2);
        assert_eq!(balance.opening_balance_cents, 10000);
        // second session is still open: its running balance
        assert_eq!(balance.closing_balance_cents, 12500);
        assert_eq!(balance.total_entries_cents, 5000);
        assert_eq!(balance.total_exits_cents, 2500);
        assert_eq!(balance.net_balance_cents, 2500);
    }

    #[tokio::test]
    async fn test_compute_balance_empty_period() {
        let (_dir, engine) = temp_engine().await;
        let now = Utc::now();

        let balance = engine
            .sessions()
            .compute_balance(now - chrono::Duration::days(2), now - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(balance, PeriodBalance::default());

        let err = engine
            .sessions()
            .compute_balance(now, now - chrono::Duration::days(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_compute_balance_reads_one_committed_snapshot() {
        let (_dir, engine) = temp_engine().await;
        let start = Utc::now() - chrono::Duration::seconds(1);
        let session = engine.sessions().open("U1", Money::from_cents(1000)).await.unwrap();
        engine
            .sessions()
            .add_movement(&session.id, MovementType::Entry, Money::from_cents(400), "float")
            .await
            .unwrap();

        // a writer mid-flight: movement and balance bump not yet committed
        let journal = CashJournal::new(engine.db().clone());
        let mut tx = engine.db().begin_locked().await.unwrap();
        let conn = tx.conn().unwrap();
        let locked = engine
            .db()
            .cash_sessions()
            .get_by_id_locked(&mut *conn, &session.id)
            .await
            .unwrap()
            .unwrap();
        journal
            .append(
                conn,
                &locked,
                JournalEntry::new(MovementType::Entry, Money::from_cents(900), "pending", "U1"),
            )
            .await
            .unwrap();

        let balance = engine
            .sessions()
            .compute_balance(start, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(balance.session_count, 1);
        assert_eq!(balance.total_entries_cents, 400);
        assert_eq!(balance.closing_balance_cents, 1400);
        assert_eq!(
            balance.closing_balance_cents,
            balance.opening_balance_cents + balance.net_balance_cents
        );
    }
}
