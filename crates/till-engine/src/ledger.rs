//! # Installment Ledger
//!
//! Schedule generation and per-installment transitions.
//!
//! ## Installment States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Installment State Machine                           │
//! │                                                                         │
//! │              mark_overdue(d)                                            │
//! │   PENDING ─────────────────────► OVERDUE                                │
//! │     │  │     (due_date < d)       │  │                                  │
//! │     │  │                          │  │                                  │
//! │     │  └───────── pay ─────┐ ┌────┘  │                                  │
//! │     │                      ▼ ▼       │                                  │
//! │     │                      PAID      │                                  │
//! │     │                                │                                  │
//! │     └─────── cancel ──► CANCELLED ◄──┘ cancel                           │
//! │                                                                         │
//! │  PAID and CANCELLED are terminal.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;
use sqlx::SqliteConnection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;
use till_core::error::CoreError;
use till_core::schedule::build_schedule;
use till_core::validation::validate_installment_count;
use till_core::{Installment, InstallmentStatus, Sale, SaleStatus};
use till_db::Database;

/// Installment use cases.
#[derive(Debug, Clone)]
pub struct InstallmentLedger {
    db: Database,
    retry: RetryPolicy,
    interval_days: u32,
    max_installments: u32,
}

impl InstallmentLedger {
    pub fn new(db: Database, retry: RetryPolicy, interval_days: u32, max_installments: u32) -> Self {
        InstallmentLedger {
            db,
            retry,
            interval_days,
            max_installments,
        }
    }

    pub fn interval_days(&self) -> u32 {
        self.interval_days
    }

    /// Writes the schedule of `sale` inside the caller's transaction.
    pub(crate) async fn write_schedule(
        &self,
        conn: &mut SqliteConnection,
        sale: &Sale,
        count: u32,
    ) -> EngineResult<Vec<Installment>> {
        let shares = build_schedule(
            sale.net_total(),
            count,
            sale.created_at.date_naive(),
            self.interval_days,
        )?;

        let mut installments = Vec::with_capacity(shares.len());
        for share in shares {
            let installment = Installment {
                id: Uuid::new_v4().to_string(),
                sale_id: sale.id.clone(),
                installment_number: i64::from(share.number),
                total_installments: i64::from(count),
                amount_cents: share.amount.cents(),
                due_date: share.due_date,
                paid_date: None,
                status: InstallmentStatus::Pending,
            };
            self.db.installments().insert(&mut *conn, &installment).await?;
            installments.push(installment);
        }

        Ok(installments)
    }

    /// Generates the schedule of an existing sale that has none yet.
    ///
    /// ## Errors
    /// - `Validation` - count out of range, net total too small to split
    /// - `NotFound` - unknown sale
    /// - `InvalidState` - sale cancelled
    /// - `Conflict` - sale already has installments
    #[instrument(skip(self))]
    pub async fn generate_schedule(
        &self,
        sale_id: &str,
        total_installments: u32,
    ) -> EngineResult<Vec<Installment>> {
        validate_installment_count(total_installments, self.max_installments)?;

        let installments = self
            .retry
            .run("generate_schedule", move |_| {
                self.try_generate(sale_id, total_installments)
            })
            .await?;

        info!(sale_id = %sale_id, count = installments.len(), "Installment schedule generated");
        Ok(installments)
    }

    async fn try_generate(&self, sale_id: &str, count: u32) -> EngineResult<Vec<Installment>> {
        let mut tx = self.db.begin_locked().await?;
        let result: EngineResult<Vec<Installment>> = async {
            let conn = tx.conn()?;
            let sale = self
                .db
                .sales()
                .get_by_id_locked(&mut *conn, sale_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;

            if sale.status == SaleStatus::Cancelled {
                return Err(CoreError::invalid_transition(
                    "Sale",
                    &sale.id,
                    sale.status,
                    "generate installments",
                )
                .into());
            }

            let existing = self
                .db
                .installments()
                .count_for_sale_locked(&mut *conn, sale_id)
                .await?;
            if existing > 0 {
                return Err(EngineError::Conflict(format!(
                    "sale {} already has {} installments",
                    sale_id, existing
                )));
            }

            self.write_schedule(conn, &sale, count).await
        }
        .await;
        tx.finish(result).await
    }

    /// Settles a PENDING or OVERDUE installment.
    ///
    /// ## Errors
    /// - `NotFound` - unknown installment
    /// - `InvalidState` - already PAID or CANCELLED
    #[instrument(skip(self))]
    pub async fn pay(&self, installment_id: &str, paid_date: NaiveDate) -> EngineResult<Installment> {
        let installment = self
            .retry
            .run("pay_installment", move |_| {
                self.try_transition(installment_id, Transition::Pay(paid_date))
            })
            .await?;

        info!(
            installment_id = %installment.id,
            sale_id = %installment.sale_id,
            amount = %installment.amount(),
            "Installment paid"
        );
        Ok(installment)
    }

    /// Cancels a PENDING or OVERDUE installment.
    #[instrument(skip(self))]
    pub async fn cancel(&self, installment_id: &str) -> EngineResult<Installment> {
        let installment = self
            .retry
            .run("cancel_installment", move |_| {
                self.try_transition(installment_id, Transition::Cancel)
            })
            .await?;

        info!(installment_id = %installment.id, sale_id = %installment.sale_id, "Installment cancelled");
        Ok(installment)
    }

    async fn try_transition(&self, installment_id: &str, transition: Transition) -> EngineResult<Installment> {
        let mut tx = self.db.begin_locked().await?;
        let result: EngineResult<Installment> = async {
            let conn = tx.conn()?;
            let repo = self.db.installments();

            let installment = repo
                .get_by_id_locked(&mut *conn, installment_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Installment", installment_id))?;
            installment.ensure_settleable(transition.operation())?;

            let changed = match transition {
                Transition::Pay(date) => repo.mark_paid(&mut *conn, installment_id, date).await?,
                Transition::Cancel => repo.cancel(&mut *conn, installment_id).await?,
            };
            if !changed {
                return Err(EngineError::InvalidState(format!(
                    "installment {} changed state concurrently",
                    installment_id
                )));
            }

            repo.get_by_id_locked(conn, installment_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Installment", installment_id))
        }
        .await;
        tx.finish(result).await
    }

    /// Moves every PENDING installment due before `as_of` to OVERDUE.
    ///
    /// Returns how many changed. Running it again for the same date changes
    /// nothing.
    #[instrument(skip(self))]
    pub async fn mark_overdue(&self, as_of: NaiveDate) -> EngineResult<u64> {
        let changed = self
            .retry
            .run("mark_overdue", move |_| self.try_mark_overdue(as_of))
            .await?;

        info!(as_of = %as_of, changed, "Overdue installments marked");
        Ok(changed)
    }

    async fn try_mark_overdue(&self, as_of: NaiveDate) -> EngineResult<u64> {
        let mut tx = self.db.begin_locked().await?;
        let result: EngineResult<u64> = async {
            let conn = tx.conn()?;
            Ok(self.db.installments().mark_overdue(conn, as_of).await?)
        }
        .await;
        tx.finish(result).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, installment_id: &str) -> EngineResult<Installment> {
        self.db
            .installments()
            .get_by_id(installment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Installment", installment_id))
    }

    /// Schedule of a sale ordered by installment number.
    pub async fn list_for_sale(&self, sale_id: &str) -> EngineResult<Vec<Installment>> {
        Ok(self.db.installments().list_for_sale(sale_id).await?)
    }

    pub async fn list_by_status(&self, status: InstallmentStatus) -> EngineResult<Vec<Installment>> {
        Ok(self.db.installments().list_by_status(status).await?)
    }
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Pay(NaiveDate),
    Cancel,
}

impl Transition {
    fn operation(&self) -> &'static str {
        match self {
            Transition::Pay(_) => "pay",
            Transition::Cancel => "cancel",
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
