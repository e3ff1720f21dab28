//! # Sale Finalization
//!
//! Turns an OPEN order into a COMPLETED sale in one locked transaction.
//!
//! ## Finalization Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       finalize_sale(order, payment)                     │
//! │                                                                         │
//! │  BEGIN IMMEDIATE                                                       │
//! │   │                                                                     │
//! │   ├── 1. order OPEN?  lines non-empty?  Σ lines ≈ gross_total?         │
//! │   ├── 2. an OPEN cash session?                                         │
//! │   ├── 3. per line: stock -= qty   ──► short? InsufficientStock ──┐     │
//! │   ├── 4. INSERT sale (COMPLETED, invoice YYYYMMDD-NNNN)          │     │
//! │   ├── 5. installments > 1 ? INSERT schedule (PENDING)            │     │
//! │   ├── 6. amount_paid > 0 ? journal ENTRY amount_paid             │     │
//! │   └── 7. order.status = FINALIZED                                │     │
//! │                                                                  │     │
//! │  COMMIT ◄── all or nothing ──► ROLLBACK ◄────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Cancellation
//! ```text
//! cancel_sale(sale, reason)
//!   ├── sale COMPLETED → CANCELLED (cancelled_at, reason)
//!   ├── PENDING / OVERDUE installments → CANCELLED (PAID ones stay)
//!   ├── order → OPEN
//!   └── CancellationPolicy::RestockAndRefund only:
//!         ├── every line's stock += qty
//!         └── journal EXIT (cash the sale brought in) on the OPEN session
//! ```

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::journal::{CashJournal, JournalEntry};
use crate::ledger::InstallmentLedger;
use crate::retry::RetryPolicy;
use till_core::error::CoreError;
use till_core::validation::{validate_payment, validate_required_text};
use till_core::{
    CancellationPolicy, CashMovement, Installment, Money, MovementType, OrderLine, OrderStatus,
    PaymentInfo, Sale, SaleStatus, ValidationError,
};
use till_db::{Database, StockChange};

/// Sale finalization and cancellation use cases.
#[derive(Debug, Clone)]
pub struct SaleFinalizer {
    db: Database,
    journal: CashJournal,
    ledger: InstallmentLedger,
    retry: RetryPolicy,
    tolerance: Money,
    max_installments: u32,
    cancellation_policy: CancellationPolicy,
}

impl SaleFinalizer {
    pub fn new(
        db: Database,
        journal: CashJournal,
        ledger: InstallmentLedger,
        retry: RetryPolicy,
        tolerance: Money,
        max_installments: u32,
        cancellation_policy: CancellationPolicy,
    ) -> Self {
        SaleFinalizer {
            db,
            journal,
            ledger,
            retry,
            tolerance,
            max_installments,
            cancellation_policy,
        }
    }

    pub fn cancellation_policy(&self) -> CancellationPolicy {
        self.cancellation_policy
    }

    // =========================================================================
    // Finalize
    // =========================================================================

    /// Finalizes `order_id` with `payment`.
    ///
    /// ## Errors
    /// - `Validation` - bad payment data, empty order, totals disagree
    /// - `NotFound` - unknown order
    /// - `InvalidState` - order not OPEN
    /// - `NoOpenSession` - no cash session to receive the payment
    /// - `InsufficientStock` - some line asks for more than is on hand
    /// - `RetryExhausted` - lock contention on every attempt
    ///
    /// Any error leaves stock, sales, installments, the journal and the order
    /// exactly as they were.
    #[instrument(skip(self, payment), fields(operator = %payment.operator_id, gross = %payment.gross_total()))]
    pub async fn finalize_sale(&self, order_id: &str, payment: PaymentInfo) -> EngineResult<Sale> {
        let payment = &payment;
        let sale = self
            .retry
            .run("finalize_sale", move |_| self.try_finalize(order_id, payment))
            .await?;

        info!(
            sale_id = %sale.id,
            order_id = %sale.order_id,
            invoice = ?sale.invoice_number,
            net_total = %sale.net_total(),
            installments = sale.installment_count,
            "Sale finalized"
        );
        Ok(sale)
    }

    async fn try_finalize(&self, order_id: &str, payment: &PaymentInfo) -> EngineResult<Sale> {
        let mut tx = self.db.begin_locked().await?;
        let result: EngineResult<Sale> = async {
            let conn = tx.conn()?;
            self.finalize_locked(conn, order_id, payment).await
        }
        .await;
        tx.finish(result).await
    }

    async fn finalize_locked(
        &self,
        conn: &mut SqliteConnection,
        order_id: &str,
        payment: &PaymentInfo,
    ) -> EngineResult<Sale> {
        let orders = self.db.orders();

        let order = orders
            .get_by_id_locked(&mut *conn, order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;
        if order.status != OrderStatus::Open {
            return Err(
                CoreError::invalid_transition("Order", &order.id, order.status, "finalize").into(),
            );
        }

        let lines = orders.lines_locked(&mut *conn, order_id).await?;
        if lines.is_empty() {
            return Err(ValidationError::invalid("order", "has no lines").into());
        }

        let computed_gross: Money = lines.iter().map(OrderLine::amount).sum();
        validate_payment(payment, computed_gross, self.tolerance, self.max_installments)?;

        let session = self
            .db
            .cash_sessions()
            .find_open_locked(&mut *conn)
            .await?
            .ok_or(EngineError::NoOpenSession)?;

        for line in &lines {
            self.take_stock(&mut *conn, line).await?;
        }

        let now = Utc::now();
        let invoice_number = match &payment.invoice_number {
            Some(number) => number.trim().to_string(),
            None => {
                self.db
                    .sales()
                    .next_invoice_number(&mut *conn, now.date_naive())
                    .await?
            }
        };

        let takes_cash = payment.amount_paid().is_positive();
        let sale = Sale {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            customer_id: payment.customer_id.clone().or(order.customer_id.clone()),
            operator_id: payment.operator_id.trim().to_string(),
            session_id: takes_cash.then(|| session.id.clone()),
            created_at: now,
            gross_total_cents: payment.gross_total_cents,
            discount_total_cents: payment.discount_total_cents,
            net_total_cents: payment.net_total().cents(),
            amount_paid_cents: payment.amount_paid_cents,
            change_due_cents: payment.change_due().cents(),
            payment_method: payment.payment_method,
            installment_count: i64::from(payment.installments),
            status: SaleStatus::Completed,
            invoice_number: Some(invoice_number),
            cancelled_at: None,
            cancellation_reason: None,
        };
        self.db.sales().insert(&mut *conn, &sale).await?;

        if payment.installments > 1 {
            self.ledger
                .write_schedule(&mut *conn, &sale, payment.installments)
                .await?;
        }

        if takes_cash {
            let entry = JournalEntry::new(
                MovementType::Entry,
                payment.amount_paid(),
                format!("Sale {}", sale.invoice_number.as_deref().unwrap_or(&sale.id)),
                &sale.operator_id,
            )
            .for_sale(&sale.id, payment.payment_method);
            self.journal.append(&mut *conn, &session, entry).await?;
        }

        orders
            .set_status(conn, order_id, OrderStatus::Finalized)
            .await?;

        Ok(sale)
    }

    async fn take_stock(&self, conn: &mut SqliteConnection, line: &OrderLine) -> EngineResult<()> {
        match self
            .db
            .products()
            .decrement_stock(conn, &line.product_id, line.quantity)
            .await?
        {
            StockChange::Applied => Ok(()),
            StockChange::Insufficient { available } => Err(CoreError::InsufficientStock {
                product_id: line.product_id.clone(),
                available,
                requested: line.quantity,
            }
            .into()),
        }
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Cancels a COMPLETED sale under the configured policy.
    pub async fn cancel_sale(&self, sale_id: &str, reason: &str) -> EngineResult<Sale> {
        self.cancel_sale_with_policy(sale_id, reason, self.cancellation_policy)
            .await
    }

    /// Cancels a COMPLETED sale under an explicit policy.
    ///
    /// ## Errors
    /// - `Validation` - empty reason
    /// - `NotFound` - unknown sale
    /// - `InvalidState` - sale already CANCELLED
    /// - `NoOpenSession` - `RestockAndRefund` with cash to refund and no
    ///   OPEN session
    #[instrument(skip(self))]
    pub async fn cancel_sale_with_policy(
        &self,
        sale_id: &str,
        reason: &str,
        policy: CancellationPolicy,
    ) -> EngineResult<Sale> {
        let reason = validate_required_text("reason", reason)?;
        let reason = reason.as_str();

        let sale = self
            .retry
            .run("cancel_sale", move |_| self.try_cancel(sale_id, reason, policy))
            .await?;

        info!(sale_id = %sale.id, order_id = %sale.order_id, policy = %policy, "Sale cancelled");
        Ok(sale)
    }

    async fn try_cancel(
        &self,
        sale_id: &str,
        reason: &str,
        policy: CancellationPolicy,
    ) -> EngineResult<Sale> {
        let mut tx = self.db.begin_locked().await?;
        let result: EngineResult<Sale> = async {
            let conn = tx.conn()?;
            self.cancel_locked(conn, sale_id, reason, policy).await
        }
        .await;
        tx.finish(result).await
    }

    async fn cancel_locked(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
        reason: &str,
        policy: CancellationPolicy,
    ) -> EngineResult<Sale> {
        let sales = self.db.sales();

        let sale = sales
            .get_by_id_locked(&mut *conn, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
        sale.ensure_cancellable()?;

        sales.cancel(&mut *conn, sale_id, Utc::now(), reason).await?;

        let cancelled = self
            .db
            .installments()
            .cancel_unsettled_for_sale(&mut *conn, sale_id)
            .await?;

        self.db
            .orders()
            .set_status(&mut *conn, &sale.order_id, OrderStatus::Open)
            .await?;

        if policy == CancellationPolicy::RestockAndRefund {
            self.reverse_stock_and_cash(&mut *conn, &sale).await?;
        }

        debug!(sale_id = %sale_id, installments_cancelled = cancelled, "Sale cancellation applied");

        sales
            .get_by_id_locked(conn, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))
    }

    /// Puts the sold units back and refunds the cash the sale brought in.
    async fn reverse_stock_and_cash(&self, conn: &mut SqliteConnection, sale: &Sale) -> EngineResult<()> {
        let lines = self.db.orders().lines_locked(&mut *conn, &sale.order_id).await?;
        for line in &lines {
            self.db
                .products()
                .restock(&mut *conn, &line.product_id, line.quantity)
                .await?;
        }

        let received = self
            .db
            .cash_movements()
            .totals_for_sale_locked(&mut *conn, &sale.id)
            .await?
            .net();
        if !received.is_positive() {
            return Ok(());
        }

        let session = self
            .db
            .cash_sessions()
            .find_open_locked(&mut *conn)
            .await?
            .ok_or(EngineError::NoOpenSession)?;

        let entry = JournalEntry::new(
            MovementType::Exit,
            received,
            format!(
                "Refund of sale {}",
                sale.invoice_number.as_deref().unwrap_or(&sale.id)
            ),
            &sale.operator_id,
        )
        .for_sale(&sale.id, sale.payment_method);
        self.journal.append(conn, &session, entry).await?;

        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_sale(&self, sale_id: &str) -> EngineResult<Sale> {
        self.db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))
    }

    /// Latest sale made from an order, if any.
    pub async fn find_by_order(&self, order_id: &str) -> EngineResult<Option<Sale>> {
        Ok(self.db.sales().find_by_order(order_id).await?)
    }

    pub async fn sale_installments(&self, sale_id: &str) -> EngineResult<Vec<Installment>> {
        self.ledger.list_for_sale(sale_id).await
    }

    /// Cash movements a sale produced (its entry and any refund).
    pub async fn sale_movements(&self, sale_id: &str) -> EngineResult<Vec<CashMovement>> {
        self.journal.list_for_sale(sale_id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_order, temp_engine};
    use till_core::PaymentMethod;

    #[tokio::test]
    async fn test_finalize_requires_open_session() {
        let (_dir, engine) = temp_engine().await;
        let (order_id, product_id) = open_order(&engine, 5, 1000, 2).await;

        let err = engine
            .sales()
            .finalize_sale(&order_id, PaymentInfo::cash("U1", Money::from_cents(2000), Money::from_cents(2000)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoOpenSession));

        let product = engine.db().products().get_by_id(&product_id).await.unwrap().unwrap();
        assert_eq!(product.current_stock, 5);
        let order = engine.db().orders().get_by_id(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_finalize_validates_payment() {
        let (_dir, engine) = temp_engine().await;
        engine.sessions().open("U1", Money::zero()).await.unwrap();
        let (order_id, _) = open_order(&engine, 5, 1000, 2).await;
        let sales = engine.sales();

        // gross disagrees with the order
        let err = sales
            .finalize_sale(&order_id, PaymentInfo::cash("U1", Money::from_cents(1500), Money::from_cents(1500)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // single payment that does not cover the total
        let err = sales
            .finalize_sale(&order_id, PaymentInfo::cash("U1", Money::from_cents(2000), Money::from_cents(1000)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // one cent off is within tolerance
        let sale = sales
            .finalize_sale(&order_id, PaymentInfo::cash("U1", Money::from_cents(2001), Money::from_cents(2001)))
            .await
            .unwrap();
        assert_eq!(sale.gross_total_cents, 2001);
    }

    #[tokio::test]
    async fn test_finalize_twice_is_invalid_state() {
        let (_dir, engine) = temp_engine().await;
        engine.sessions().open("U1", Money::zero()).await.unwrap();
        let (order_id, _) = open_order(&engine, 5, 1000, 1).await;
        let payment = PaymentInfo::cash("U1", Money::from_cents(1000), Money::from_cents(1000));

        engine.sales().finalize_sale(&order_id, payment.clone()).await.unwrap();
        let err = engine.sales().finalize_sale(&order_id, payment).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = engine
            .sales()
            .finalize_sale("missing", PaymentInfo::cash("U1", Money::zero(), Money::zero()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_change_discount_and_invoice() {
        let (_dir, engine) = temp_engine().await;
        let session = engine.sessions().open("U1", Money::zero()).await.unwrap();
        let (order_id, _) = open_order(&engine, 5, 1000, 2).await;

        let payment = PaymentInfo::cash("U1", Money::from_cents(2000), Money::from_cents(2000))
            .with_discount(Money::from_cents(300));
        let sale = engine.sales().finalize_sale(&order_id, payment).await.unwrap();

        assert_eq!(sale.net_total_cents, 1700);
        assert_eq!(sale.change_due_cents, 300);
        assert_eq!(sale.session_id.as_deref(), Some(session.id.as_str()));
        let invoice = sale.invoice_number.clone().unwrap();
        assert_eq!(invoice, format!("{}-0001", sale.created_at.format("%Y%m%d")));

        let movements = engine.sales().sale_movements(&sale.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].amount_cents, 2000);
        assert_eq!(movements[0].payment_method, Some(PaymentMethod::Cash));
    }

    #[tokio::test]
    async fn test_credit_sale_without_down_payment_posts_no_movement() {
        let (_dir, engine) = temp_engine().await;
        let session = engine.sessions().open("U1", Money::from_cents(500)).await.unwrap();
        let (order_id, _) = open_order(&engine, 5, 1200, 1).await;

        let payment = PaymentInfo::cash("U1", Money::from_cents(1200), Money::zero())
            .with_method(PaymentMethod::Credit)
            .with_installments(4)
            .with_customer("C1");
        let sale = engine.sales().finalize_sale(&order_id, payment).await.unwrap();

        assert_eq!(sale.session_id, None);
        assert_eq!(sale.customer_id.as_deref(), Some("C1"));
        assert!(engine.sales().sale_movements(&sale.id).await.unwrap().is_empty());
        assert_eq!(engine.sessions().get(&session.id).await.unwrap().current_balance_cents, 500);

        let schedule = engine.sales().sale_installments(&sale.id).await.unwrap();
        assert_eq!(schedule.len(), 4);
        assert!(schedule.iter().all(|i| i.amount_cents == 300));
    }

    #[tokio::test]
    async fn test_cancel_requires_reason_and_existing_sale() {
        let (_dir, engine) = temp_engine().await;

        let err = engine.sales().cancel_sale("missing", "  ").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = engine.sales().cancel_sale("missing", "void").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
