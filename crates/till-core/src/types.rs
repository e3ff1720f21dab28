//! # Domain Types
//!
//! Core domain types used throughout Till.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  CashSession    │◄──│  CashMovement   │   │     Order       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  status         │   │  session_id     │   │  status         │       │
//! │  │  opening/closing│   │  ENTRY | EXIT   │   │  lines          │       │
//! │  └─────────────────┘   └─────────────────┘   └────────┬────────┘       │
//! │                                                       │ consumed 1:1   │
//! │                        ┌─────────────────┐   ┌────────▼────────┐       │
//! │                        │  Installment    │──►│      Sale       │       │
//! │                        │  ─────────────  │   │  ─────────────  │       │
//! │                        │  number / total │   │  net_total      │       │
//! │                        │  due_date       │   │  status         │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identifier References
//! Entities point at each other by id (`session_id`, `order_id`, `sale_id`)
//! and are resolved through repository lookups. No entity owns another in
//! memory.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;

// =============================================================================
// Cash Session
// =============================================================================

/// Lifecycle status of a cash session.
///
/// ```text
/// OPEN ──close()──► CLOSED   (terminal, never reopened)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CashSessionStatus {
    /// Accepting movements.
    Open,
    /// Balanced and sealed.
    Closed,
}

impl CashSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashSessionStatus::Open => "open",
            CashSessionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for CashSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded accounting period of one register, delimited by open/close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashSession {
    pub id: String,
    /// Operator who opened the session.
    pub operator_id: String,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    /// Set iff status is Closed.
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    pub opening_balance_cents: i64,
    /// Running balance: opening + entries - exits, updated with each movement.
    pub current_balance_cents: i64,
    /// Final balance, stamped on close.
    pub closing_balance_cents: Option<i64>,
    pub status: CashSessionStatus,
    pub note: Option<String>,
}

impl CashSession {
    #[inline]
    pub fn opening_balance(&self) -> Money {
        Money::from_cents(self.opening_balance_cents)
    }

    #[inline]
    pub fn current_balance(&self) -> Money {
        Money::from_cents(self.current_balance_cents)
    }

    #[inline]
    pub fn closing_balance(&self) -> Option<Money> {
        self.closing_balance_cents.map(Money::from_cents)
    }

    /// Balance at the end of the session, or the running balance while open.
    pub fn effective_balance(&self) -> Money {
        self.closing_balance().unwrap_or_else(|| self.current_balance())
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == CashSessionStatus::Open
    }

    /// Fails unless the session still accepts `operation`.
    pub fn ensure_open(&self, operation: &'static str) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::invalid_transition(
                "CashSession",
                &self.id,
                self.status,
                operation,
            ))
        }
    }
}

// =============================================================================
// Cash Movement
// =============================================================================

/// Direction of a cash movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Cash into the drawer.
    Entry,
    /// Cash out of the drawer.
    Exit,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Entry => "entry",
            MovementType::Exit => "exit",
        }
    }

    /// Applies the direction to an unsigned amount.
    #[inline]
    pub fn signed(&self, amount: Money) -> Money {
        match self {
            MovementType::Entry => amount,
            MovementType::Exit => -amount,
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded entry or exit within a session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashMovement {
    pub id: String,
    pub session_id: String,
    pub movement_type: MovementType,
    /// Always positive; direction comes from `movement_type`.
    pub amount_cents: i64,
    pub description: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub operator_id: String,
    pub payment_method: Option<PaymentMethod>,
    /// Sale that produced this movement, for sale-derived entries.
    pub sale_id: Option<String>,
}

impl CashMovement {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    /// Amount with the sign of its direction.
    #[inline]
    pub fn signed_amount(&self) -> Money {
        self.movement_type.signed(self.amount())
    }
}

/// Aggregated entries and exits of a set of movements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MovementTotals {
    pub entries_cents: i64,
    pub exits_cents: i64,
}

impl MovementTotals {
    #[inline]
    pub fn entries(&self) -> Money {
        Money::from_cents(self.entries_cents)
    }

    #[inline]
    pub fn exits(&self) -> Money {
        Money::from_cents(self.exits_cents)
    }

    /// Entries minus exits.
    #[inline]
    pub fn net(&self) -> Money {
        self.entries() - self.exits()
    }
}

/// Aggregate over all sessions opened within a period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PeriodBalance {
    /// Opening balance of the chronologically first session in range.
    pub opening_balance_cents: i64,
    /// Closing (or running, if still open) balance of the last session.
    pub closing_balance_cents: i64,
    pub total_entries_cents: i64,
    pub total_exits_cents: i64,
    /// total_entries - total_exits.
    pub net_balance_cents: i64,
    pub session_count: i64,
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on external terminal.
    ExternalCard,
    /// Store credit settled through installments.
    Credit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::ExternalCard => "external_card",
            PaymentMethod::Credit => "credit",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Order (externally owned)
// =============================================================================

/// Status of an order. Orders are owned by the ordering module; the sale
/// finalizer only flips their status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Finalized,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Finalized => "finalized",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collection of product lines pending payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub customer_id: Option<String>,
    pub status: OrderStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// One product line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderLine {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl OrderLine {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// unit_price × quantity.
    #[inline]
    pub fn amount(&self) -> Money {
        self.unit_price().multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Product (externally owned)
// =============================================================================

/// A product with its quantity on hand. Stock must never go negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    /// Stock Keeping Unit - business identifier.
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub current_stock: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Sale
// =============================================================================

/// The status of a sale. Transitions one-way COMPLETED → CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Sale has been paid and finalized.
    Completed,
    /// Sale was cancelled (soft state change).
    Cancelled,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Completed => "completed",
            SaleStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The financial record produced when an order is paid and finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    /// Order consumed by this sale (1:1).
    pub order_id: String,
    pub customer_id: Option<String>,
    pub operator_id: String,
    /// Session that received the cash entry, if one was registered.
    pub session_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub gross_total_cents: i64,
    pub discount_total_cents: i64,
    /// gross_total - discount_total.
    pub net_total_cents: i64,
    pub amount_paid_cents: i64,
    pub change_due_cents: i64,
    pub payment_method: PaymentMethod,
    pub installment_count: i64,
    pub status: SaleStatus,
    pub invoice_number: Option<String>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl Sale {
    #[inline]
    pub fn net_total(&self) -> Money {
        Money::from_cents(self.net_total_cents)
    }

    #[inline]
    pub fn amount_paid(&self) -> Money {
        Money::from_cents(self.amount_paid_cents)
    }

    /// Fails if the sale was already cancelled.
    pub fn ensure_cancellable(&self) -> CoreResult<()> {
        match self.status {
            SaleStatus::Completed => Ok(()),
            SaleStatus::Cancelled => Err(CoreError::invalid_transition(
                "Sale",
                &self.id,
                self.status,
                "cancel",
            )),
        }
    }
}

/// Payment data supplied when finalizing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentInfo {
    pub operator_id: String,
    pub customer_id: Option<String>,
    /// Must match Σ line amounts within tolerance.
    pub gross_total_cents: i64,
    pub discount_total_cents: i64,
    pub amount_paid_cents: i64,
    pub payment_method: PaymentMethod,
    /// 1 for a single payment; >1 generates an installment schedule.
    pub installments: u32,
    /// Assigned automatically when absent.
    pub invoice_number: Option<String>,
}

impl PaymentInfo {
    /// Single cash payment without discount.
    pub fn cash(operator_id: impl Into<String>, gross_total: Money, amount_paid: Money) -> Self {
        PaymentInfo {
            operator_id: operator_id.into(),
            customer_id: None,
            gross_total_cents: gross_total.cents(),
            discount_total_cents: 0,
            amount_paid_cents: amount_paid.cents(),
            payment_method: PaymentMethod::Cash,
            installments: 1,
            invoice_number: None,
        }
    }

    pub fn with_installments(mut self, installments: u32) -> Self {
        self.installments = installments;
        self
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount_total_cents = discount.cents();
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    /// Uses a caller-assigned invoice number instead of the daily sequence.
    pub fn with_invoice_number(mut self, invoice_number: impl Into<String>) -> Self {
        self.invoice_number = Some(invoice_number.into());
        self
    }

    #[inline]
    pub fn gross_total(&self) -> Money {
        Money::from_cents(self.gross_total_cents)
    }

    #[inline]
    pub fn discount_total(&self) -> Money {
        Money::from_cents(self.discount_total_cents)
    }

    #[inline]
    pub fn net_total(&self) -> Money {
        self.gross_total() - self.discount_total()
    }

    #[inline]
    pub fn amount_paid(&self) -> Money {
        Money::from_cents(self.amount_paid_cents)
    }

    /// Change handed back: amount_paid - net_total, floored at zero.
    pub fn change_due(&self) -> Money {
        let change = self.amount_paid() - self.net_total();
        if change.is_positive() {
            change
        } else {
            Money::zero()
        }
    }
}

// =============================================================================
// Installment
// =============================================================================

/// Status of a single installment.
///
/// ```text
/// PENDING ──markOverdue──► OVERDUE
///    │ │                     │ │
///    │ └──────pay────────────┼─┴──► PAID       (terminal)
///    └────────cancel─────────┴────► CANCELLED  (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Overdue => "overdue",
            InstallmentStatus::Cancelled => "cancelled",
        }
    }

    /// Pay and cancel are legal only from these states.
    #[inline]
    pub fn is_settleable(&self) -> bool {
        matches!(self, InstallmentStatus::Pending | InstallmentStatus::Overdue)
    }
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled partial payment of a sale's net total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Installment {
    pub id: String,
    pub sale_id: String,
    /// 1..=total_installments, unique per sale.
    pub installment_number: i64,
    pub total_installments: i64,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub due_date: NaiveDate,
    #[ts(as = "Option<String>")]
    pub paid_date: Option<NaiveDate>,
    pub status: InstallmentStatus,
}

impl Installment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    /// Fails unless the installment can still be paid or cancelled.
    pub fn ensure_settleable(&self, operation: &'static str) -> CoreResult<()> {
        if self.status.is_settleable() {
            Ok(())
        } else {
            Err(CoreError::invalid_transition(
                "Installment",
                &self.id,
                self.status,
                operation,
            ))
        }
    }
}

// =============================================================================
// Cancellation Policy
// =============================================================================

/// What cancelling a sale does to inventory and to the cash journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Soft status change only: stock stays decremented, the cash entry stays.
    #[default]
    RetainStockAndCash,
    /// Restore every line's stock and post a compensating EXIT on the open session.
    RestockAndRefund,
}

impl CancellationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationPolicy::RetainStockAndCash => "retain_stock_and_cash",
            CancellationPolicy::RestockAndRefund => "restock_and_refund",
        }
    }
}

impl fmt::Display for CancellationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancellationPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retain_stock_and_cash" | "retain" => Ok(CancellationPolicy::RetainStockAndCash),
            "restock_and_refund" | "reverse" => Ok(CancellationPolicy::RestockAndRefund),
            other => Err(ValidationError::invalid(
                "cancellation_policy",
                format!(
                    "unknown policy '{}', expected retain_stock_and_cash or restock_and_refund",
                    other
                ),
            )),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session(status: CashSessionStatus) -> CashSession {
        CashSession {
            id: "s-1".to_string(),
            operator_id: "U1".to_string(),
            opened_at: Utc::now(),
            closed_at: None,
            opening_balance_cents: 10000,
            current_balance_cents: 13000,
            closing_balance_cents: None,
            status,
            note: None,
        }
    }

    #[test]
    fn test_session_open_guard() {
        assert!(session(CashSessionStatus::Open).ensure_open("close").is_ok());

        let err = session(CashSessionStatus::Closed)
            .ensure_open("close")
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_effective_balance_prefers_closing() {
        let mut s = session(CashSessionStatus::Open);
        assert_eq!(s.effective_balance().cents(), 13000);

        s.closing_balance_cents = Some(12500);
        assert_eq!(s.effective_balance().cents(), 12500);
    }

    #[test]
    fn test_movement_sign() {
        let amount = Money::from_cents(2000);
        assert_eq!(MovementType::Entry.signed(amount).cents(), 2000);
        assert_eq!(MovementType::Exit.signed(amount).cents(), -2000);

        let totals = MovementTotals {
            entries_cents: 5000,
            exits_cents: 2000,
        };
        assert_eq!(totals.net().cents(), 3000);
    }

    #[test]
    fn test_installment_settleable_states() {
        assert!(InstallmentStatus::Pending.is_settleable());
        assert!(InstallmentStatus::Overdue.is_settleable());
        assert!(!InstallmentStatus::Paid.is_settleable());
        assert!(!InstallmentStatus::Cancelled.is_settleable());
    }

    #[test]
    fn test_payment_info_change_due() {
        let info = PaymentInfo::cash("U1", Money::from_cents(2000), Money::from_cents(2500));
        assert_eq!(info.change_due().cents(), 500);

        let discounted = info.clone().with_discount(Money::from_cents(200));
        assert_eq!(discounted.net_total().cents(), 1800);
        assert_eq!(discounted.change_due().cents(), 700);

        let short = PaymentInfo::cash("U1", Money::from_cents(2000), Money::from_cents(0));
        assert_eq!(short.change_due().cents(), 0);
    }

    #[test]
    fn test_order_line_amount() {
        let line = OrderLine {
            id: "l-1".to_string(),
            order_id: "o-1".to_string(),
            product_id: "P".to_string(),
            quantity: 2,
            unit_price_cents: 1000,
        };
        assert_eq!(line.amount().cents(), 2000);
    }

    #[test]
    fn test_cancellation_policy_parsing() {
        assert_eq!(
            "restock_and_refund".parse::<CancellationPolicy>().unwrap(),
            CancellationPolicy::RestockAndRefund
        );
        assert_eq!(
            "RETAIN".parse::<CancellationPolicy>().unwrap(),
            CancellationPolicy::RetainStockAndCash
        );
        assert!("refund-everything".parse::<CancellationPolicy>().is_err());
        assert_eq!(
            CancellationPolicy::default(),
            CancellationPolicy::RetainStockAndCash
        );
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&InstallmentStatus::Overdue).unwrap();
        assert_eq!(json, "\"overdue\"");
        let json = serde_json::to_string(&PaymentMethod::ExternalCard).unwrap();
        assert_eq!(json, "\"external_card\"");
    }
}
