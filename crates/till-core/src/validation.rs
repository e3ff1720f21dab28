//! # Validation Module
//!
//! Input validation rules for cash sessions, movements and sales.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Upstream caller                                              │
//! │  └── Basic format checks, immediate user feedback                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: till-engine use case                                         │
//! │  └── THIS MODULE: business rule validation, before any lock is taken   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (amount_cents > 0), CHECK (current_stock >= 0)              │
//! │  └── UNIQUE open session, UNIQUE (sale_id, installment_number)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use till_core::money::Money;
//! use till_core::validation::{validate_operator, validate_movement_amount};
//!
//! assert!(validate_operator("U1").is_ok());
//! assert!(validate_movement_amount(Money::from_cents(5000)).is_ok());
//! assert!(validate_movement_amount(Money::zero()).is_err());
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::PaymentInfo;
use crate::MAX_TEXT_LENGTH;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a required free-text field and returns it trimmed.
pub fn validate_required_text(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    validate_text_length(field, value)?;
    Ok(value.to_string())
}

/// Validates an optional free-text field; blank input becomes `None`.
pub fn validate_optional_text(field: &str, value: Option<&str>) -> ValidationResult<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => {
            validate_text_length(field, v)?;
            Ok(Some(v.to_string()))
        }
    }
}

fn validate_text_length(field: &str, value: &str) -> ValidationResult<()> {
    if value.chars().count() > MAX_TEXT_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_LENGTH,
        });
    }
    Ok(())
}

/// Validates an operator reference.
///
/// ## Example
/// ```rust
/// use till_core::validation::validate_operator;
///
/// assert_eq!(validate_operator("  U1 ").unwrap(), "U1");
/// assert!(validate_operator("").is_err());
/// ```
pub fn validate_operator(operator_id: &str) -> ValidationResult<String> {
    validate_required_text("operator", operator_id)
}

// =============================================================================
// Amount Validators
// =============================================================================

/// Movement amounts are strictly positive; direction comes from the type.
pub fn validate_movement_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

/// Validates a balance or total that may be zero but never negative.
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a requested installment count against the configured ceiling.
pub fn validate_installment_count(count: u32, max: u32) -> ValidationResult<()> {
    if count == 0 || count > max {
        return Err(ValidationError::OutOfRange {
            field: "installments".to_string(),
            min: 1,
            max: i64::from(max),
        });
    }
    Ok(())
}

// =============================================================================
// Payment Validation
// =============================================================================

/// Validates payment data against the order's computed gross total.
///
/// ## Rules
/// ```text
/// operator           non-empty
/// gross_total        == Σ line amounts (± tolerance)
/// discount_total     0 ..= gross_total
/// amount_paid        >= 0
/// installments       1 ..= max_installments
/// installments == 1  amount_paid >= net_total
/// ```
pub fn validate_payment(
    payment: &PaymentInfo,
    computed_gross: Money,
    tolerance: Money,
    max_installments: u32,
) -> ValidationResult<()> {
    validate_operator(&payment.operator_id)?;
    validate_non_negative("gross_total", payment.gross_total())?;
    validate_non_negative("discount_total", payment.discount_total())?;
    validate_non_negative("amount_paid", payment.amount_paid())?;
    validate_installment_count(payment.installments, max_installments)?;
    if let Some(invoice_number) = &payment.invoice_number {
        validate_required_text("invoice_number", invoice_number)?;
    }

    if !computed_gross.within(payment.gross_total(), tolerance) {
        return Err(ValidationError::AmountMismatch {
            field: "gross_total".to_string(),
            expected: computed_gross.cents(),
            actual: payment.gross_total_cents,
        });
    }

    if payment.discount_total() > payment.gross_total() {
        return Err(ValidationError::invalid(
            "discount_total",
            format!(
                "{} exceeds gross total {}",
                payment.discount_total(),
                payment.gross_total()
            ),
        ));
    }

    if payment.installments == 1 && payment.amount_paid() < payment.net_total() {
        return Err(ValidationError::invalid(
            "amount_paid",
            format!(
                "{} does not cover net total {}",
                payment.amount_paid(),
                payment.net_total()
            ),
        ));
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
