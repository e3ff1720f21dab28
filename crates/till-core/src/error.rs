//! # Error Types
//!
//! Domain-specific error types for till-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  till-core errors (this file)                                          │
//! │  ├── CoreError        - Illegal transitions, stock rule violations     │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  till-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  till-engine errors                                                    │
//! │  └── EngineError      - The taxonomy upstream callers handle           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError ─┐                                  │
//! │                          DbError ───┴──► EngineError → Caller          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business rule errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A status transition that the entity's state machine forbids.
    ///
    /// ## When This Occurs
    /// - Closing a session that is already closed
    /// - Paying an installment that was cancelled
    /// - Cancelling a sale twice
    #[error("{entity} {id} is {current}, cannot {operation}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        current: String,
        operation: &'static str,
    },

    /// Insufficient stock to complete a sale.
    ///
    /// ## User Workflow
    /// ```text
    /// Finalize order (P × 3)
    ///      │
    ///      ▼
    /// Locked stock read: available=2
    ///      │
    ///      ▼
    /// InsufficientStock { product_id: "P", available: 2, requested: 3 }
    ///      │
    ///      ▼
    /// Whole transaction rolls back
    /// ```
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidTransition error.
    pub fn invalid_transition(
        entity: &'static str,
        id: impl Into<String>,
        current: impl std::fmt::Display,
        operation: &'static str,
    ) -> Self {
        CoreError::InvalidTransition {
            entity,
            id: id.into(),
            current: current.to_string(),
            operation,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These are the caller's fault and are never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Two amounts that should agree do not.
    #[error("{field} mismatch: expected {expected} cents, got {actual} cents")]
    AmountMismatch {
        field: String,
        expected: i64,
        actual: i64,
    },

    /// Invalid format or combination of values.
    #[error("{field} is invalid: {reason}")]
    Invalid { field: String, reason: String },
}

impl ValidationError {
    /// Creates a Required error.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Creates an Invalid error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
