//! # till-core: Pure Business Logic for Till
//!
//! This crate holds the domain model of the register back office: cash
//! sessions, cash movements, sales, installments, and the rules that govern
//! how each of them may change. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Till Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Upstream callers (GUI / service layer)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Worker tickets                         │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    till-engine (use cases)                      │   │
//! │  │   CashSessionManager • SaleFinalizer • InstallmentLedger        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ till-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ schedule  │  │ validation│  │   │
//! │  │   │ Session   │  │   Money   │  │  shares   │  │   rules   │  │   │
//! │  │   │ Sale      │  │ tolerance │  │ due dates │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    till-db (Persistence Gateway)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain entities and status enums
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`schedule`] - Installment share and due-date arithmetic
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation rules
//!
//! ## Example Usage
//!
//! ```rust
//! use till_core::money::Money;
//! use till_core::schedule::split_into_shares;
//!
//! let net_total = Money::from_cents(2000); // $20.00
//! let shares = split_into_shares(net_total, 3).unwrap();
//!
//! let cents: Vec<i64> = shares.iter().map(|m| m.cents()).collect();
//! assert_eq!(cents, vec![667, 667, 666]);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod schedule;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default number of days between two installments.
pub const DEFAULT_INSTALLMENT_INTERVAL_DAYS: u32 = 30;

/// Upper bound for the number of installments of a single sale.
///
/// ## Business Reason
/// Four years of monthly payments. Configurable per deployment in
/// till-engine; this is the hard ceiling validation falls back to.
pub const MAX_INSTALLMENTS: u32 = 48;

/// Default tolerance (in cents) when comparing a computed total against a
/// caller-supplied one.
pub const DEFAULT_TOTAL_TOLERANCE_CENTS: i64 = 1;

/// Maximum length of free-text fields (descriptions, notes, reasons).
pub const MAX_TEXT_LENGTH: usize = 500;
