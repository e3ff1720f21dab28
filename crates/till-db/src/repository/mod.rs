//! # Repository Module
//!
//! Database repository implementations for Till.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Use case                                                              │
//! │       │                                                                 │
//! │       │  db.cash_sessions().find_open_locked(tx.conn()?)               │
//! │       ▼                                                                 │
//! │  CashSessionRepository                                                 │
//! │  ├── get_by_id(&self, id)                 ← pool, committed snapshot   │
//! │  ├── find_open_locked(&self, conn)        ← inside LockedTransaction   │
//! │  ├── insert(&self, conn, session)                                      │
//! │  └── close(&self, conn, id, ...)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Repositories are plain values built from an injected pool: no global  │
//! │  instances, one per table.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`cash_session::CashSessionRepository`] - Register sessions
//! - [`cash_movement::CashMovementRepository`] - Append-only cash journal
//! - [`sale::SaleRepository`] - Sales and invoice numbering
//! - [`installment::InstallmentRepository`] - Installment schedules
//! - [`order::OrderRepository`] - Orders and their lines (external)
//! - [`product::ProductRepository`] - Products and stock (external)

pub mod cash_movement;
pub mod cash_session;
pub mod installment;
pub mod order;
pub mod product;
pub mod sale;
