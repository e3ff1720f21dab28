//! # Engine Error Types
//!
//! The error taxonomy upstream callers handle.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Caller's fault │  │  Domain state   │  │     Storage             │ │
//! │  │  (never retried)│  │ (never retried) │  │                         │ │
//! │  │                 │  │                 │  │  TransientContention ◄─┐│ │
//! │  │  Validation     │  │  InvalidState   │  │    (retried)           ││ │
//! │  │  NotFound       │  │  NoOpenSession  │  │  RetryExhausted ───────┘│ │
//! │  │                 │  │  Conflict       │  │  Persistence            │ │
//! │  │                 │  │  Insufficient-  │  │    (correlation id)     │ │
//! │  │                 │  │    Stock        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Config: startup only (bad till.toml / env override)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Mapping from lower layers
//! ```text
//! ValidationError              → Validation
//! CoreError::InvalidTransition → InvalidState
//! CoreError::InsufficientStock → InsufficientStock
//! DbError::LockTimeout         → TransientContention
//! DbError::PoolExhausted       → TransientContention
//! DbError::UniqueViolation     → Conflict
//! DbError::NotFound            → NotFound
//! everything else              → Persistence (logged with correlation id)
//! ```

use serde::Serialize;
use thiserror::Error;
use till_core::{CoreError, ValidationError};
use till_db::DbError;
use tracing::error;
use uuid::Uuid;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // =========================================================================
    // Domain State Errors
    // =========================================================================
    /// Transition not allowed from the entity's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The operation needs an OPEN cash session and there is none.
    #[error("No open cash session")]
    NoOpenSession,

    /// An invariant would be violated by the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A line asks for more units than are on hand.
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Lock-wait class failure. Retried by [`crate::retry::RetryPolicy`].
    #[error("Lock contention: {0}")]
    TransientContention(String),

    /// Every attempt hit lock contention. Nothing was changed.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    /// Unrecoverable storage failure. The transaction was rolled back.
    #[error("Persistence failure [{correlation_id}]: {message}")]
    Persistence {
        correlation_id: String,
        message: String,
    },

    // =========================================================================
    // Startup / Internal
    // =========================================================================
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task ended without producing a result.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable machine-readable error code.
///
/// ```json
/// { "code": "INSUFFICIENT_STOCK", "message": "Insufficient stock for ..." }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    NoOpenSession,
    Conflict,
    InsufficientStock,
    TransientContention,
    RetryExhausted,
    Persistence,
    Config,
    Internal,
}

impl EngineError {
    /// Creates a NotFound error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Persistence error with a fresh correlation id and logs it.
    pub fn persistence(message: impl Into<String>) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        let message = message.into();
        error!(correlation_id = %correlation_id, error = %message, "Persistence failure");
        EngineError::Persistence {
            correlation_id,
            message,
        }
    }

    /// The predicate fed to the retry combinator.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientContention(_))
    }

    /// Returns the stable code for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::NoOpenSession => ErrorKind::NoOpenSession,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            EngineError::TransientContention(_) => ErrorKind::TransientContention,
            EngineError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            EngineError::Persistence { .. } => ErrorKind::Persistence,
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::LockTimeout(msg) => EngineError::TransientContention(msg),
            DbError::PoolExhausted => {
                EngineError::TransientContention("connection pool exhausted".to_string())
            }
            DbError::UniqueViolation { field, .. } => {
                EngineError::Conflict(format!("duplicate {}", field))
            }
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::persistence(other.to_string()),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTransition { .. } => EngineError::InvalidState(err.to_string()),
            CoreError::InsufficientStock {
                product_id,
                available,
                requested,
            } => EngineError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            CoreError::Validation(v) => EngineError::Validation(v),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
