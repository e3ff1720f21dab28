//! # Tracing Setup
//!
//! Library code only emits events. Binaries (and the embedding application)
//! call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::error::{EngineError, EngineResult};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,till=debug,sqlx=warn";

/// Installs a global fmt subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=till_engine=trace` - Trace the engine only
/// - Default: `default_filter`
///
/// ## Errors
/// `Config` if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> EngineResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| EngineError::Config(format!("tracing already initialized: {}", e)))
}
