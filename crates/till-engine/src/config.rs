//! # Engine Configuration
//!
//! Configuration management for the transactional core.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TILL_DB_PATH=/var/lib/till/till.db                                 │
//! │     TILL_CANCELLATION_POLICY=restock_and_refund                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/till/till.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.till.pos/till.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     3 attempts, 30-day installments, retain stock on cancel            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # till.toml
//! [database]
//! path = "till.db"
//! max_connections = 5
//! busy_timeout_ms = 250
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 50
//! max_delay_ms = 2000
//! jitter = 0.2
//!
//! [installments]
//! interval_days = 30
//! max_installments = 48
//!
//! [sales]
//! total_tolerance_cents = 1
//! cancellation_policy = "retain_stock_and_cash"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;
use till_core::{CancellationPolicy, Money};
use till_db::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

/// Where and how to open the SQLite database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the database file. Created if missing.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the write lock before it counts as
    /// contention and goes to the retry policy.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "till", "pos")
        .map(|dirs| dirs.data_dir().join("till.db"))
        .unwrap_or_else(|| PathBuf::from("till.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    250
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Backoff for lock-contended operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    50
}
fn default_max_delay() -> u64 {
    2_000
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

// =============================================================================
// Installment Settings
// =============================================================================

/// Installment schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallmentSettings {
    /// Days between two consecutive due dates.
    #[serde(default = "default_interval_days")]
    pub interval_days: u32,

    #[serde(default = "default_max_installments")]
    pub max_installments: u32,
}

fn default_interval_days() -> u32 {
    till_core::DEFAULT_INSTALLMENT_INTERVAL_DAYS
}

fn default_max_installments() -> u32 {
    till_core::MAX_INSTALLMENTS
}

impl Default for InstallmentSettings {
    fn default() -> Self {
        InstallmentSettings {
            interval_days: default_interval_days(),
            max_installments: default_max_installments(),
        }
    }
}

// =============================================================================
// Sales Settings
// =============================================================================

/// Sale finalization and cancellation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesSettings {
    /// Accepted difference between the order's line total and the gross
    /// total the caller sends.
    #[serde(default = "default_tolerance")]
    pub total_tolerance_cents: i64,

    #[serde(default)]
    pub cancellation_policy: CancellationPolicy,
}

fn default_tolerance() -> i64 {
    till_core::DEFAULT_TOTAL_TOLERANCE_CENTS
}

impl Default for SalesSettings {
    fn default() -> Self {
        SalesSettings {
            total_tolerance_cents: default_tolerance(),
            cancellation_policy: CancellationPolicy::default(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub installments: InstallmentSettings,

    #[serde(default)]
    pub sales: SalesSettings,
}

impl EngineConfig {
    /// Defaults with the database at `path`.
    pub fn with_database_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.database.path = path.into();
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (till.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(EngineError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(EngineError::Config(format!(
                "retry.jitter must be within [0, 1], got {}",
                self.retry.jitter
            )));
        }

        if self.installments.interval_days == 0 {
            return Err(EngineError::Config(
                "installments.interval_days must be greater than 0".into(),
            ));
        }

        if self.installments.max_installments == 0 {
            return Err(EngineError::Config(
                "installments.max_installments must be greater than 0".into(),
            ));
        }

        if self.sales.total_tolerance_cents < 0 {
            return Err(EngineError::Config(
                "sales.total_tolerance_cents must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`; unparsable values are logged and
    /// ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("TILL_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        override_parsed(&lookup, "TILL_DB_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed(&lookup, "TILL_BUSY_TIMEOUT_MS", &mut self.database.busy_timeout_ms);
        override_parsed(&lookup, "TILL_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_parsed(&lookup, "TILL_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms);
        override_parsed(&lookup, "TILL_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms);
        override_parsed(
            &lookup,
            "TILL_INSTALLMENT_INTERVAL_DAYS",
            &mut self.installments.interval_days,
        );
        override_parsed(
            &lookup,
            "TILL_CANCELLATION_POLICY",
            &mut self.sales.cancellation_policy,
        );
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "till", "pos")
            .map(|dirs| dirs.config_dir().join("till.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database settings as a till-db pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.retry.max_delay_ms,
            self.retry.jitter,
        )
    }

    pub fn total_tolerance(&self) -> Money {
        Money::from_cents(self.sales.total_tolerance_cents)
    }

    pub fn cancellation_policy(&self) -> CancellationPolicy {
        self.sales.cancellation_policy
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        match raw.parse::<T>() {
            Ok(value) => {
                debug!(key, value = %raw, "Overriding config from environment");
                *target = value;
            }
            Err(e) => warn!(key, value = %raw, error = %e, "Ignoring invalid environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.installments.interval_days, 30);
        assert_eq!(config.installments.max_installments, 48);
        assert_eq!(config.cancellation_policy(), CancellationPolicy::RetainStockAndCash);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [database]
            path = "/tmp/till-test.db"

            [sales]
            cancellation_policy = "restock_and_refund"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/till-test.db"));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.cancellation_policy(), CancellationPolicy::RestockAndRefund);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config.apply_overrides(lookup(&[
            ("TILL_DB_PATH", "/data/till.db"),
            ("TILL_RETRY_MAX_ATTEMPTS", "5"),
            ("TILL_INSTALLMENT_INTERVAL_DAYS", "15"),
            ("TILL_CANCELLATION_POLICY", "reverse"),
            ("TILL_BUSY_TIMEOUT_MS", "not-a-number"),
        ]));

        assert_eq!(config.database.path, PathBuf::from("/data/till.db"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.installments.interval_days, 15);
        assert_eq!(config.cancellation_policy(), CancellationPolicy::RestockAndRefund);
        // invalid values are ignored
        assert_eq!(config.database.busy_timeout_ms, 250);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
        config.retry.max_attempts = 3;

        config.retry.base_delay_ms = 5_000;
        assert!(config.validate().is_err());
        config.retry.base_delay_ms = 50;

        config.retry.jitter = 1.5;
        assert!(config.validate().is_err());
        config.retry.jitter = 0.2;

        config.installments.interval_days = 0;
        assert!(config.validate().is_err());
        config.installments.interval_days = 30;

        config.installments.max_installments = 0;
        assert!(config.validate().is_err());
        config.installments.max_installments = 12;

        config.database.max_connections = 0;
        assert!(config.validate().is_err());
        config.database.max_connections = 1;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("till.toml");

        let mut config = EngineConfig::with_database_path("/srv/till.db");
        config.installments.interval_days = 14;
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[installments]"));
        assert!(contents.contains("[sales]"));

        let loaded: EngineConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.installments.interval_days, 14);
        assert_eq!(loaded.database.path, PathBuf::from("/srv/till.db"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("till.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = \"three\"\n").unwrap();

        let err = EngineConfig::load(Some(path)).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let config = EngineConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay(0), Duration::from_millis(50));
    }
}
