//! # Engine Configuration
//!
//! Configuration for the sale engine, its database and its reports.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PHARMA_DB_PATH=/var/lib/pharmacy/ledger.db                         │
//! │     PHARMA_LOCK_TIMEOUT_MS=2000                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ledger/engine.toml (Linux)                               │
//! │     ~/Library/Application Support/com.pharma.ledger/engine.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine itself only ever receives the finished [`EngineConfig`];
//! files and environment are read at the edge by [`EngineConfig::load`].
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [database]
//! path = "/var/lib/pharmacy/ledger.db"
//! max_connections = 5
//! lock_timeout_ms = 5000
//!
//! [sales]
//! max_attempts = 3
//! initial_backoff_ms = 50
//! max_backoff_ms = 1000
//!
//! [reports]
//! expiry_horizon_days = 30
//! turnover_window_days = 180
//! turnover_top_n = 20
//! sales_trend_days = 90
//!
//! [logging]
//! filter = "info"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use pharma_core::{
    DEFAULT_EXPIRY_HORIZON_DAYS, DEFAULT_SALES_TREND_DAYS, DEFAULT_TURNOVER_WINDOW_DAYS,
    MAX_REPORT_WINDOW_DAYS, TURNOVER_TOP_N,
};
use pharma_db::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

/// Where the ledger lives and how long a seller may wait for a batch lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Upper bound on a batch lock wait (milliseconds).
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "pharma", "ledger")
        .map(|dirs| dirs.data_dir().join("pharmacy.db"))
        .unwrap_or_else(|| PathBuf::from("pharmacy.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_lock_timeout() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

impl DatabaseSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Builds the pool configuration for [`pharma_db::Database::new`].
    pub fn to_db_config(&self) -> DbConfig {
        DbConfig::new(&self.path)
            .max_connections(self.max_connections)
            .lock_timeout(self.lock_timeout())
    }
}

// =============================================================================
// Sale Settings
// =============================================================================

/// Retry behaviour for sales that hit a transient storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesSettings {
    /// Total attempts per sale, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff interval (milliseconds); doubles per retry.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Cap on a single backoff interval (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    50
}
fn default_max_backoff() -> u64 {
    1000
}

impl Default for SalesSettings {
    fn default() -> Self {
        SalesSettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

// =============================================================================
// Report Settings
// =============================================================================

/// Defaults applied when a report request leaves a parameter unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default = "default_expiry_horizon")]
    pub expiry_horizon_days: i64,

    #[serde(default = "default_turnover_window")]
    pub turnover_window_days: i64,

    #[serde(default = "default_turnover_top_n")]
    pub turnover_top_n: usize,

    #[serde(default = "default_sales_trend_days")]
    pub sales_trend_days: i64,
}

fn default_expiry_horizon() -> i64 {
    DEFAULT_EXPIRY_HORIZON_DAYS
}
fn default_turnover_window() -> i64 {
    DEFAULT_TURNOVER_WINDOW_DAYS
}
fn default_turnover_top_n() -> usize {
    TURNOVER_TOP_N
}
fn default_sales_trend_days() -> i64 {
    DEFAULT_SALES_TREND_DAYS
}

impl Default for ReportSettings {
    fn default() -> Self {
        ReportSettings {
            expiry_horizon_days: default_expiry_horizon(),
            turnover_window_days: default_turnover_window(),
            turnover_top_n: default_turnover_top_n(),
            sales_trend_days: default_sales_trend_days(),
        }
    }
}

// =============================================================================
// Logging Settings
// =============================================================================

/// Tracing subscriber settings. `RUST_LOG` wins over `filter` when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit one JSON object per event instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: default_log_filter(),
            json: false,
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sales: SalesSettings,

    #[serde(default)]
    pub reports: ReportSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
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

        if self.database.lock_timeout_ms == 0 {
            return Err(EngineError::Config(
                "database.lock_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.sales.max_attempts == 0 {
            return Err(EngineError::Config(
                "sales.max_attempts must be at least 1".into(),
            ));
        }

        if self.sales.initial_backoff_ms > self.sales.max_backoff_ms {
            return Err(EngineError::Config(format!(
                "sales.initial_backoff_ms ({}) exceeds sales.max_backoff_ms ({})",
                self.sales.initial_backoff_ms, self.sales.max_backoff_ms
            )));
        }

        let windows = [
            ("reports.expiry_horizon_days", self.reports.expiry_horizon_days, 0),
            ("reports.turnover_window_days", self.reports.turnover_window_days, 1),
            ("reports.sales_trend_days", self.reports.sales_trend_days, 1),
        ];
        for (field, days, min) in windows {
            if days < min || days > MAX_REPORT_WINDOW_DAYS {
                return Err(EngineError::Config(format!(
                    "{field} must be between {min} and {MAX_REPORT_WINDOW_DAYS}, got {days}"
                )));
            }
        }

        if self.reports.turnover_top_n == 0 {
            return Err(EngineError::Config(
                "reports.turnover_top_n must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `PHARMA_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup. Unparseable values are logged
    /// and ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("PHARMA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        override_parsed(&lookup, "PHARMA_DB_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed(&lookup, "PHARMA_LOCK_TIMEOUT_MS", &mut self.database.lock_timeout_ms);
        override_parsed(&lookup, "PHARMA_SALE_MAX_ATTEMPTS", &mut self.sales.max_attempts);
        override_parsed(&lookup, "PHARMA_EXPIRY_HORIZON_DAYS", &mut self.reports.expiry_horizon_days);
        override_parsed(&lookup, "PHARMA_TURNOVER_WINDOW_DAYS", &mut self.reports.turnover_window_days);

        if let Some(filter) = lookup("PHARMA_LOG") {
            self.logging.filter = filter;
        }

        if let Some(json) = lookup("PHARMA_LOG_JSON") {
            match json.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.logging.json = true,
                "0" | "false" | "no" => self.logging.json = false,
                _ => warn!(value = %json, "Unknown PHARMA_LOG_JSON value in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "pharma", "ledger")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => {
            debug!(key, value = %value, "Overriding setting from environment");
            *target = value;
        }
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}
