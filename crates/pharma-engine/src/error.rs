//! # Engine Error Types
//!
//! The caller-facing error taxonomy for sales, allocation and reports.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌─────────────────────┐  ┌────────────────┐  │
//! │  │  Rejected           │  │  Transient          │  │  Fatal         │  │
//! │  │                     │  │                     │  │                │  │
//! │  │  InsufficientStock  │  │  LockTimeout        │  │  constraint    │  │
//! │  │  ExpiredBatch       │  │  PoolExhausted      │  │  query/commit  │  │
//! │  │  NoAvailableStock   │  │  ConnectionFailed   │  │  migration     │  │
//! │  │  NotFound           │  │                     │  │                │  │
//! │  │  Validation         │  │  retried with       │  │  surfaced      │  │
//! │  │                     │  │  backoff, then      │  │  immediately   │  │
//! │  │  never retried      │  │  surfaced           │  │                │  │
//! │  └─────────────────────┘  └─────────────────────┘  └────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pharma_core::CoreError;
use pharma_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A business rule or input check refused the request. Nothing was
    /// written.
    #[error("Rejected: {0}")]
    Rejected(#[from] CoreError),

    /// Storage was temporarily unavailable (lock wait exceeded, pool or
    /// connection trouble). Retrying later may succeed.
    #[error("Transient failure after {attempts} attempt(s): {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: DbError,
    },

    /// Storage failed in a way retrying will not fix.
    #[error("Storage failure: {0}")]
    Fatal(DbError),

    /// Invalid or unreadable engine configuration.
    #[error("Invalid engine configuration: {0}")]
    Config(String),

    /// A report could not be rendered as JSON.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Flat classification for clients that branch on the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientStock,
    ExpiredBatch,
    NoAvailableStock,
    LockTimeout,
    NotFound,
    Validation,
    /// Pool or connection trouble; retryable like `LockTimeout`.
    Unavailable,
    Fatal,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl EngineError {
    /// Classifies a storage error raised on the given attempt.
    ///
    /// Missing rows become rejections so callers see the same `NotFound`
    /// whether the lookup failed before or under the lock.
    pub fn from_db(err: DbError, attempts: u32) -> Self {
        match err {
            DbError::NotFound { entity, id } => match entity.as_str() {
                "StockBatch" => EngineError::Rejected(CoreError::BatchNotFound(id)),
                "Medicine" => EngineError::Rejected(CoreError::MedicineNotFound(id)),
                _ => EngineError::Fatal(DbError::NotFound { entity, id }),
            },
            DbError::Validation(err) => EngineError::Rejected(CoreError::Validation(err)),
            err if err.is_transient() => EngineError::Transient {
                attempts,
                source: err,
            },
            err => EngineError::Fatal(err),
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        EngineError::from_db(err, 1)
    }
}

impl From<pharma_core::ValidationError> for EngineError {
    fn from(err: pharma_core::ValidationError) -> Self {
        EngineError::Rejected(CoreError::Validation(err))
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

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl EngineError {
    /// Returns true if the same request may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient { .. })
    }

    /// Returns true if a business rule refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, EngineError::Rejected(_))
    }

    /// Returns the flat classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Rejected(core) => match core {
                CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
                CoreError::ExpiredBatch { .. } => ErrorKind::ExpiredBatch,
                CoreError::NoAvailableStock { .. } => ErrorKind::NoAvailableStock,
                CoreError::MedicineNotFound(_) | CoreError::BatchNotFound(_) => ErrorKind::NotFound,
                CoreError::BatchMedicineMismatch { .. } | CoreError::Validation(_) => {
                    ErrorKind::Validation
                }
            },
            EngineError::Transient { source, .. } => match source {
                DbError::LockTimeout { .. } => ErrorKind::LockTimeout,
                _ => ErrorKind::Unavailable,
            },
            EngineError::Fatal(_) | EngineError::Serialization(_) => ErrorKind::Fatal,
            EngineError::Config(_) => ErrorKind::Validation,
        }
    }

    /// Number of attempts made before giving up, for transient failures.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            EngineError::Transient { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
