//! # Error Types
//!
//! Domain-specific error types for pharma-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  pharma-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule rejections                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  pharma-db errors (separate crate)                                     │
//! │  └── DbError          - Persistence failures, lock timeouts            │
//! │                                                                         │
//! │  pharma-engine errors                                                  │
//! │  └── EngineError      - Rejected / Transient / Fatal taxonomy          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError::Rejected → caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant carries the identifiers a point-of-sale client needs to act
//! on the rejection (which batch, how much was available).

use chrono::NaiveDate;
use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations raised while allocating or selling stock.
///
/// None of these are retried automatically: the caller decides whether to
/// pick another batch or a smaller quantity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Medicine cannot be found in the catalog.
    #[error("Medicine not found: {0}")]
    MedicineNotFound(String),

    /// Stock batch cannot be found in the ledger.
    #[error("Stock batch not found: {0}")]
    BatchNotFound(String),

    /// The pinned batch does not hold enough units for the sale.
    ///
    /// ## User Workflow
    /// ```text
    /// sell(qty: 5, batch: LOT-A)
    ///      │
    ///      ▼
    /// lock LOT-A, re-read: remaining=3
    ///      │
    ///      ▼
    /// InsufficientStock { batch_id, available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// UI shows: "Only 3 units left in LOT-A"
    /// ```
    #[error("Insufficient stock in batch {batch_id}: available {available}, requested {requested}")]
    InsufficientStock {
        batch_id: String,
        available: i64,
        requested: i64,
    },

    /// The batch expired before the sale date.
    #[error("Batch {batch_id} expired on {expiry_date} (today is {today})")]
    ExpiredBatch {
        batch_id: String,
        expiry_date: NaiveDate,
        today: NaiveDate,
    },

    /// No single unexpired batch can cover the requested quantity.
    ///
    /// Raised even when several batches together would cover it: a sale is
    /// always funded from exactly one batch.
    #[error("No available stock for medicine {medicine_id}: no unexpired batch holds {requested} units")]
    NoAvailableStock { medicine_id: String, requested: i64 },

    /// A pinned batch belongs to another medicine.
    #[error("Batch {batch_id} belongs to medicine {actual}, not {expected}")]
    BatchMedicineMismatch {
        batch_id: String,
        expected: String,
        actual: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true for lookups that failed because an entity is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::MedicineNotFound(_) | CoreError::BatchNotFound(_)
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Used for early validation before any ledger access happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
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

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// A date that has not happened yet.
    #[error("{field} {date} is after today ({today})")]
    FutureDate {
        field: String,
        date: NaiveDate,
        today: NaiveDate,
    },

    /// Invalid format (e.g., invalid UUID, malformed amount).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            batch_id: "b-1".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock in batch b-1: available 3, requested 5"
        );

        let err = CoreError::ExpiredBatch {
            batch_id: "b-2".to_string(),
            expiry_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            today: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Batch b-2 expired on 2026-03-01 (today is 2026-03-02)"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert!(!core_err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(CoreError::MedicineNotFound("m".into()).is_not_found());
        assert!(CoreError::BatchNotFound("b".into()).is_not_found());
        assert!(!CoreError::NoAvailableStock {
            medicine_id: "m".into(),
            requested: 1
        }
        .is_not_found());
    }
}
