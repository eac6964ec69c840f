//! # Validation Module
//!
//! Input validation for sale requests, stock intake and report parameters.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Engine entry point                                           │
//! │  ├── THIS MODULE: shape checks (positive qty, well-formed ids)         │
//! │  └── Rejected before any ledger access                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Under the row lock (pharma-core::allocation)                 │
//! │  ├── Expiry re-check                                                   │
//! │  └── Remaining-quantity re-check                                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (quantity >= 0) on stock_batches                            │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use pharma_core::validation::{validate_quantity, validate_uuid};
//!
//! assert!(validate_quantity(5).is_ok());
//! assert!(validate_uuid("not-a-uuid", "batch_id").is_err());
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::types::SaleRequest;
use crate::MAX_REPORT_WINDOW_DAYS;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a UUID-formatted identifier.
pub fn validate_uuid(value: &str, field: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(value).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

/// Validates a medicine display name.
///
/// ## Rules
/// - Must not be empty
/// - At most 200 characters
pub fn validate_medicine_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a supplier lot label. Lot labels repeat across suppliers, so
/// only presence and length are checked.
pub fn validate_batch_number(batch_number: &str) -> ValidationResult<()> {
    let batch_number = batch_number.trim();

    if batch_number.is_empty() {
        return Err(ValidationError::Required {
            field: "batch_number".to_string(),
        });
    }

    if batch_number.chars().count() > 100 {
        return Err(ValidationError::TooLong {
            field: "batch_number".to_string(),
            max: 100,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a sale or restock quantity.
///
/// ## Example
/// ```rust
/// use pharma_core::validation::validate_quantity;
///
/// assert!(validate_quantity(1).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-3).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

/// Validates the on-hand quantity of a received batch. Zero is allowed: an
/// empty batch is kept as an inert record.
pub fn validate_stock_quantity(qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

/// Validates a price in cents. Zero is allowed (free samples).
pub fn validate_price_cents(cents: i64, field: &str) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a reorder level. Zero disables low-stock tracking.
pub fn validate_reorder_level(level: i64) -> ValidationResult<()> {
    if level < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "reorder_level".to_string(),
        });
    }

    Ok(())
}

/// Validates a report window length in days.
pub fn validate_window_days(days: i64, field: &str) -> ValidationResult<()> {
    if !(1..=MAX_REPORT_WINDOW_DAYS).contains(&days) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 1,
            max: MAX_REPORT_WINDOW_DAYS,
        });
    }

    Ok(())
}

// =============================================================================
// Date Validators
// =============================================================================

/// Validates an explicit sale date. Backdating is allowed; a future date is
/// not, since reports only read sales up to today.
pub fn validate_sale_date(sale_date: NaiveDate, today: NaiveDate) -> ValidationResult<()> {
    if sale_date > today {
        return Err(ValidationError::FutureDate {
            field: "sale_date".to_string(),
            date: sale_date,
            today,
        });
    }

    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates everything about a sale request that can be checked without
/// touching the ledger.
pub fn validate_sale_request(request: &SaleRequest) -> ValidationResult<()> {
    validate_uuid(&request.medicine_id, "medicine_id")?;
    validate_quantity(request.quantity)?;
    validate_price_cents(request.unit_price_cents, "unit_price")?;

    if let Some(batch_id) = &request.batch_id {
        validate_uuid(batch_id, "batch_id")?;
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;

    const MED: &str = "6f1c1d9e-2a43-4c84-9f0e-0b7a4b1f6d11";
    const BATCH: &str = "0d3c5a8e-51b2-4a8b-8d0e-3a2c7f9e1b22";

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid(MED, "medicine_id").is_ok());
        assert!(matches!(
            validate_uuid("", "medicine_id"),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_uuid("12345", "medicine_id"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_validate_batch_number() {
        assert!(validate_batch_number("LOT-2026-A").is_ok());
        assert!(validate_batch_number("  ").is_err());
        assert!(validate_batch_number(&"X".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_numbers() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_stock_quantity(0).is_ok());
        assert!(validate_stock_quantity(-1).is_err());
        assert!(validate_price_cents(0, "unit_price").is_ok());
        assert!(validate_price_cents(-1, "unit_price").is_err());
        assert!(validate_reorder_level(0).is_ok());
        assert!(validate_reorder_level(-1).is_err());
        assert!(validate_window_days(180, "window_days").is_ok());
        assert!(validate_window_days(0, "window_days").is_err());
        assert!(validate_window_days(MAX_REPORT_WINDOW_DAYS + 1, "window_days").is_err());
    }

    #[test]
    fn test_validate_sale_date() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 10).unwrap();
        assert!(validate_sale_date(today, today).is_ok());
        assert!(validate_sale_date(today.pred_opt().unwrap(), today).is_ok());
        assert!(matches!(
            validate_sale_date(today.succ_opt().unwrap(), today),
            Err(ValidationError::FutureDate { .. })
        ));
    }

    #[test]
    fn test_validate_sale_request() {
        let ok = SaleRequest::new(MED, 2, Money::from_cents(500)).from_batch(BATCH);
        assert!(validate_sale_request(&ok).is_ok());

        let zero_qty = SaleRequest::new(MED, 0, Money::from_cents(500));
        assert!(matches!(
            validate_sale_request(&zero_qty),
            Err(ValidationError::MustBePositive { .. })
        ));

        let negative_price = SaleRequest::new(MED, 1, Money::from_cents(-1));
        assert!(matches!(
            validate_sale_request(&negative_price),
            Err(ValidationError::MustNotBeNegative { .. })
        ));

        let bad_batch = SaleRequest::new(MED, 1, Money::zero()).from_batch("LOT-A");
        assert!(validate_sale_request(&bad_batch).is_err());
    }
}
