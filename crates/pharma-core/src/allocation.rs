//! # Allocation Policy
//!
//! Decides which batch funds a sale, and re-checks that decision once the
//! batch is locked.
//!
//! ## First-Expired-First-Out
//! ```text
//! medicine M, requested 5, today = D
//!
//!   LOT-X  expiry D-1   qty 80   ✗ expired
//!   LOT-A  expiry D+10  qty 5    ✓ ◄── picked (earliest eligible expiry)
//!   LOT-C  expiry D+10  qty 3    ✗ cannot fund 5 alone
//!   LOT-B  expiry D+40  qty 50   ✓
//! ```
//!
//! A sale is never split: only a batch holding the whole requested quantity
//! is eligible. Equal expiry dates are ordered by receipt time, then by id,
//! so the same ledger state always yields the same batch.

use chrono::NaiveDate;
use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult};
use crate::types::StockBatch;
use crate::validation::validate_quantity;

// =============================================================================
// Selection
// =============================================================================

/// FEFO ordering: expiry, then receipt time, then id.
pub fn fefo_order(a: &StockBatch, b: &StockBatch) -> Ordering {
    a.expiry_date
        .cmp(&b.expiry_date)
        .then_with(|| a.received_at.cmp(&b.received_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Picks the batch to sell `quantity` units of `medicine_id` from.
///
/// Batches of other medicines in `batches` are ignored, so callers may pass
/// an unfiltered snapshot.
///
/// ## Errors
/// - `Validation` when `quantity <= 0`
/// - `NoAvailableStock` when no single unexpired batch holds `quantity`
pub fn select_fefo<'a>(
    batches: &'a [StockBatch],
    medicine_id: &str,
    quantity: i64,
    as_of: NaiveDate,
) -> CoreResult<&'a StockBatch> {
    validate_quantity(quantity)?;

    batches
        .iter()
        .filter(|b| b.medicine_id == medicine_id)
        .filter(|b| b.can_fund(quantity, as_of))
        .min_by(|a, b| fefo_order(a, b))
        .ok_or_else(|| CoreError::NoAvailableStock {
            medicine_id: medicine_id.to_string(),
            requested: quantity,
        })
}

// =============================================================================
// Re-checks Under Lock
// =============================================================================

/// Verifies a locked batch can still fund the sale.
///
/// Expiry is checked before quantity: an expired batch is reported as
/// expired even when it is also short.
pub fn check_sellable(batch: &StockBatch, quantity: i64, today: NaiveDate) -> CoreResult<()> {
    if batch.is_expired(today) {
        return Err(CoreError::ExpiredBatch {
            batch_id: batch.id.clone(),
            expiry_date: batch.expiry_date,
            today,
        });
    }

    if batch.quantity < quantity {
        return Err(CoreError::InsufficientStock {
            batch_id: batch.id.clone(),
            available: batch.quantity,
            requested: quantity,
        });
    }

    Ok(())
}

/// Verifies a pinned batch belongs to the medicine being sold.
pub fn check_belongs_to(batch: &StockBatch, medicine_id: &str) -> CoreResult<()> {
    if batch.medicine_id != medicine_id {
        return Err(CoreError::BatchMedicineMismatch {
            batch_id: batch.id.clone(),
            expected: medicine_id.to_string(),
            actual: batch.medicine_id.clone(),
        });
    }
    Ok(())
}

/// Returns the batch with `quantity` units removed.
///
/// Callers run [`check_sellable`] first; the result is still guarded so a
/// negative remainder can never be produced.
pub fn deduct(batch: &StockBatch, quantity: i64) -> CoreResult<StockBatch> {
    validate_quantity(quantity)?;

    let remaining = batch.quantity - quantity;
    if remaining < 0 {
        return Err(CoreError::InsufficientStock {
            batch_id: batch.id.clone(),
            available: batch.quantity,
            requested: quantity,
        });
    }

    let mut updated = batch.clone();
    updated.quantity = remaining;
    updated.updated_at = chrono::Utc::now();
    Ok(updated)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use chrono::{Days, Duration};
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn batch(medicine: &str, expiry_offset: i64, qty: i64) -> StockBatch {
        let expiry = today() + Duration::days(expiry_offset);
        StockBatch::new(medicine, "LOT", expiry, qty, Money::from_cents(100))
    }

    #[test]
    fn test_picks_nearest_expiry() {
        let b1 = batch("m", 10, 5);
        let b2 = batch("m", 40, 50);
        let batches = vec![b2.clone(), b1.clone()];

        let picked = select_fefo(&batches, "m", 5, today()).unwrap();
        assert_eq!(picked.id, b1.id);
    }

    #[test]
    fn test_skips_batches_that_cannot_fund_alone() {
        let small = batch("m", 5, 3);
        let large = batch("m", 60, 20);
        let batches = vec![small, large.clone()];

        let picked = select_fefo(&batches, "m", 4, today()).unwrap();
        assert_eq!(picked.id, large.id);
    }

    #[test]
    fn test_no_splitting_across_batches() {
        let batches = vec![batch("m", 5, 3), batch("m", 9, 3)];
        let err = select_fefo(&batches, "m", 5, today()).unwrap_err();
        assert_eq!(
            err,
            CoreError::NoAvailableStock {
                medicine_id: "m".to_string(),
                requested: 5
            }
        );
    }

    #[test]
    fn test_expired_sufficient_batch_is_ignored() {
        let batches = vec![batch("m", -1, 100), batch("m", 30, 2)];
        let err = select_fefo(&batches, "m", 10, today()).unwrap_err();
        assert!(matches!(err, CoreError::NoAvailableStock { .. }));
    }

    #[test]
    fn test_expiry_day_is_still_sellable() {
        let batches = vec![batch("m", 0, 1)];
        assert!(select_fefo(&batches, "m", 1, today()).is_ok());
    }

    #[test]
    fn test_ties_broken_by_receipt_then_id() {
        let mut older = batch("m", 10, 5);
        let mut newer = batch("m", 10, 5);
        older.received_at = newer.received_at - Duration::hours(1);
        let batches = vec![newer.clone(), older.clone()];
        assert_eq!(select_fefo(&batches, "m", 1, today()).unwrap().id, older.id);

        newer.received_at = older.received_at;
        older.id = "a".to_string();
        newer.id = "b".to_string();
        let batches = vec![newer, older];
        assert_eq!(select_fefo(&batches, "m", 1, today()).unwrap().id, "a");
    }

    #[test]
    fn test_other_medicines_ignored() {
        let batches = vec![batch("other", 1, 100)];
        assert!(select_fefo(&batches, "m", 1, today()).is_err());
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let batches = vec![batch("m", 10, 5)];
        assert!(matches!(
            select_fefo(&batches, "m", 0, today()),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_check_sellable_reports_expiry_first() {
        let expired = batch("m", -3, 0);
        let err = check_sellable(&expired, 5, today()).unwrap_err();
        assert!(matches!(err, CoreError::ExpiredBatch { .. }));

        let short = batch("m", 3, 2);
        assert_eq!(
            check_sellable(&short, 5, today()).unwrap_err(),
            CoreError::InsufficientStock {
                batch_id: short.id.clone(),
                available: 2,
                requested: 5
            }
        );
        assert!(check_sellable(&short, 2, today()).is_ok());
    }

    #[test]
    fn test_check_belongs_to() {
        let b = batch("m", 3, 2);
        assert!(check_belongs_to(&b, "m").is_ok());
        assert!(matches!(
            check_belongs_to(&b, "n"),
            Err(CoreError::BatchMedicineMismatch { .. })
        ));
    }

    #[test]
    fn test_deduct_to_zero() {
        let b = batch("m", 3, 10);
        let after = deduct(&b, 10).unwrap();
        assert_eq!(after.quantity, 0);
        assert!(deduct(&after, 1).is_err());
    }

    proptest! {
        /// Whatever the ledger holds, the picked batch is eligible and no
        /// eligible batch comes before it in FEFO order.
        #[test]
        fn prop_fefo_pick_is_minimal(
            specs in prop::collection::vec((-20i64..60, 0i64..20, 0u64..3), 0..12),
            requested in 1i64..15,
        ) {
            let batches: Vec<StockBatch> = specs
                .iter()
                .map(|(offset, qty, med)| {
                    let expiry = today() + Duration::days(*offset);
                    let medicine = format!("m{}", med);
                    StockBatch::new(medicine, "LOT", expiry, *qty, Money::from_cents(50))
                })
                .collect();

            match select_fefo(&batches, "m0", requested, today()) {
                Ok(picked) => {
                    prop_assert_eq!(&picked.medicine_id, "m0");
                    prop_assert!(picked.can_fund(requested, today()));
                    for other in batches.iter().filter(|b| b.medicine_id == "m0") {
                        if other.can_fund(requested, today()) {
                            prop_assert_ne!(fefo_order(other, picked), Ordering::Less);
                        }
                    }
                }
                Err(CoreError::NoAvailableStock { .. }) => {
                    prop_assert!(!batches
                        .iter()
                        .any(|b| b.medicine_id == "m0" && b.can_fund(requested, today())));
                }
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }

        /// Deduction never leaves a negative remainder.
        #[test]
        fn prop_deduct_never_negative(start in 0i64..50, take in 1i64..60) {
            let b = StockBatch::new("m", "LOT", today() + Days::new(5), start, Money::zero());
            match deduct(&b, take) {
                Ok(after) => prop_assert_eq!(after.quantity, start - take),
                Err(_) => prop_assert!(take > start),
            }
        }
    }
}
