//! # Batch Allocator
//!
//! Picks the batch a sale should be funded from, without side effects.
//!
//! ## Policy: First-Expiry, First-Out
//! ```text
//! medicine M, request 5 units, as_of 2026-05-01
//!
//!   LOT-A  exp 2026-04-20  qty 40   ✗ expired
//!   LOT-B  exp 2026-05-10  qty  3   ✗ too small (no splitting)
//!   LOT-C  exp 2026-06-15  qty 20   ✓ ← earliest qualifying expiry
//!   LOT-D  exp 2027-01-01  qty 90   ✓
//! ```
//!
//! The choice is only a candidate: reads are unlocked, so the coordinator
//! re-checks the batch once it holds the row lock.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use pharma_core::allocation::select_fefo;
use pharma_core::validation::validate_quantity;
use pharma_core::{BatchRef, CoreError, Medicine};
use pharma_db::StockLedger;

/// Selects batches for sales using the FEFO policy.
#[derive(Clone)]
pub struct BatchAllocator {
    ledger: Arc<dyn StockLedger>,
}

impl BatchAllocator {
    pub fn new(ledger: Arc<dyn StockLedger>) -> Self {
        BatchAllocator { ledger }
    }

    /// Returns the unexpired batch with the earliest expiry that alone holds
    /// at least `quantity` units of the medicine.
    ///
    /// ## Errors
    /// - `Validation` when `quantity <= 0`
    /// - `NotFound` when the medicine is not in the catalog
    /// - `NoAvailableStock` when no single batch qualifies
    pub async fn allocate(
        &self,
        medicine_id: &str,
        quantity: i64,
        as_of: NaiveDate,
    ) -> EngineResult<BatchRef> {
        validate_quantity(quantity)?;

        let medicine = self
            .ledger
            .find_medicine(medicine_id)
            .await?
            .ok_or_else(|| CoreError::MedicineNotFound(medicine_id.to_string()))?;

        self.allocate_for(&medicine, quantity, as_of).await
    }

    /// Same as [`allocate`](Self::allocate) for a medicine already looked up.
    pub(crate) async fn allocate_for(
        &self,
        medicine: &Medicine,
        quantity: i64,
        as_of: NaiveDate,
    ) -> EngineResult<BatchRef> {
        let candidates = self.ledger.list_available(&medicine.id, as_of).await?;
        let chosen = select_fefo(&candidates, &medicine.id, quantity, as_of)
            .map_err(EngineError::Rejected)?;

        debug!(
            medicine_id = %medicine.id,
            batch_id = %chosen.id,
            expiry = %chosen.expiry_date,
            available = chosen.quantity,
            requested = quantity,
            candidates = candidates.len(),
            "Batch allocated"
        );

        Ok(chosen.to_ref())
    }
}

impl std::fmt::Debug for BatchAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAllocator").finish_non_exhaustive()
    }
}
