//! # Sale Transaction Coordinator
//!
//! Executes one sale as a single atomic unit of work.
//!
//! ## Sale Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sell(request)                                                          │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  validate (qty > 0, price >= 0, ids)        ── Rejected, never retried  │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ┌──────────────────── attempt loop ─────────────────────────────────┐  │
//! │  │ resolve medicine                                                  │  │
//! │  │ batch pinned? ── no ──► allocator (FEFO, unlocked read)           │  │
//! │  │ begin ► get_for_update(batch)            ── bounded lock wait     │  │
//! │  │ re-check under lock: owner, expiry, quantity                      │  │
//! │  │ update_batch(qty - n) + insert_sale(record)                       │  │
//! │  │ commit                                                            │  │
//! │  │                                                                   │  │
//! │  │ transient failure ► rollback, backoff, restart from allocation    │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two sellers racing for the same batch are serialized by the row lock;
//! the second one re-reads the quantity the first one left behind, so the
//! batch can never go negative.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::allocator::BatchAllocator;
use crate::clock::Clock;
use crate::config::SalesSettings;
use crate::error::{EngineError, EngineResult};
use pharma_core::allocation::{check_belongs_to, check_sellable, deduct};
use pharma_core::validation::{validate_sale_date, validate_sale_request};
use pharma_core::{CoreError, SaleRecord, SaleRequest};
use pharma_db::{DbError, StockLedger};

/// Runs sales against a stock ledger.
#[derive(Clone)]
pub struct SaleCoordinator {
    ledger: Arc<dyn StockLedger>,
    allocator: BatchAllocator,
    clock: Arc<dyn Clock>,
    settings: SalesSettings,
}

impl SaleCoordinator {
    pub fn new(ledger: Arc<dyn StockLedger>, clock: Arc<dyn Clock>, settings: SalesSettings) -> Self {
        SaleCoordinator {
            allocator: BatchAllocator::new(ledger.clone()),
            ledger,
            clock,
            settings,
        }
    }

    /// Sells `request.quantity` units from a single batch and returns the
    /// committed sale record.
    ///
    /// When `request.batch_id` is unset the batch is chosen by the FEFO
    /// allocator and re-chosen on every retry.
    ///
    /// ## Errors
    /// - `Rejected(Validation)` for malformed input, a future `sale_date` or a
    ///   batch of another medicine
    /// - `Rejected(MedicineNotFound | BatchNotFound)`
    /// - `Rejected(NoAvailableStock)` when no batch can fund an unpinned sale
    /// - `Rejected(ExpiredBatch | InsufficientStock)` from the re-check under lock
    /// - `Transient` once `max_attempts` transient failures have occurred
    /// - `Fatal` for any other storage failure
    #[instrument(
        skip(self, request),
        fields(
            medicine_id = %request.medicine_id,
            quantity = request.quantity,
            batch_id = request.batch_id.as_deref().unwrap_or("auto")
        )
    )]
    pub async fn sell(&self, request: SaleRequest) -> EngineResult<SaleRecord> {
        validate_sale_request(&request)?;
        if let Some(sale_date) = request.sale_date {
            validate_sale_date(sale_date, self.clock.today())?;
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.try_sell(&request, attempt).await {
                Ok(record) => {
                    info!(
                        sale_id = %record.id,
                        batch_id = %record.batch_id,
                        quantity = record.quantity,
                        attempt,
                        "Sale committed"
                    );
                    return Ok(record);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let wait = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_millis(self.settings.max_backoff_ms));
                    warn!(
                        error = %err,
                        attempt,
                        max_attempts,
                        backoff_ms = wait.as_millis() as u64,
                        "Transient failure, retrying sale"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    if err.is_rejection() {
                        warn!(error = %err, kind = ?err.kind(), "Sale rejected");
                    } else {
                        warn!(error = %err, attempt, "Sale failed");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// One attempt. Any early return drops the unit of work, which rolls it
    /// back and releases the row lock.
    async fn try_sell(&self, request: &SaleRequest, attempt: u32) -> EngineResult<SaleRecord> {
        let db = |err: DbError| EngineError::from_db(err, attempt);
        let today = self.clock.today();

        let medicine = self
            .ledger
            .find_medicine(&request.medicine_id)
            .await
            .map_err(db)?
            .ok_or_else(|| CoreError::MedicineNotFound(request.medicine_id.clone()))?;

        let batch_id = match &request.batch_id {
            Some(id) => id.clone(),
            None => {
                self.allocator
                    .allocate_for(&medicine, request.quantity, today)
                    .await
                    .map_err(|err| match err {
                        EngineError::Transient { source, .. } => EngineError::from_db(source, attempt),
                        other => other,
                    })?
                    .batch_id
            }
        };

        let mut tx = self.ledger.begin().await.map_err(db)?;
        let locked = tx.get_for_update(&batch_id).await.map_err(db)?;

        let checked = check_belongs_to(&locked, &medicine.id)
            .and_then(|()| check_sellable(&locked, request.quantity, today))
            .and_then(|()| deduct(&locked, request.quantity));

        let updated = match checked {
            Ok(updated) => updated,
            Err(rejection) => {
                if let Err(err) = tx.rollback().await {
                    warn!(error = %err, batch_id = %batch_id, "Rollback after rejection failed");
                }
                return Err(rejection.into());
            }
        };

        tx.update_batch(&updated).await.map_err(db)?;

        let record = request.clone().into_record(locked.id.clone(), today);
        tx.insert_sale(&record).await.map_err(db)?;
        tx.commit().await.map_err(db)?;

        Ok(record)
    }

    /// Exponential backoff between attempts of one sale.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.settings.initial_backoff_ms),
            max_interval: Duration::from_millis(self.settings.max_backoff_ms),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for SaleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaleCoordinator")
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use chrono::{Duration as Days, NaiveDate};
    use pharma_core::{DosageForm, Medicine, Money, StockBatch, ValidationError};
    use pharma_db::{Database, DbConfig, DbError, DbResult, InMemoryLedger, LedgerTransaction};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    fn fast_retries(max_attempts: u32) -> SalesSettings {
        SalesSettings {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    fn medicine() -> Medicine {
        Medicine::new("Paracetamol 500mg", DosageForm::Tablet, Money::from_cents(150), 50)
    }

    fn batch(med: &Medicine, lot: &str, days: i64, qty: i64) -> StockBatch {
        StockBatch::new(&med.id, lot, today() + Days::days(days), qty, Money::from_cents(60))
    }

    fn coordinator(ledger: Arc<dyn StockLedger>, settings: SalesSettings) -> SaleCoordinator {
        SaleCoordinator::new(ledger, Arc::new(FixedClock::new(today())), settings)
    }

    fn memory_setup(qty: i64) -> (InMemoryLedger, Medicine, StockBatch) {
        let ledger = InMemoryLedger::default();
        let med = medicine();
        ledger.insert_medicine(med.clone()).unwrap();
        let b = batch(&med, "LOT-1", 90, qty);
        ledger.insert_batch(b.clone()).unwrap();
        (ledger, med, b)
    }

    #[tokio::test]
    async fn test_sell_whole_batch_then_insufficient() {
        let (ledger, med, b) = memory_setup(10);
        let sales = coordinator(Arc::new(ledger.clone()), SalesSettings::default());

        let record = sales
            .sell(SaleRequest::new(&med.id, 10, Money::from_cents(500)).from_batch(&b.id))
            .await
            .unwrap();
        assert_eq!(record.quantity, 10);
        assert_eq!(record.batch_id, b.id);
        assert_eq!(record.sale_date, today());
        assert_eq!(record.unit_price(), Money::from_major_minor(5, 0));
        assert_eq!(ledger.batch(&b.id).unwrap().unwrap().quantity, 0);
        assert_eq!(ledger.sales().unwrap().len(), 1);

        let err = sales
            .sell(SaleRequest::new(&med.id, 1, Money::from_cents(500)).from_batch(&b.id))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rejected(CoreError::InsufficientStock { available: 0, requested: 1, .. })
        ));
        assert_eq!(ledger.sales().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_allocation_uses_fefo() {
        let ledger = InMemoryLedger::default();
        let med = medicine();
        ledger.insert_medicine(med.clone()).unwrap();
        let soon = batch(&med, "SOON", 10, 5);
        let later = batch(&med, "LATER", 40, 50);
        ledger.insert_batch(later.clone()).unwrap();
        ledger.insert_batch(soon.clone()).unwrap();
        let sales = coordinator(Arc::new(ledger.clone()), SalesSettings::default());

        let first = sales.sell(SaleRequest::new(&med.id, 5, Money::zero())).await.unwrap();
        assert_eq!(first.batch_id, soon.id);

        // SOON is now empty, so the next sale falls through to LATER
        let second = sales.sell(SaleRequest::new(&med.id, 5, Money::zero())).await.unwrap();
        assert_eq!(second.batch_id, later.id);
        assert_eq!(ledger.batch(&later.id).unwrap().unwrap().quantity, 45);
    }

    #[tokio::test]
    async fn test_pinned_expired_batch_rejected() {
        let ledger = InMemoryLedger::default();
        let med = medicine();
        ledger.insert_medicine(med.clone()).unwrap();
        let expired = batch(&med, "OLD", -1, 20);
        ledger.insert_batch(expired.clone()).unwrap();
        let sales = coordinator(Arc::new(ledger.clone()), SalesSettings::default());

        let err = sales
            .sell(SaleRequest::new(&med.id, 1, Money::zero()).from_batch(&expired.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExpiredBatch);
        assert_eq!(ledger.batch(&expired.id).unwrap().unwrap().quantity, 20);

        let err = sales.sell(SaleRequest::new(&med.id, 1, Money::zero())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAvailableStock);
        assert!(ledger.sales().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_and_lookup_rejections() {
        let (ledger, med, b) = memory_setup(5);
        let other = Medicine::new("Ibuprofen", DosageForm::Tablet, Money::from_cents(220), 0);
        ledger.insert_medicine(other.clone()).unwrap();
        let sales = coordinator(Arc::new(ledger.clone()), SalesSettings::default());

        let zero = sales.sell(SaleRequest::new(&med.id, 0, Money::zero())).await.unwrap_err();
        assert_eq!(zero.kind(), ErrorKind::Validation);

        let negative_price = sales
            .sell(SaleRequest::new(&med.id, 1, Money::from_cents(-1)))
            .await
            .unwrap_err();
        assert_eq!(negative_price.kind(), ErrorKind::Validation);

        let unknown = sales
            .sell(SaleRequest::new("6f1c1d9e-2a43-4c84-9f0e-0b7a4b1f6d11", 1, Money::zero()))
            .await
            .unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::NotFound);

        let missing_batch = sales
            .sell(
                SaleRequest::new(&med.id, 1, Money::zero())
                    .from_batch("0d3c5a8e-51b2-4a8b-8d0e-3a2c7f9e1b22"),
            )
            .await
            .unwrap_err();
        assert_eq!(missing_batch.kind(), ErrorKind::NotFound);

        let mismatch = sales
            .sell(SaleRequest::new(&other.id, 1, Money::zero()).from_batch(&b.id))
            .await
            .unwrap_err();
        assert!(matches!(
            mismatch,
            EngineError::Rejected(CoreError::BatchMedicineMismatch { .. })
        ));

        assert_eq!(ledger.batch(&b.id).unwrap().unwrap().quantity, 5);
        assert!(ledger.sales().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backdated_sale_keeps_requested_date() {
        let (ledger, med, b) = memory_setup(5);
        let sales = coordinator(Arc::new(ledger), SalesSettings::default());
        let yesterday = today() - Days::days(1);

        let record = sales
            .sell(SaleRequest::new(&med.id, 2, Money::zero()).from_batch(&b.id).on(yesterday))
            .await
            .unwrap();
        assert_eq!(record.sale_date, yesterday);
    }

    #[tokio::test]
    async fn test_future_dated_sale_rejected() {
        let (ledger, med, b) = memory_setup(5);
        let ledger = Arc::new(ledger);
        let sales = coordinator(ledger.clone(), SalesSettings::default());
        let tomorrow = today() + Days::days(1);

        let err = sales
            .sell(SaleRequest::new(&med.id, 2, Money::zero()).from_batch(&b.id).on(tomorrow))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rejected(CoreError::Validation(ValidationError::FutureDate { .. }))
        ));
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(ledger.batch(&b.id).unwrap().unwrap().quantity, 5);
        assert!(ledger.sales().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sells_never_oversell() {
        let (ledger, med, b) = memory_setup(10);
        let sales = coordinator(Arc::new(ledger.clone()), SalesSettings::default());

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let sales = sales.clone();
                let request = SaleRequest::new(&med.id, 1, Money::from_cents(150)).from_batch(&b.id);
                tokio::spawn(async move { sales.sell(request).await })
            })
            .collect();

        let mut succeeded = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(err) => {
                    assert_eq!(err.kind(), ErrorKind::InsufficientStock);
                    insufficient += 1;
                }
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(insufficient, 2);
        assert_eq!(ledger.batch(&b.id).unwrap().unwrap().quantity, 0);
        assert_eq!(ledger.sales().unwrap().len(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_large_sells_one_wins() {
        let (ledger, med, b) = memory_setup(10);
        let sales = coordinator(Arc::new(ledger.clone()), SalesSettings::default());

        let a = {
            let sales = sales.clone();
            let req = SaleRequest::new(&med.id, 6, Money::zero()).from_batch(&b.id);
            tokio::spawn(async move { sales.sell(req).await })
        };
        let c = {
            let sales = sales.clone();
            let req = SaleRequest::new(&med.id, 6, Money::zero()).from_batch(&b.id);
            tokio::spawn(async move { sales.sell(req).await })
        };

        let results = [a.await.unwrap(), c.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.kind(), ErrorKind::InsufficientStock);
        assert_eq!(ledger.batch(&b.id).unwrap().unwrap().quantity, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sells_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("sales.db")).max_connections(4))
            .await
            .unwrap();
        let med = medicine();
        db.medicines().insert(&med).await.unwrap();
        let b = batch(&med, "LOT-1", 90, 10);
        db.batches().insert(&b).await.unwrap();

        let sales = coordinator(db.ledger(), fast_retries(10));
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let sales = sales.clone();
                let request = SaleRequest::new(&med.id, 1, Money::from_cents(150)).from_batch(&b.id);
                tokio::spawn(async move { sales.sell(request).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(err) => assert_eq!(err.kind(), ErrorKind::InsufficientStock),
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(db.batches().get_by_id(&b.id).await.unwrap().unwrap().quantity, 0);
        assert_eq!(db.sales().total_sold_for_batch(&b.id).await.unwrap(), 10);
    }

    /// Ledger whose first `failures` units of work cannot get the lock.
    struct ContendedLedger {
        inner: InMemoryLedger,
        failures: u32,
        begun: AtomicU32,
    }

    #[async_trait]
    impl StockLedger for ContendedLedger {
        async fn find_medicine(&self, id: &str) -> DbResult<Option<Medicine>> {
            self.inner.find_medicine(id).await
        }

        async fn list_medicines(&self) -> DbResult<Vec<Medicine>> {
            self.inner.list_medicines().await
        }

        async fn list_available(&self, medicine_id: &str, as_of: NaiveDate) -> DbResult<Vec<StockBatch>> {
            self.inner.list_available(medicine_id, as_of).await
        }

        async fn list_batches(&self) -> DbResult<Vec<StockBatch>> {
            self.inner.list_batches().await
        }

        async fn list_sales(&self, from: NaiveDate, to: NaiveDate) -> DbResult<Vec<SaleRecord>> {
            self.inner.list_sales(from, to).await
        }

        async fn begin(&self) -> DbResult<Box<dyn LedgerTransaction>> {
            if self.begun.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(DbError::lock_timeout("stock batch"));
            }
            self.inner.begin().await
        }
    }

    fn contended(failures: u32) -> (Arc<ContendedLedger>, Medicine, StockBatch) {
        let (inner, med, b) = memory_setup(10);
        let ledger = Arc::new(ContendedLedger {
            inner,
            failures,
            begun: AtomicU32::new(0),
        });
        (ledger, med, b)
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retried() {
        let (ledger, med, b) = contended(2);
        let sales = coordinator(ledger.clone(), fast_retries(3));

        let record = sales.sell(SaleRequest::new(&med.id, 3, Money::zero())).await.unwrap();
        assert_eq!(record.batch_id, b.id);
        assert_eq!(ledger.begun.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.inner.batch(&b.id).unwrap().unwrap().quantity, 7);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_transient() {
        let (ledger, med, b) = contended(5);
        let sales = coordinator(ledger.clone(), fast_retries(3));

        let err = sales.sell(SaleRequest::new(&med.id, 3, Money::zero())).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::LockTimeout);
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(ledger.begun.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.inner.batch(&b.id).unwrap().unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_rejections_are_not_retried() {
        let (ledger, med, _) = contended(0);
        let sales = coordinator(ledger.clone(), fast_retries(5));

        let err = sales.sell(SaleRequest::new(&med.id, 11, Money::zero())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAvailableStock);
        assert_eq!(ledger.begun.load(Ordering::SeqCst), 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn prop_concurrent_sells_conserve_stock(
                initial in 0i64..30,
                quantities in proptest::collection::vec(1i64..6, 1..16),
            ) {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(4)
                    .enable_all()
                    .build()
                    .unwrap();

                let (sold, rejected, remaining, records) = runtime.block_on(async {
                    let (ledger, med, b) = memory_setup(initial);
                    let sales = coordinator(Arc::new(ledger.clone()), SalesSettings::default());

                    let handles: Vec<_> = quantities
                        .iter()
                        .map(|&qty| {
                            let sales = sales.clone();
                            let req = SaleRequest::new(&med.id, qty, Money::zero()).from_batch(&b.id);
                            tokio::spawn(async move { (qty, sales.sell(req).await) })
                        })
                        .collect();

                    let mut sold = 0;
                    let mut rejected = Vec::new();
                    for handle in handles {
                        match handle.await.unwrap() {
                            (_, Ok(record)) => sold += record.quantity,
                            (qty, Err(err)) => {
                                assert_eq!(err.kind(), ErrorKind::InsufficientStock);
                                rejected.push(qty);
                            }
                        }
                    }
                    let remaining = ledger.batch(&b.id).unwrap().unwrap().quantity;
                    (sold, rejected, remaining, ledger.sales().unwrap())
                });

                prop_assert!(remaining >= 0);
                prop_assert_eq!(remaining, initial - sold);
                prop_assert_eq!(records.iter().map(|r| r.quantity).sum::<i64>(), sold);
                // Stock only shrinks, so anything refused still cannot fit
                for qty in rejected {
                    prop_assert!(qty > remaining);
                }
            }
        }
    }
}
