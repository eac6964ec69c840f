//! SQLite-backed stock ledger.
//!
//! SQLite has no row locks, so `get_for_update` opens the transaction with
//! a no-op write to the batch row (`SET quantity = quantity`). That first
//! write takes the database write lock, which every other seller needs
//! before touching any batch. Waiting for it is bounded by the
//! connection's `busy_timeout`; giving up surfaces as `LockTimeout`.
//!
//! Once held, the lock lasts until commit or rollback, so the batch read
//! that follows is the latest committed state.
//!
//! The lock covers the whole file, not the row: a sale on an unrelated batch
//! queues behind an open unit of work and proceeds once it commits, or
//! fails with `LockTimeout` if that takes longer than `lock_timeout`.
//! `InMemoryLedger` locks per batch.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{LedgerTransaction, StockLedger};
use crate::error::{DbError, DbResult};
use crate::repository::batch::{fetch_batch, write_batch_quantity, BatchRepository};
use crate::repository::medicine::MedicineRepository;
use crate::repository::sale::{insert_sale_record, SaleRepository};
use pharma_core::{Medicine, SaleRecord, StockBatch};

/// Stock ledger over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
    lock_timeout: Duration,
}

impl SqliteLedger {
    /// `lock_timeout` is only reported in errors and logs; the wait itself is
    /// enforced by the pool's `busy_timeout`.
    pub fn new(pool: SqlitePool, lock_timeout: Duration) -> Self {
        SqliteLedger { pool, lock_timeout }
    }
}

#[async_trait]
impl StockLedger for SqliteLedger {
    async fn find_medicine(&self, id: &str) -> DbResult<Option<Medicine>> {
        MedicineRepository::new(self.pool.clone()).get_by_id(id).await
    }

    async fn list_medicines(&self) -> DbResult<Vec<Medicine>> {
        MedicineRepository::new(self.pool.clone()).list().await
    }

    async fn list_available(&self, medicine_id: &str, as_of: NaiveDate) -> DbResult<Vec<StockBatch>> {
        BatchRepository::new(self.pool.clone())
            .list_available(medicine_id, as_of)
            .await
    }

    async fn list_batches(&self) -> DbResult<Vec<StockBatch>> {
        BatchRepository::new(self.pool.clone()).list_all().await
    }

    async fn list_sales(&self, from: NaiveDate, to: NaiveDate) -> DbResult<Vec<SaleRecord>> {
        SaleRepository::new(self.pool.clone()).list_between(from, to).await
    }

    async fn begin(&self) -> DbResult<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteLedgerTransaction {
            tx,
            lock_timeout: self.lock_timeout,
            locked: Vec::new(),
        }))
    }
}

/// A unit of work on one pooled connection. Rolls back on drop.
struct SqliteLedgerTransaction {
    tx: Transaction<'static, Sqlite>,
    lock_timeout: Duration,
    locked: Vec<String>,
}

#[async_trait]
impl LedgerTransaction for SqliteLedgerTransaction {
    async fn get_for_update(&mut self, batch_id: &str) -> DbResult<StockBatch> {
        let started = Instant::now();

        let touched = sqlx::query("UPDATE stock_batches SET quantity = quantity WHERE id = ?1")
            .bind(batch_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::LockTimeout { .. } => {
                    warn!(
                        batch_id = %batch_id,
                        waited_ms = started.elapsed().as_millis() as u64,
                        lock_timeout_ms = self.lock_timeout.as_millis() as u64,
                        "Gave up waiting for batch lock"
                    );
                    DbError::lock_timeout(format!("stock batch {batch_id}"))
                }
                other => other,
            })?;

        if touched.rows_affected() == 0 {
            return Err(DbError::not_found("StockBatch", batch_id));
        }

        let batch = fetch_batch(&mut *self.tx, batch_id)
            .await?
            .ok_or_else(|| DbError::not_found("StockBatch", batch_id))?;

        debug!(
            batch_id = %batch_id,
            quantity = batch.quantity,
            waited_ms = started.elapsed().as_millis() as u64,
            "Batch locked"
        );
        self.locked.push(batch_id.to_string());
        Ok(batch)
    }

    async fn update_batch(&mut self, batch: &StockBatch) -> DbResult<()> {
        if !self.locked.iter().any(|id| id == &batch.id) {
            return Err(DbError::TransactionFailed(format!(
                "batch {} was not locked in this transaction",
                batch.id
            )));
        }

        let rows = write_batch_quantity(&mut *self.tx, batch).await?;
        if rows == 0 {
            return Err(DbError::not_found("StockBatch", &batch.id));
        }
        Ok(())
    }

    async fn insert_sale(&mut self, sale: &SaleRecord) -> DbResult<()> {
        insert_sale_record(&mut *self.tx, sale).await
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| match DbError::from(e) {
                lock @ DbError::LockTimeout { .. } => lock,
                other => DbError::TransactionFailed(other.to_string()),
            })
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration as Days;
    use pharma_core::{DosageForm, Money, SaleRequest};
    use std::sync::Arc;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    async fn file_db(dir: &tempfile::TempDir, lock_timeout: Duration) -> Database {
        let config = DbConfig::new(dir.path().join("ledger.db"))
            .max_connections(4)
            .lock_timeout(lock_timeout);
        Database::new(config).await.unwrap()
    }

    async fn seed(db: &Database, qty: i64) -> (Medicine, StockBatch) {
        let med = Medicine::new("Salbutamol", DosageForm::Inhaler, Money::from_cents(900), 0);
        db.medicines().insert(&med).await.unwrap();
        let batch = StockBatch::new(&med.id, "LOT-1", today() + Days::days(60), qty, Money::from_cents(400));
        db.batches().insert(&batch).await.unwrap();
        (med, batch)
    }

    #[tokio::test]
    async fn test_commit_applies_both_writes() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (med, batch) = seed(&db, 10).await;
        let ledger = db.ledger();

        let mut tx = ledger.begin().await.unwrap();
        let mut locked = tx.get_for_update(&batch.id).await.unwrap();
        locked.quantity -= 4;
        tx.update_batch(&locked).await.unwrap();
        let sale = SaleRequest::new(&med.id, 4, Money::from_cents(900)).into_record(batch.id.clone(), today());
        tx.insert_sale(&sale).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.batches().get_by_id(&batch.id).await.unwrap().unwrap().quantity, 6);
        assert_eq!(db.sales().total_sold_for_batch(&batch.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (med, batch) = seed(&db, 10).await;
        let ledger = db.ledger();

        {
            let mut tx = ledger.begin().await.unwrap();
            let mut locked = tx.get_for_update(&batch.id).await.unwrap();
            locked.quantity = 0;
            tx.update_batch(&locked).await.unwrap();
            let sale = SaleRequest::new(&med.id, 10, Money::zero()).into_record(batch.id.clone(), today());
            tx.insert_sale(&sale).await.unwrap();
        }

        assert_eq!(db.batches().get_by_id(&batch.id).await.unwrap().unwrap().quantity, 10);
        assert_eq!(db.sales().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_explicit_rollback() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (_, batch) = seed(&db, 3).await;
        let ledger = db.ledger();

        let mut tx = ledger.begin().await.unwrap();
        let mut locked = tx.get_for_update(&batch.id).await.unwrap();
        locked.quantity = 1;
        tx.update_batch(&locked).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(db.batches().get_by_id(&batch.id).await.unwrap().unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_missing_batch_is_not_found() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.ledger();
        let mut tx = ledger.begin().await.unwrap();
        let err = tx.get_for_update("no-such-batch").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_requires_lock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (_, batch) = seed(&db, 3).await;
        let ledger = db.ledger();
        let mut tx = ledger.begin().await.unwrap();
        let err = tx.update_batch(&batch).await.unwrap_err();
        assert!(matches!(err, DbError::TransactionFailed(_)));
    }

    #[tokio::test]
    async fn test_negative_quantity_rejected_in_transaction() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (_, batch) = seed(&db, 3).await;
        let ledger = db.ledger();
        let mut tx = ledger.begin().await.unwrap();
        let mut locked = tx.get_for_update(&batch.id).await.unwrap();
        locked.quantity = -1;
        let err = tx.update_batch(&locked).await.unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_locker_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir, Duration::from_millis(200)).await;
        let (_, batch) = seed(&db, 5).await;
        let ledger: Arc<dyn StockLedger> = db.ledger();

        let mut holder = ledger.begin().await.unwrap();
        holder.get_for_update(&batch.id).await.unwrap();

        let mut waiter = ledger.begin().await.unwrap();
        let err = waiter.get_for_update(&batch.id).await.unwrap_err();
        assert!(matches!(err, DbError::LockTimeout { .. }));
        assert!(err.is_transient());

        drop(waiter);
        holder.commit().await.unwrap();

        let mut after = ledger.begin().await.unwrap();
        assert_eq!(after.get_for_update(&batch.id).await.unwrap().quantity, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unrelated_batch_waits_for_write_lock() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir, Duration::from_secs(2)).await;
        let (_, first) = seed(&db, 5).await;

        let other = Medicine::new("Cetirizine 10mg", DosageForm::Tablet, Money::from_cents(120), 0);
        db.medicines().insert(&other).await.unwrap();
        let second = StockBatch::new(&other.id, "LOT-C", today() + Days::days(90), 8, Money::from_cents(50));
        db.batches().insert(&second).await.unwrap();

        let ledger: Arc<dyn StockLedger> = db.ledger();
        let mut holder = ledger.begin().await.unwrap();
        holder.get_for_update(&first.id).await.unwrap();

        let waiter_ledger = ledger.clone();
        let second_id = second.id.clone();
        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            let mut tx = waiter_ledger.begin().await?;
            let mut locked = tx.get_for_update(&second_id).await?;
            locked.quantity -= 3;
            tx.update_batch(&locked).await?;
            tx.commit().await?;
            Ok::<_, DbError>(started.elapsed())
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        holder.commit().await.unwrap();

        let waited = waiter.await.unwrap().unwrap();
        assert!(waited >= Duration::from_millis(250), "waited only {waited:?}");
        assert!(waited < Duration::from_secs(2));
        assert_eq!(db.batches().get_by_id(&second.id).await.unwrap().unwrap().quantity, 5);
        assert_eq!(db.batches().get_by_id(&first.id).await.unwrap().unwrap().quantity, 5);
    }
}
