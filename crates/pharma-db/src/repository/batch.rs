//! # Batch Repository
//!
//! Stock intake and unlocked batch reads.
//!
//! ## Who Writes Batches
//! ```text
//! intake      ──► BatchRepository::insert / restock   (quantity goes up)
//! sale path   ──► LedgerTransaction::update_batch     (quantity goes down)
//! ```
//! Nothing else changes a batch's quantity.

use chrono::{NaiveDate, Utc};
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use pharma_core::validation::{
    validate_batch_number, validate_price_cents, validate_stock_quantity, ValidationResult,
};
use pharma_core::StockBatch;

pub(crate) const BATCH_COLUMNS: &str = "id, medicine_id, batch_number, expiry_date, quantity, \
     purchase_price_cents, received_at, updated_at";

/// Repository for stock batch operations.
#[derive(Debug, Clone)]
pub struct BatchRepository {
    pool: SqlitePool,
}

impl BatchRepository {
    /// Creates a new BatchRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BatchRepository { pool }
    }

    /// Records a newly received batch.
    ///
    /// ## Errors
    /// - `Validation` for a blank or over-long lot label, a negative
    ///   quantity or a negative cost
    /// - `ForeignKeyViolation` if the medicine does not exist
    pub async fn insert(&self, batch: &StockBatch) -> DbResult<()> {
        validate_batch(batch)?;

        info!(
            batch_id = %batch.id,
            medicine_id = %batch.medicine_id,
            batch_number = %batch.batch_number,
            quantity = batch.quantity,
            expiry = %batch.expiry_date,
            "Receiving stock batch"
        );

        sqlx::query(&format!(
            "INSERT INTO stock_batches ({BATCH_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))
        .bind(&batch.id)
        .bind(&batch.medicine_id)
        .bind(&batch.batch_number)
        .bind(batch.expiry_date)
        .bind(batch.quantity)
        .bind(batch.purchase_price_cents)
        .bind(batch.received_at)
        .bind(batch.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Adds `delta` units to an existing batch and returns the updated row.
    ///
    /// A single `UPDATE ... quantity = quantity + ?` so concurrent sales on
    /// the same batch never lose the restock.
    pub async fn restock(&self, batch_id: &str, delta: i64) -> DbResult<StockBatch> {
        if delta <= 0 {
            return Err(DbError::CheckViolation {
                message: format!("restock quantity must be positive, got {delta}"),
            });
        }

        let result = sqlx::query(
            "UPDATE stock_batches SET quantity = quantity + ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(delta)
        .bind(Utc::now())
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("StockBatch", batch_id));
        }

        info!(batch_id = %batch_id, delta, "Restocked batch");

        self.get_by_id(batch_id)
            .await?
            .ok_or_else(|| DbError::not_found("StockBatch", batch_id))
    }

    /// Gets a batch by its ID, without locking.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<StockBatch>> {
        fetch_batch(&self.pool, id).await
    }

    /// Lists every batch, expired and empty ones included.
    pub async fn list_all(&self) -> DbResult<Vec<StockBatch>> {
        let batches = sqlx::query_as::<_, StockBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM stock_batches ORDER BY expiry_date, received_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!(count = batches.len(), "Listed all batches");
        Ok(batches)
    }

    /// Lists every batch of one medicine, in FEFO order.
    pub async fn list_for_medicine(&self, medicine_id: &str) -> DbResult<Vec<StockBatch>> {
        let batches = sqlx::query_as::<_, StockBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM stock_batches \
             WHERE medicine_id = ?1 \
             ORDER BY expiry_date, received_at, id"
        ))
        .bind(medicine_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(batches)
    }

    /// Lists batches of a medicine that are unexpired on `as_of` and not empty.
    pub async fn list_available(&self, medicine_id: &str, as_of: NaiveDate) -> DbResult<Vec<StockBatch>> {
        let batches = sqlx::query_as::<_, StockBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM stock_batches \
             WHERE medicine_id = ?1 AND expiry_date >= ?2 AND quantity > 0 \
             ORDER BY expiry_date, received_at, id"
        ))
        .bind(medicine_id)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            medicine_id = %medicine_id,
            as_of = %as_of,
            count = batches.len(),
            "Listed available batches"
        );
        Ok(batches)
    }

    /// Counts batches.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_batches")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Executor-Generic Helpers (shared with the SQLite ledger)
// =============================================================================

pub(crate) async fn fetch_batch<'e, E>(executor: E, id: &str) -> DbResult<Option<StockBatch>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let batch = sqlx::query_as::<_, StockBatch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM stock_batches WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(batch)
}

/// Writes a batch's quantity back. Returns the number of rows touched.
pub(crate) async fn write_batch_quantity<'e, E>(executor: E, batch: &StockBatch) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE stock_batches SET quantity = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(batch.quantity)
        .bind(batch.updated_at)
        .bind(&batch.id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Checks an incoming batch before it is written.
pub fn validate_batch(batch: &StockBatch) -> ValidationResult<()> {
    validate_batch_number(&batch.batch_number)?;
    validate_stock_quantity(batch.quantity)?;
    validate_price_cents(batch.purchase_price_cents, "purchase_price")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use pharma_core::{DosageForm, Medicine, Money};

    async fn setup() -> (Database, Medicine) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let med = Medicine::new("Paracetamol 500mg", DosageForm::Tablet, Money::from_cents(150), 10);
        db.medicines().insert(&med).await.unwrap();
        (db, med)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_list_available() {
        let (db, med) = setup().await;
        let repo = db.batches();

        let late = StockBatch::new(&med.id, "LOT-B", today() + Duration::days(40), 50, Money::from_cents(90));
        let early = StockBatch::new(&med.id, "LOT-A", today() + Duration::days(10), 5, Money::from_cents(95));
        let expired = StockBatch::new(&med.id, "LOT-X", today() - Duration::days(1), 80, Money::from_cents(80));
        let empty = StockBatch::new(&med.id, "LOT-E", today() + Duration::days(5), 0, Money::from_cents(80));
        for b in [&late, &early, &expired, &empty] {
            repo.insert(b).await.unwrap();
        }

        let available = repo.list_available(&med.id, today()).await.unwrap();
        let ids: Vec<&str> = available.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);

        assert_eq!(repo.list_all().await.unwrap().len(), 4);
        assert_eq!(repo.list_for_medicine(&med.id).await.unwrap().len(), 4);
        assert_eq!(repo.count().await.unwrap(), 4);

        let loaded = repo.get_by_id(&early.id).await.unwrap().unwrap();
        assert_eq!(loaded.expiry_date, early.expiry_date);
        assert_eq!(loaded.purchase_price().cents(), 95);
    }

    #[tokio::test]
    async fn test_insert_for_unknown_medicine_fails() {
        let (db, _) = setup().await;
        let orphan = StockBatch::new("no-such-medicine", "LOT", today(), 1, Money::zero());
        let err = db.batches().insert(&orphan).await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_invalid_batch_rejected_before_write() {
        let (db, med) = setup().await;
        let repo = db.batches();

        let negative = StockBatch::new(&med.id, "LOT", today(), -1, Money::zero());
        assert!(matches!(repo.insert(&negative).await, Err(DbError::Validation(_))));

        let blank = StockBatch::new(&med.id, "   ", today() + Duration::days(30), 10, Money::from_cents(50));
        assert!(matches!(repo.insert(&blank).await, Err(DbError::Validation(_))));

        let long_label = StockBatch::new(&med.id, "L".repeat(101), today(), 1, Money::zero());
        assert!(matches!(repo.insert(&long_label).await, Err(DbError::Validation(_))));

        let negative_cost = StockBatch::new(&med.id, "LOT", today(), 1, Money::from_cents(-5));
        assert!(matches!(repo.insert(&negative_cost).await, Err(DbError::Validation(_))));

        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_negative_quantity_rejected_by_schema() {
        let (db, med) = setup().await;
        let batch = StockBatch::new(&med.id, "LOT", today(), 1, Money::zero());
        db.batches().insert(&batch).await.unwrap();

        // Bypasses intake validation; the CHECK constraint still holds.
        let err = sqlx::query("UPDATE stock_batches SET quantity = -1 WHERE id = ?1")
            .bind(&batch.id)
            .execute(db.pool())
            .await
            .map_err(DbError::from)
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[tokio::test]
    async fn test_restock() {
        let (db, med) = setup().await;
        let batch = StockBatch::new(&med.id, "LOT", today() + Duration::days(30), 3, Money::zero());
        db.batches().insert(&batch).await.unwrap();

        let updated = db.batches().restock(&batch.id, 7).await.unwrap();
        assert_eq!(updated.quantity, 10);

        assert!(matches!(
            db.batches().restock(&batch.id, 0).await,
            Err(DbError::CheckViolation { .. })
        ));
        assert!(db.batches().restock("missing", 1).await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_validate_batch() {
        let ok = StockBatch::new("m", "LOT-1", today(), 5, Money::from_cents(10));
        assert!(validate_batch(&ok).is_ok());

        let no_label = StockBatch::new("m", "", today(), 5, Money::from_cents(10));
        assert!(validate_batch(&no_label).is_err());

        let empty = StockBatch::new("m", "LOT-1", today(), 0, Money::from_cents(10));
        assert!(validate_batch(&empty).is_ok());

        let negative = StockBatch::new("m", "LOT-1", today(), -2, Money::from_cents(10));
        assert!(validate_batch(&negative).is_err());
    }
}
