//! # Sale Repository
//!
//! Read access to the append-only sale history. Sale records are only ever
//! written by the ledger's unit of work (see [`insert_sale_record`]); there
//! is no update or delete path, and the schema rejects both.

use chrono::NaiveDate;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use pharma_core::SaleRecord;

pub(crate) const SALE_COLUMNS: &str =
    "id, medicine_id, batch_id, quantity, sale_date, unit_price_cents, created_at";

/// Repository for sale history reads.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale record by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<SaleRecord>> {
        let sale = sqlx::query_as::<_, SaleRecord>(&format!(
            "SELECT {SALE_COLUMNS} FROM sale_records WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Lists the sales funded by one batch, oldest first.
    pub async fn list_for_batch(&self, batch_id: &str) -> DbResult<Vec<SaleRecord>> {
        let sales = sqlx::query_as::<_, SaleRecord>(&format!(
            "SELECT {SALE_COLUMNS} FROM sale_records WHERE batch_id = ?1 ORDER BY created_at, id"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sales)
    }

    /// Lists sales with `from <= sale_date <= to`.
    pub async fn list_between(&self, from: NaiveDate, to: NaiveDate) -> DbResult<Vec<SaleRecord>> {
        let sales = sqlx::query_as::<_, SaleRecord>(&format!(
            "SELECT {SALE_COLUMNS} FROM sale_records \
             WHERE sale_date >= ?1 AND sale_date <= ?2 \
             ORDER BY sale_date, created_at, id"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        debug!(from = %from, to = %to, count = sales.len(), "Listed sales");
        Ok(sales)
    }

    /// Total units ever sold from a batch. Zero when it has no sales.
    pub async fn total_sold_for_batch(&self, batch_id: &str) -> DbResult<i64> {
        let total: Option<i64> =
            sqlx::query_scalar("SELECT SUM(quantity) FROM sale_records WHERE batch_id = ?1")
                .bind(batch_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(total.unwrap_or(0))
    }

    /// Counts sale records.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sale_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Appends a sale record. Called by the ledger inside its transaction.
pub(crate) async fn insert_sale_record<'e, E>(executor: E, sale: &SaleRecord) -> DbResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(&format!(
        "INSERT INTO sale_records ({SALE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    ))
    .bind(&sale.id)
    .bind(&sale.medicine_id)
    .bind(&sale.batch_id)
    .bind(sale.quantity)
    .bind(sale.sale_date)
    .bind(sale.unit_price_cents)
    .bind(sale.created_at)
    .execute(executor)
    .await?;

    Ok(())
}
