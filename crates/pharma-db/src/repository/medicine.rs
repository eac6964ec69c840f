//! # Medicine Repository
//!
//! Catalog reads and the minimal insert used by intake and seeding.
//! Catalog editing itself happens elsewhere.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use pharma_core::validation::{
    validate_medicine_name, validate_price_cents, validate_reorder_level, ValidationResult,
};
use pharma_core::Medicine;

pub(crate) const MEDICINE_COLUMNS: &str = "id, name, generic_name, manufacturer, category, barcode, \
     reorder_level, unit_price_cents, created_at, updated_at";

/// Repository for medicine catalog operations.
#[derive(Debug, Clone)]
pub struct MedicineRepository {
    pool: SqlitePool,
}

impl MedicineRepository {
    /// Creates a new MedicineRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MedicineRepository { pool }
    }

    /// Inserts a catalog entry.
    ///
    /// ## Errors
    /// - `Validation` for a blank or over-long name, or a negative reorder
    ///   level or price
    /// - `UniqueViolation` on a duplicate id or barcode
    pub async fn insert(&self, medicine: &Medicine) -> DbResult<()> {
        validate_medicine(medicine)?;
        debug!(id = %medicine.id, name = %medicine.name, "Inserting medicine");

        sqlx::query(&format!(
            "INSERT INTO medicines ({MEDICINE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))
        .bind(&medicine.id)
        .bind(&medicine.name)
        .bind(&medicine.generic_name)
        .bind(&medicine.manufacturer)
        .bind(medicine.category)
        .bind(&medicine.barcode)
        .bind(medicine.reorder_level)
        .bind(medicine.unit_price_cents)
        .bind(medicine.created_at)
        .bind(medicine.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a medicine by its ID.
    ///
    /// ## Returns
    /// * `Ok(Some(Medicine))` - Medicine found
    /// * `Ok(None)` - Medicine not found
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Medicine>> {
        let medicine = sqlx::query_as::<_, Medicine>(&format!(
            "SELECT {MEDICINE_COLUMNS} FROM medicines WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(medicine)
    }

    /// Lists the whole catalog ordered by name.
    pub async fn list(&self) -> DbResult<Vec<Medicine>> {
        let medicines = sqlx::query_as::<_, Medicine>(&format!(
            "SELECT {MEDICINE_COLUMNS} FROM medicines ORDER BY name, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!(count = medicines.len(), "Listed medicines");
        Ok(medicines)
    }

    /// Counts catalog entries.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM medicines")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Checks a catalog entry before it is written.
pub fn validate_medicine(medicine: &Medicine) -> ValidationResult<()> {
    validate_medicine_name(&medicine.name)?;
    validate_reorder_level(medicine.reorder_level)?;
    validate_price_cents(medicine.unit_price_cents, "unit_price")?;
    Ok(())
}
