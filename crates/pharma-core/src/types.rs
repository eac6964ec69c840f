//! # Domain Types
//!
//! Core domain types of the pharmacy ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐ 1   N ┌─────────────────┐ 1   N ┌──────────────┐  │
//! │  │    Medicine     │──────►│   StockBatch    │──────►│  SaleRecord  │  │
//! │  │  ─────────────  │       │  ─────────────  │       │  ──────────  │  │
//! │  │  id (UUID)      │       │  id (UUID)      │       │  id (UUID)   │  │
//! │  │  name           │       │  batch_number   │       │  batch_id    │  │
//! │  │  category       │       │  expiry_date    │       │  quantity    │  │
//! │  │  reorder_level  │       │  quantity       │       │  sale_date   │  │
//! │  │  unit_price     │       │  purchase_price │       │  unit_price  │  │
//! │  └─────────────────┘       └─────────────────┘       └──────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ledger Invariant
//! For every batch: `quantity == received + restocked − Σ sold from it`.
//! A sale record is therefore always tied to exactly one batch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::money::Money;

// =============================================================================
// Dosage Form
// =============================================================================

/// Medicine category by dosage form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DosageForm {
    #[default]
    Tablet,
    Capsule,
    Syrup,
    Injection,
    Cream,
    Drops,
    Inhaler,
    Powder,
    Other,
}

impl DosageForm {
    /// Stable lowercase name, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            DosageForm::Tablet => "tablet",
            DosageForm::Capsule => "capsule",
            DosageForm::Syrup => "syrup",
            DosageForm::Injection => "injection",
            DosageForm::Cream => "cream",
            DosageForm::Drops => "drops",
            DosageForm::Inhaler => "inhaler",
            DosageForm::Powder => "powder",
            DosageForm::Other => "other",
        }
    }
}

// =============================================================================
// Medicine
// =============================================================================

/// A catalog entry. Identity is immutable; commercial attributes change
/// through catalog management, which lives outside this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Medicine {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name shown at the counter.
    pub name: String,

    pub generic_name: Option<String>,

    pub manufacturer: Option<String>,

    pub category: DosageForm,

    pub barcode: Option<String>,

    /// Minimum on-hand units before restocking is flagged. 0 disables tracking.
    pub reorder_level: i64,

    /// List price in cents.
    pub unit_price_cents: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Medicine {
    /// Creates a catalog entry with a fresh id.
    pub fn new(name: impl Into<String>, category: DosageForm, unit_price: Money, reorder_level: i64) -> Self {
        let now = Utc::now();
        Medicine {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            generic_name: None,
            manufacturer: None,
            category,
            barcode: None,
            reorder_level,
            unit_price_cents: unit_price.cents(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the list price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Whether low-stock detection applies to this medicine.
    #[inline]
    pub fn tracks_reorder(&self) -> bool {
        self.reorder_level > 0
    }
}

// =============================================================================
// Stock Batch
// =============================================================================

/// A received lot of a medicine with its own expiry date and unit cost.
///
/// Batches that reach zero stay in the ledger as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockBatch {
    /// System-wide batch identifier (UUID v4).
    pub id: String,

    pub medicine_id: String,

    /// Supplier lot label printed on the packaging. Not unique.
    pub batch_number: String,

    #[ts(as = "String")]
    pub expiry_date: NaiveDate,

    /// Remaining units. Never negative.
    pub quantity: i64,

    /// Unit purchase cost in cents.
    pub purchase_price_cents: i64,

    #[ts(as = "String")]
    pub received_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl StockBatch {
    /// Creates a freshly received batch.
    pub fn new(
        medicine_id: impl Into<String>,
        batch_number: impl Into<String>,
        expiry_date: NaiveDate,
        quantity: i64,
        purchase_price: Money,
    ) -> Self {
        let now = Utc::now();
        StockBatch {
            id: Uuid::new_v4().to_string(),
            medicine_id: medicine_id.into(),
            batch_number: batch_number.into(),
            expiry_date,
            quantity,
            purchase_price_cents: purchase_price.cents(),
            received_at: now,
            updated_at: now,
        }
    }

    /// Returns the unit cost as Money.
    #[inline]
    pub fn purchase_price(&self) -> Money {
        Money::from_cents(self.purchase_price_cents)
    }

    /// A batch is expired once `today` is past its expiry date.
    /// The expiry date itself is still sellable.
    #[inline]
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    /// Signed number of days until expiry (negative once expired).
    #[inline]
    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    /// Cost value of the remaining units.
    #[inline]
    pub fn stock_value(&self) -> Money {
        self.purchase_price().multiply_quantity(self.quantity)
    }

    /// Whether this batch alone can fund a sale of `quantity` on `today`.
    #[inline]
    pub fn can_fund(&self, quantity: i64, today: NaiveDate) -> bool {
        !self.is_expired(today) && self.quantity >= quantity
    }

    /// Lightweight reference handed out by the allocator.
    pub fn to_ref(&self) -> BatchRef {
        BatchRef {
            batch_id: self.id.clone(),
            medicine_id: self.medicine_id.clone(),
            batch_number: self.batch_number.clone(),
            expiry_date: self.expiry_date,
            available: self.quantity,
        }
    }
}

// =============================================================================
// Batch Reference
// =============================================================================

/// The allocator's answer: which batch should fund a sale.
///
/// `available` is a point-in-time read taken without a lock; the
/// coordinator re-checks it under the row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BatchRef {
    pub batch_id: String,
    pub medicine_id: String,
    pub batch_number: String,
    #[ts(as = "String")]
    pub expiry_date: NaiveDate,
    pub available: i64,
}

// =============================================================================
// Sale Record
// =============================================================================

/// An immutable record of one successful sale, funded from one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleRecord {
    pub id: String,
    pub medicine_id: String,
    /// The batch the units were taken from. Always present.
    pub batch_id: String,
    pub quantity: i64,
    #[ts(as = "String")]
    pub sale_date: NaiveDate,
    /// Sale price per unit in cents.
    pub unit_price_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleRecord {
    /// Returns the unit sale price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Revenue of this sale (unit price × quantity).
    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price().multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Sale Request
// =============================================================================

/// Input to the sale coordinator.
///
/// ## Example
/// ```rust
/// use pharma_core::{Money, SaleRequest};
///
/// // Let the allocator pick the batch:
/// let auto = SaleRequest::new("med-id", 2, Money::from_cents(450));
/// assert!(auto.batch_id.is_none());
///
/// // Pin a batch chosen at the counter:
/// let pinned = SaleRequest::new("med-id", 2, Money::from_cents(450)).from_batch("batch-id");
/// assert_eq!(pinned.batch_id.as_deref(), Some("batch-id"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleRequest {
    pub medicine_id: String,
    pub quantity: i64,
    /// Explicit batch to sell from; `None` lets the allocator choose (FEFO).
    pub batch_id: Option<String>,
    pub unit_price_cents: i64,
    /// Recorded sale date; defaults to today.
    #[ts(as = "Option<String>")]
    pub sale_date: Option<NaiveDate>,
}

impl SaleRequest {
    pub fn new(medicine_id: impl Into<String>, quantity: i64, unit_price: Money) -> Self {
        SaleRequest {
            medicine_id: medicine_id.into(),
            quantity,
            batch_id: None,
            unit_price_cents: unit_price.cents(),
            sale_date: None,
        }
    }

    /// Pins the sale to a specific batch.
    pub fn from_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Records the sale on a specific date instead of today.
    pub fn on(mut self, sale_date: NaiveDate) -> Self {
        self.sale_date = Some(sale_date);
        self
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Builds the immutable record for this request once a batch is resolved.
    pub fn into_record(self, batch_id: String, today: NaiveDate) -> SaleRecord {
        SaleRecord {
            id: Uuid::new_v4().to_string(),
            medicine_id: self.medicine_id,
            batch_id,
            quantity: self.quantity,
            sale_date: self.sale_date.unwrap_or(today),
            unit_price_cents: self.unit_price_cents,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
