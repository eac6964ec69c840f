//! # Stock Ledger
//!
//! The storage boundary the sale engine works against: unlocked reads for
//! allocation and reporting, plus a unit of work that locks one batch row,
//! rewrites it and appends a sale record atomically.
//!
//! ## Unit of Work
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  let mut tx = ledger.begin().await?;                                   │
//! │                                                                         │
//! │  tx.get_for_update(batch)   ── exclusive row lock, bounded wait        │
//! │        │                       (LockTimeout when exceeded)             │
//! │        ▼                                                                │
//! │  re-check expiry / quantity on the fresh row                           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  tx.update_batch(..)  +  tx.insert_sale(..)                            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  tx.commit()   ── both writes visible, lock released                   │
//! │                                                                         │
//! │  Any early return drops `tx`: everything rolls back, lock released.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Implementations
//! - [`SqliteLedger`] - production store
//! - [`InMemoryLedger`] - tests and database-less embedding

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::DbResult;
use pharma_core::{Medicine, SaleRecord, StockBatch};

/// Read access and unit-of-work factory over batches and sales.
///
/// Reads never take row locks and may observe state that is already stale
/// by the time the caller acts on it.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Looks up a catalog entry.
    async fn find_medicine(&self, id: &str) -> DbResult<Option<Medicine>>;

    /// The whole catalog, ordered by name.
    async fn list_medicines(&self) -> DbResult<Vec<Medicine>>;

    /// Non-empty batches of `medicine_id` with `expiry_date >= as_of`.
    async fn list_available(&self, medicine_id: &str, as_of: NaiveDate) -> DbResult<Vec<StockBatch>>;

    /// Every batch, including expired and empty ones.
    async fn list_batches(&self) -> DbResult<Vec<StockBatch>>;

    /// Sales with `from <= sale_date <= to`.
    async fn list_sales(&self, from: NaiveDate, to: NaiveDate) -> DbResult<Vec<SaleRecord>>;

    /// Opens a unit of work.
    async fn begin(&self) -> DbResult<Box<dyn LedgerTransaction>>;
}

/// One atomic unit of work against the ledger.
///
/// Dropping an uncommitted transaction rolls it back and releases every
/// lock it holds.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Locks a batch row for the rest of the transaction and returns its
    /// current state.
    ///
    /// ## Errors
    /// - `NotFound` if the batch does not exist
    /// - `LockTimeout` if the lock is not granted within the configured wait
    async fn get_for_update(&mut self, batch_id: &str) -> DbResult<StockBatch>;

    /// Persists a batch previously locked with `get_for_update`.
    async fn update_batch(&mut self, batch: &StockBatch) -> DbResult<()>;

    /// Appends a sale record.
    async fn insert_sale(&mut self, sale: &SaleRecord) -> DbResult<()>;

    /// Makes every write visible and releases the locks.
    async fn commit(self: Box<Self>) -> DbResult<()>;

    /// Discards every write and releases the locks.
    async fn rollback(self: Box<Self>) -> DbResult<()>;
}
