//! In-memory stock ledger.
//!
//! Each batch id maps to its own `tokio::sync::Mutex`, so sales on
//! different batches never wait on each other while sales on the same
//! batch queue up. Writes are staged in the transaction and applied to the
//! shared state only on commit.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{LedgerTransaction, StockLedger};
use crate::error::{DbError, DbResult};
use crate::repository::batch::validate_batch;
use crate::repository::medicine::validate_medicine;
use pharma_core::allocation::fefo_order;
use pharma_core::{Medicine, SaleRecord, StockBatch};

#[derive(Debug, Default)]
struct LedgerState {
    medicines: HashMap<String, Medicine>,
    batches: HashMap<String, StockBatch>,
    sales: Vec<SaleRecord>,
}

type RowLocks = Mutex<HashMap<String, Arc<RowLock<()>>>>;

fn poisoned() -> DbError {
    DbError::Internal("ledger state lock poisoned".to_string())
}

/// Stock ledger held entirely in memory.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    row_locks: Arc<RowLocks>,
    lock_timeout: Duration,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl InMemoryLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        InMemoryLedger {
            state: Arc::new(RwLock::new(LedgerState::default())),
            row_locks: Arc::new(Mutex::new(HashMap::new())),
            lock_timeout,
        }
    }

    pub fn insert_medicine(&self, medicine: Medicine) -> DbResult<()> {
        validate_medicine(&medicine)?;
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.medicines.contains_key(&medicine.id) {
            return Err(DbError::UniqueViolation {
                field: "medicines.id".to_string(),
                value: medicine.id,
            });
        }
        state.medicines.insert(medicine.id.clone(), medicine);
        Ok(())
    }

    /// Records a received batch. Applies the same intake checks as
    /// `BatchRepository::insert` and mirrors the SQL schema's constraints.
    pub fn insert_batch(&self, batch: StockBatch) -> DbResult<()> {
        validate_batch(&batch)?;

        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.medicines.contains_key(&batch.medicine_id) {
            return Err(DbError::ForeignKeyViolation {
                message: format!("medicine {} does not exist", batch.medicine_id),
            });
        }
        if state.batches.contains_key(&batch.id) {
            return Err(DbError::UniqueViolation {
                field: "stock_batches.id".to_string(),
                value: batch.id,
            });
        }
        state.batches.insert(batch.id.clone(), batch);
        Ok(())
    }

    /// Current committed state of one batch.
    pub fn batch(&self, id: &str) -> DbResult<Option<StockBatch>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.batches.get(id).cloned())
    }

    /// Every committed sale, in commit order.
    pub fn sales(&self) -> DbResult<Vec<SaleRecord>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.sales.clone())
    }

    fn row_lock(&self, batch_id: &str) -> DbResult<Arc<RowLock<()>>> {
        let mut locks = self.row_locks.lock().map_err(|_| poisoned())?;
        Ok(locks
            .entry(batch_id.to_string())
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone())
    }
}

#[async_trait]
impl StockLedger for InMemoryLedger {
    async fn find_medicine(&self, id: &str) -> DbResult<Option<Medicine>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.medicines.get(id).cloned())
    }

    async fn list_medicines(&self) -> DbResult<Vec<Medicine>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut medicines: Vec<Medicine> = state.medicines.values().cloned().collect();
        medicines.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(medicines)
    }

    async fn list_available(&self, medicine_id: &str, as_of: NaiveDate) -> DbResult<Vec<StockBatch>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut batches: Vec<StockBatch> = state
            .batches
            .values()
            .filter(|b| b.medicine_id == medicine_id && b.expiry_date >= as_of && b.quantity > 0)
            .cloned()
            .collect();
        batches.sort_by(fefo_order);
        Ok(batches)
    }

    async fn list_batches(&self) -> DbResult<Vec<StockBatch>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut batches: Vec<StockBatch> = state.batches.values().cloned().collect();
        batches.sort_by(fefo_order);
        Ok(batches)
    }

    async fn list_sales(&self, from: NaiveDate, to: NaiveDate) -> DbResult<Vec<SaleRecord>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut sales: Vec<SaleRecord> = state
            .sales
            .iter()
            .filter(|s| s.sale_date >= from && s.sale_date <= to)
            .cloned()
            .collect();
        sales.sort_by(|a, b| a.sale_date.cmp(&b.sale_date));
        Ok(sales)
    }

    async fn begin(&self) -> DbResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            ledger: self.clone(),
            guards: HashMap::new(),
            staged_batches: HashMap::new(),
            staged_sales: Vec::new(),
        }))
    }
}

/// Holds its row guards until commit or drop.
struct InMemoryTransaction {
    ledger: InMemoryLedger,
    guards: HashMap<String, OwnedMutexGuard<()>>,
    staged_batches: HashMap<String, StockBatch>,
    staged_sales: Vec<SaleRecord>,
}

impl InMemoryTransaction {
    fn committed_batch(&self, batch_id: &str) -> DbResult<Option<StockBatch>> {
        self.ledger.batch(batch_id)
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn get_for_update(&mut self, batch_id: &str) -> DbResult<StockBatch> {
        if self.guards.contains_key(batch_id) {
            if let Some(staged) = self.staged_batches.get(batch_id) {
                return Ok(staged.clone());
            }
            return self
                .committed_batch(batch_id)?
                .ok_or_else(|| DbError::not_found("StockBatch", batch_id));
        }

        if self.committed_batch(batch_id)?.is_none() {
            return Err(DbError::not_found("StockBatch", batch_id));
        }

        let row = self.ledger.row_lock(batch_id)?;
        let guard = match tokio::time::timeout(self.ledger.lock_timeout, row.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(batch_id = %batch_id, "Gave up waiting for batch lock");
                return Err(DbError::lock_timeout(format!("stock batch {batch_id}")));
            }
        };

        // Re-read now that no other writer can touch the row.
        let batch = self
            .committed_batch(batch_id)?
            .ok_or_else(|| DbError::not_found("StockBatch", batch_id))?;

        debug!(batch_id = %batch_id, quantity = batch.quantity, "Batch locked");
        self.guards.insert(batch_id.to_string(), guard);
        Ok(batch)
    }

    async fn update_batch(&mut self, batch: &StockBatch) -> DbResult<()> {
        if !self.guards.contains_key(&batch.id) {
            return Err(DbError::TransactionFailed(format!(
                "batch {} was not locked in this transaction",
                batch.id
            )));
        }
        if batch.quantity < 0 {
            return Err(DbError::CheckViolation {
                message: "stock_batches.quantity >= 0".to_string(),
            });
        }
        self.staged_batches.insert(batch.id.clone(), batch.clone());
        Ok(())
    }

    async fn insert_sale(&mut self, sale: &SaleRecord) -> DbResult<()> {
        if sale.quantity <= 0 {
            return Err(DbError::CheckViolation {
                message: "sale_records.quantity > 0".to_string(),
            });
        }
        if self.committed_batch(&sale.batch_id)?.is_none() {
            return Err(DbError::ForeignKeyViolation {
                message: format!("stock batch {} does not exist", sale.batch_id),
            });
        }
        self.staged_sales.push(sale.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let this = *self;
        {
            let mut state = this.ledger.state.write().map_err(|_| poisoned())?;
            for (id, batch) in this.staged_batches {
                state.batches.insert(id, batch);
            }
            state.sales.extend(this.staged_sales);
        }
        // Row guards drop here, after the writes are visible.
        drop(this.guards);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}
