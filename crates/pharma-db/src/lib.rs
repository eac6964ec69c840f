//! # pharma-db: Database Layer for the Pharmacy Engine
//!
//! SQLite persistence and the Stock Ledger abstraction.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         pharma-db                                       │
//! │                                                                         │
//! │  ┌─────────────┐      ┌──────────────────────────────────────────────┐ │
//! │  │  Database   │─────►│ Repositories                                 │ │
//! │  │  (pool)     │      │  MedicineRepository  BatchRepository         │ │
//! │  └──────┬──────┘      │  SaleRepository                              │ │
//! │         │             └──────────────────────────────────────────────┘ │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ StockLedger (trait)                                              │  │
//! │  │   ├── SqliteLedger    write-locking transactions, busy timeout   │  │
//! │  │   └── InMemoryLedger  per-batch async mutexes, staged writes     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let db = Database::new(DbConfig::new("./pharmacy.db")).await?;
//! let ledger = db.ledger();
//!
//! let mut tx = ledger.begin().await?;
//! let batch = tx.get_for_update(&batch_id).await?;
//! // ... re-check, deduct, insert sale ...
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod ledger;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use ledger::{InMemoryLedger, LedgerTransaction, SqliteLedger, StockLedger};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::batch::BatchRepository;
pub use repository::medicine::MedicineRepository;
pub use repository::sale::SaleRepository;
