//! # Repository Module
//!
//! Plain database access for the three ledger tables.
//!
//! ## Repositories vs the Stock Ledger
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Repositories (this module)          StockLedger (crate::ledger)        │
//! │  ───────────────────────────         ─────────────────────────────      │
//! │  one statement per call              one unit of work per sale          │
//! │  no locks                            row lock + commit / rollback       │
//! │  catalog, intake, history reads      sale path only                     │
//! │                                                                         │
//! │  Both share the SQL in this module: the ledger calls the                │
//! │  executor-generic helpers with its open transaction.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`MedicineRepository`](medicine::MedicineRepository) - Catalog lookups and inserts
//! - [`BatchRepository`](batch::BatchRepository) - Stock intake, restock, batch reads
//! - [`SaleRepository`](sale::SaleRepository) - Sale history reads

pub mod batch;
pub mod medicine;
pub mod sale;
