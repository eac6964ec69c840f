//! # pharma-core: Pure Business Logic for the Pharmacy Engine
//!
//! This crate holds every business rule of the inventory allocation and
//! sale engine as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Pharmacy Engine Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                pharma-engine (orchestration)                    │   │
//! │  │   BatchAllocator ──► SaleCoordinator ──► ReportingEngine       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ pharma-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌──────────┐  │   │
//! │  │   │   types   │  │   money   │  │ allocation │  │  report  │  │   │
//! │  │   │ Medicine  │  │   Money   │  │   FEFO     │  │ rollups  │  │   │
//! │  │   │ Batch     │  │  (cents)  │  │  re-check  │  │ turnover │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               pharma-db (Stock Ledger, SQLite)                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Medicine, StockBatch, SaleRecord, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//! - [`allocation`] - First-expired-first-out batch selection and re-checks
//! - [`report`] - Aggregations over batches and sale history
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use pharma_core::allocation::select_fefo;
//! use pharma_core::money::Money;
//! use pharma_core::types::StockBatch;
//!
//! let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
//! let near = StockBatch::new("med-1", "LOT-A", today + chrono::Days::new(10), 5, Money::from_cents(120));
//! let far = StockBatch::new("med-1", "LOT-B", today + chrono::Days::new(40), 50, Money::from_cents(100));
//! let batches = vec![far, near.clone()];
//!
//! let picked = select_fefo(&batches, "med-1", 5, today).unwrap();
//! assert_eq!(picked.id, near.id);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod error;
pub mod money;
pub mod report;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default horizon for the "expiring soon" bucket, in days.
pub const DEFAULT_EXPIRY_HORIZON_DAYS: i64 = 30;

/// Default trailing window for turnover analysis, in days (six months).
pub const DEFAULT_TURNOVER_WINDOW_DAYS: i64 = 180;

/// Number of medicines kept in a ranked turnover report.
pub const TURNOVER_TOP_N: usize = 20;

/// Default trailing window for sales trend reports, in days.
pub const DEFAULT_SALES_TREND_DAYS: i64 = 90;

/// Longest report window accepted (ten years).
pub const MAX_REPORT_WINDOW_DAYS: i64 = 3650;
