//! # pharma-engine: Allocation, Sale Transactions & Reporting
//!
//! Turns a request to sell a quantity of a medicine into exactly one
//! committed stock deduction plus one immutable sale record, and answers
//! read-only inventory questions over the same ledger.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Architecture                            │
//! │                                                                         │
//! │   SaleRequest                                 ReportKind + params       │
//! │       │                                              │                  │
//! │       ▼                                              ▼                  │
//! │  ┌─────────────────┐   candidate   ┌──────────────────────────────┐    │
//! │  │ SaleCoordinator │◄──────────────│ ReportingEngine              │    │
//! │  │                 │  ┌──────────┐ │ (unlocked snapshot reads)    │    │
//! │  │ lock ► re-check │◄─│Allocator │ └──────────────┬───────────────┘    │
//! │  │ ► deduct+record │  │ (FEFO)   │                │                    │
//! │  └────────┬────────┘  └────┬─────┘                │                    │
//! │           │                │                      │                    │
//! │           ▼                ▼                      ▼                    │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │            StockLedger (pharma-db: SQLite or in-memory)          │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`allocator`] - FEFO batch selection
//! - [`coordinator`] - Atomic sale unit of work with retries
//! - [`reporting`] - Valuation, low stock, expiry, turnover and dashboards
//! - [`config`] - TOML + environment configuration
//! - [`clock`] - Injected notion of "today"
//! - [`error`] - Rejected / Transient / Fatal taxonomy
//! - [`telemetry`] - Tracing subscriber bootstrap
//!
//! ## Example
//! ```rust,ignore
//! let config = EngineConfig::load(None)?;
//! telemetry::init_tracing(&config.logging)?;
//! let engine = Engine::open(&config).await?;
//!
//! let sale = engine
//!     .sales()
//!     .sell(SaleRequest::new(&medicine_id, 2, Money::from_cents(850)))
//!     .await?;
//! let value = engine.reports().report(ReportKind::Valuation, &ReportParams::default()).await?;
//! ```

pub mod allocator;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod reporting;
pub mod telemetry;

pub use allocator::BatchAllocator;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{DatabaseSettings, EngineConfig, LoggingConfig, ReportSettings, SalesSettings};
pub use coordinator::SaleCoordinator;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use reporting::ReportingEngine;

use std::sync::Arc;
use tracing::info;

use pharma_db::{Database, StockLedger};

/// The three engine services wired to one ledger and one clock.
#[derive(Debug, Clone)]
pub struct Engine {
    allocator: BatchAllocator,
    sales: SaleCoordinator,
    reports: ReportingEngine,
}

impl Engine {
    /// Wires the engine to an existing ledger.
    pub fn new(ledger: Arc<dyn StockLedger>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Engine {
            allocator: BatchAllocator::new(ledger.clone()),
            sales: SaleCoordinator::new(ledger.clone(), clock.clone(), config.sales.clone()),
            reports: ReportingEngine::new(ledger, clock, config.reports.clone()),
        }
    }

    /// Opens (and migrates) the configured SQLite database and wires the
    /// engine to it using the system clock.
    pub async fn open(config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        if let Some(parent) = config.database.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::new(config.database.to_db_config())
            .await
            .map_err(EngineError::Fatal)?;
        info!(path = %config.database.path.display(), "Engine ready");

        Ok(Self::new(db.ledger(), Arc::new(SystemClock), config))
    }

    pub fn allocator(&self) -> &BatchAllocator {
        &self.allocator
    }

    pub fn sales(&self) -> &SaleCoordinator {
        &self.sales
    }

    pub fn reports(&self) -> &ReportingEngine {
        &self.reports
    }
}
