//! # Connection Pool
//!
//! SQLite pool setup and the [`Database`] handle.
//!
//! ## Lock Waits
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  seller A: BEGIN; UPDATE stock_batches ...   (holds write lock)        │
//! │  seller B: BEGIN; UPDATE stock_batches ...   (waits ≤ busy_timeout)    │
//! │                                                                         │
//! │  A commits within lock_timeout  → B proceeds, re-reads fresh quantity  │
//! │  A holds longer than lock_timeout → B gets SQLITE_BUSY → LockTimeout   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! `busy_timeout` is set from [`DbConfig::lock_timeout`], which is what bounds
//! every row-lock wait on the SQLite ledger.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::ledger::{SqliteLedger, StockLedger};
use crate::migrations;
use crate::repository::batch::BatchRepository;
use crate::repository::medicine::MedicineRepository;
use crate::repository::sale::SaleRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the ledger file lives and how its pool behaves.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/pharmacy/ledger.db")
///     .max_connections(8)
///     .lock_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, created on first connect. `:memory:` for tests.
    pub database_path: PathBuf,

    /// Pool size; every concurrent seller holds one connection for the
    /// length of its unit of work. Default: 5
    pub max_connections: u32,

    /// Connections kept open while idle. Default: 1
    pub min_connections: u32,

    /// Wait for a free pooled connection before `PoolExhausted`.
    /// Default: 30 seconds
    pub acquire_timeout: Duration,

    /// Idle connections above `min_connections` are closed after this.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Bound on a batch lock wait (SQLite `busy_timeout`).
    /// Default: 5 seconds
    pub lock_timeout: Duration,

    /// Apply embedded migrations on connect. Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            lock_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// A private in-memory database.
    ///
    /// One connection holds the whole database, so units of work queue at
    /// the pool instead of the lock. Concurrency tests use a file instead.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            ..DbConfig::new(":memory:")
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let url = format!("sqlite://{}?mode=rwc", self.database_path.display());

        Ok(SqliteConnectOptions::from_str(&url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            // WAL lets report reads run next to an open sale
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Off by default in SQLite
            .foreign_keys(true)
            .busy_timeout(self.lock_timeout)
            .create_if_missing(true))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Pool handle handing out repositories and the SQLite ledger.
///
/// Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    lock_timeout: Duration,
}

impl Database {
    /// Opens the pool and, unless disabled, brings the schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening ledger database");

        let options = config.connect_options()?;
        debug!(
            lock_timeout_ms = config.lock_timeout.as_millis() as u64,
            "Connection options configured"
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "Database pool created");

        let db = Database {
            pool,
            lock_timeout: config.lock_timeout,
        };

        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        }

        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn medicines(&self) -> MedicineRepository {
        MedicineRepository::new(self.pool.clone())
    }

    pub fn batches(&self) -> BatchRepository {
        BatchRepository::new(self.pool.clone())
    }

    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.pool.clone())
    }

    /// The SQLite stock ledger over this pool.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let sales = SaleCoordinator::new(db.ledger(), clock, settings);
    /// ```
    pub fn ledger(&self) -> Arc<dyn StockLedger> {
        Arc::new(SqliteLedger::new(self.pool.clone(), self.lock_timeout))
    }

    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// True when a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
