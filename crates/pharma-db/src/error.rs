//! # Database Errors
//!
//! Error types for persistence operations.
//!
//! ## Transient vs Permanent
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Transient (retry may succeed)      Permanent (retry is pointless)     │
//! │  ─────────────────────────────      ───────────────────────────────    │
//! │  LockTimeout                        NotFound                           │
//! │  PoolExhausted                      UniqueViolation                    │
//! │  ConnectionFailed                   ForeignKeyViolation                │
//! │                                     CheckViolation / Validation        │
//! │                                     MigrationFailed / QueryFailed      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use pharma_core::ValidationError;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `get_for_update` on an unknown batch id
    /// - `restock` of a batch that does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting a batch for a medicine that does not exist
    /// - Inserting a sale for a batch that does not exist
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Intake data failed validation before reaching the database.
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    /// CHECK constraint violation (negative stock, non-positive sale qty).
    #[error("Check constraint violation: {message}")]
    CheckViolation { message: String },

    /// The row lock could not be acquired within the configured wait.
    ///
    /// ## When This Occurs
    /// - Another unit of work holds the batch (or, on SQLite, the database
    ///   write lock) for longer than `lock_timeout`
    #[error("Timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed to commit or roll back.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a LockTimeout error for a resource.
    pub fn lock_timeout(resource: impl Into<String>) -> Self {
        DbError::LockTimeout {
            resource: resource.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::LockTimeout { .. } | DbError::PoolExhausted | DbError::ConnectionFailed(_)
        )
    }

    /// Returns true for a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }
}

/// SQLite primary result codes that mean "someone else holds the lock".
/// Extended codes (e.g. 517 `SQLITE_BUSY_SNAPSHOT`) share the low byte.
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

fn is_lock_contention(code: Option<&str>, message: &str) -> bool {
    let primary = code
        .and_then(|c| c.parse::<i64>().ok())
        .map(|c| c & 0xff);
    matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
        || message.contains("database is locked")
        || message.contains("database table is locked")
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → lock contention or constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::Io             → DbError::ConnectionFailed
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let code = db_err.code();

                if is_lock_contention(code.as_deref(), msg) {
                    DbError::LockTimeout {
                        resource: "database".to_string(),
                    }
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed") {
                    DbError::CheckViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::Io(io) => DbError::ConnectionFailed(io.to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::lock_timeout("batch b-1").is_transient());
        assert!(DbError::PoolExhausted.is_transient());
        assert!(DbError::ConnectionFailed("gone".into()).is_transient());
        assert!(!DbError::not_found("StockBatch", "b-1").is_transient());
        assert!(!DbError::CheckViolation {
            message: "quantity".into()
        }
        .is_transient());
    }

    #[test]
    fn test_lock_contention_detection() {
        assert!(is_lock_contention(Some("5"), ""));
        assert!(is_lock_contention(Some("517"), ""));
        assert!(is_lock_contention(Some("6"), ""));
        assert!(is_lock_contention(None, "database is locked"));
        assert!(!is_lock_contention(Some("19"), "CHECK constraint failed"));
        assert!(!is_lock_contention(Some("2067"), "UNIQUE constraint failed"));
    }

    #[test]
    fn test_pool_timeout_maps_to_exhausted() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::PoolExhausted));
    }
}
