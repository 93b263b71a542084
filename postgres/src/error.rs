//! Translation of `sqlx` failures into [`StoreError`].

use eventbook_core::store::StoreError;

/// `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";
/// `serialization_failure`
const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`
const DEADLOCK_DETECTED: &str = "40P01";
/// `lock_not_available`
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Classify a `sqlx` error.
///
/// Deadlocks, serialization failures, lock timeouts, pool exhaustion and I/O
/// failures are transient: the transaction has been rolled back and may be
/// run again.
pub(crate) fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => StoreError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            },
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE) => {
                StoreError::Transient(db.message().to_string())
            }
            _ => StoreError::Database(error.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(error.to_string()),
        sqlx::Error::RowNotFound => StoreError::NotFound(error.to_string()),
        _ => StoreError::Database(error.to_string()),
    }
}

/// Map an integer column into the engine's `u32` counters.
pub(crate) fn to_u32(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Database(format!("Column {column} out of range: {value}")))
}

/// Map a `u32` counter onto an `INTEGER` column.
pub(crate) fn to_i32(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Database(format!("Value for {column} out of range: {value}")))
}
