//! Storage-specific error types for SQLite operations.
//!
//! Diesel and r2d2 errors are wrapped in [`StorageError`] and converted to
//! the engine's database-agnostic [`EtlError`] at the trait boundary.

use diesel::result::Error as DieselError;
use marketsync_etl::EtlError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage-specific errors that wrap Diesel and r2d2 types.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Query execution failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A stored value no longer parses into its domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Invalid raw table name '{0}'")]
    InvalidTable(String),

    #[error("Database writer is not running")]
    WriterClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<StorageError> for EtlError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::QueryFailed(DieselError::NotFound) => {
                EtlError::Storage("Record not found".to_string())
            }
            StorageError::QueryFailed(DieselError::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            )) => EtlError::Storage(format!("Unique violation: {}", info.message())),
            other => EtlError::Storage(other.to_string()),
        }
    }
}

/// Extension trait for converting storage results into engine results.
pub trait IntoEtl<T> {
    fn into_etl(self) -> marketsync_etl::Result<T>;
}

impl<T, E: Into<StorageError>> IntoEtl<T> for std::result::Result<T, E> {
    fn into_etl(self) -> marketsync_etl::Result<T> {
        self.map_err(|e| EtlError::from(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_storage_error() {
        let err: EtlError = StorageError::QueryFailed(DieselError::NotFound).into();
        assert_eq!(err.to_string(), "Storage error: Record not found");
    }

    #[test]
    fn into_etl_converts_diesel_results() {
        let result: std::result::Result<(), DieselError> = Err(DieselError::RollbackTransaction);
        assert!(matches!(result.into_etl(), Err(EtlError::Storage(_))));
    }
}
