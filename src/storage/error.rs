//! Storage-specific error types.
//!
//! All store operations return [`StorageError`] on failure. Callers match on
//! [`StorageError::NotFound`] to tell "host has not checked in" apart from
//! real database failures.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// No row matched the query.
    #[error("rows not found")]
    NotFound,

    /// An insert did not affect exactly one row.
    #[error("log not written: {affected} rows affected")]
    WriteFailed { affected: u64 },

    /// Invalid data in database or in a request handed to the store.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., unsupported driver configuration).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            other => Self::Database(other),
        }
    }
}

impl StorageError {
    /// Whether this error means "no matching rows" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = StorageError::from(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "rows not found");
    }

    #[test]
    fn test_other_sqlx_errors_stay_database_errors() {
        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StorageError::Database(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_write_failed_message() {
        let err = StorageError::WriteFailed { affected: 0 };
        assert_eq!(err.to_string(), "log not written: 0 rows affected");
    }
}
