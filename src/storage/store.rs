//! The [`LogStore`] trait shared by every storage backend.

use crate::storage::StorageError;
use crate::storage::types::{AppendRequest, LogQuery, LogRow};

/// Append-only heartbeat store.
///
/// Implementations share one connection pool across all callers and hold no
/// application-level locks, so every method is safe to call concurrently.
/// Reads are always scoped to one host and ordered newest first.
#[async_trait::async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Backend name for logs (e.g. "postgres").
    fn backend(&self) -> &'static str;

    /// Create the schema if it does not exist and upgrade older revisions.
    async fn migrate(&self) -> Result<(), StorageError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Insert one heartbeat row stamped with the store's clock.
    ///
    /// # Errors
    /// `StorageError::WriteFailed` if the insert did not affect exactly one row.
    async fn append(&self, req: &AppendRequest) -> Result<(), StorageError>;

    /// Rows for `query.host`, newest first.
    ///
    /// # Errors
    /// `StorageError::NotFound` when nothing matches.
    async fn read(&self, query: &LogQuery) -> Result<Vec<LogRow>, StorageError>;

    /// Most recent row for `host`.
    async fn last(&self, host: &str) -> Result<LogRow, StorageError> {
        self.read(&LogQuery::last(host))
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound)
    }

    /// Close the underlying pool.
    async fn close(&self);
}

/// Turn an insert's affected-row count into a result.
///
/// # Errors
/// `StorageError::WriteFailed` unless exactly one row was written.
pub fn ensure_single_row(affected: u64) -> Result<(), StorageError> {
    if affected == 1 {
        Ok(())
    } else {
        Err(StorageError::WriteFailed { affected })
    }
}

/// Turn a read result into `NotFound` when it is empty.
pub(crate) fn non_empty(rows: Vec<LogRow>) -> Result<Vec<LogRow>, StorageError> {
    if rows.is_empty() {
        Err(StorageError::NotFound)
    } else {
        Ok(rows)
    }
}
