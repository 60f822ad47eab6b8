//! SQLite backend implementation using sqlx.
//!
//! Used for local runs and tests. Timestamps come from SQLite's own clock via
//! `strftime(..., 'now')`, so callers never supply `created_at`.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool as SqlxPool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::storage::schema::{
    ColumnInfo, OPTIONAL_COLUMNS, SQLITE_LOGS_INDEX_DDL, SQLITE_LOGS_TABLE_DDL, add_column_ddl,
    sqlite_needs_rebuild, sqlite_rebuild_statements,
};
use crate::storage::store::{ensure_single_row, non_empty};
use crate::storage::{AppendRequest, LogQuery, LogRow, LogStore, StorageError};

/// Default maximum connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const APPEND_SQL: &str = r#"
INSERT INTO logs (host, arch, kernel_version, created_at)
VALUES (?1, ?2, ?3, strftime('%Y-%m-%d %H:%M:%f', 'now'))
"#;

const READ_SQL: &str = r#"
SELECT host, arch, kernel_version, created_at
FROM logs
WHERE host = ?1
ORDER BY created_at DESC, id DESC
LIMIT ?2
"#;

const COLUMNS_SQL: &str = r#"SELECT name, type, "notnull" FROM pragma_table_info('logs')"#;

const READ_WINDOW_SQL: &str = r#"
SELECT host, arch, kernel_version, created_at
FROM logs
WHERE host = ?1
  AND created_at >= strftime('%Y-%m-%d %H:%M:%f', 'now', ?2)
ORDER BY created_at DESC, id DESC
LIMIT ?3
"#;

/// SQLite-backed [`LogStore`].
///
/// Wraps sqlx's SqlitePool with WAL mode. In-memory databases are pinned to a
/// single long-lived connection, since every new connection to `:memory:`
/// would open a separate empty database.
#[derive(Clone)]
pub struct SqliteLogStore {
    inner: SqlxPool,
}

impl std::fmt::Debug for SqliteLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLogStore").finish_non_exhaustive()
    }
}

impl SqliteLogStore {
    /// Connect with default pool settings.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:data/cluster.db?mode=rwc`
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        Self::connect_with(url, DEFAULT_MAX_CONNECTIONS, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect with explicit pool size and acquire timeout.
    pub async fn connect_with(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let in_memory = is_memory_url(url);
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections })
            .acquire_timeout(connect_timeout);
        if in_memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        tracing::debug!(url, in_memory, "Connected to SQLite");

        Ok(Self { inner: pool })
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn columns(&self) -> Result<Vec<ColumnInfo>, StorageError> {
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as(COLUMNS_SQL).fetch_all(&self.inner).await?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type, not_null)| ColumnInfo::new(name, data_type, not_null == 0))
            .collect())
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[async_trait::async_trait]
impl LogStore for SqliteLogStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(SQLITE_LOGS_TABLE_DDL)
            .execute(&self.inner)
            .await?;

        let existing = self.columns().await?;
        if sqlite_needs_rebuild(&existing) {
            let mut tx = self.inner.begin().await?;
            for stmt in sqlite_rebuild_statements(&existing) {
                sqlx::query(&stmt).execute(&mut *tx).await?;
            }
            tx.commit().await?;
            tracing::info!("Rebuilt logs table with optional node details");
        } else {
            for (column, column_type) in OPTIONAL_COLUMNS {
                if !existing.iter().any(|c| c.name == *column) {
                    let ddl = add_column_ddl(column, column_type);
                    sqlx::query(&ddl).execute(&self.inner).await?;
                    tracing::info!(column, "Added missing column to logs table");
                }
            }
        }

        sqlx::query(SQLITE_LOGS_INDEX_DDL)
            .execute(&self.inner)
            .await?;

        tracing::info!(backend = "sqlite", "Database schema migrated");
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.inner).await?;
        Ok(())
    }

    async fn append(&self, req: &AppendRequest) -> Result<(), StorageError> {
        let result = sqlx::query(APPEND_SQL)
            .bind(&req.host)
            .bind(req.arch.as_deref())
            .bind(req.kernel_version.as_deref())
            .execute(&self.inner)
            .await?;

        ensure_single_row(result.rows_affected())
    }

    async fn read(&self, query: &LogQuery) -> Result<Vec<LogRow>, StorageError> {
        let limit = i64::from(query.limit);
        let rows = if query.is_windowed() {
            sqlx::query_as::<_, LogRow>(READ_WINDOW_SQL)
                .bind(&query.host)
                .bind(format!("-{} minutes", query.since))
                .bind(limit)
                .fetch_all(&self.inner)
                .await?
        } else {
            sqlx::query_as::<_, LogRow>(READ_SQL)
                .bind(&query.host)
                .bind(limit)
                .fetch_all(&self.inner)
                .await?
        };

        non_empty(rows)
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::LEGACY_KERNEL_COLUMN;
    use chrono::{TimeZone, Utc};

    /// `logs` as the second revision created it.
    const SECOND_REVISION_DDL: &str = "create table if not exists logs (
        id serial not null primary key,
        arch varchar(32) not null,
        host varchar(255) not null,
        kernal_version varchar(255) not null,
        created_at timestamp not null
    )";

    async fn memory_store() -> SqliteLogStore {
        let store = SqliteLogStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    /// Insert a row whose timestamp lies `minutes` in the past.
    async fn insert_backdated(store: &SqliteLogStore, host: &str, minutes: u32) {
        sqlx::query(
            "INSERT INTO logs (host, created_at)
             VALUES (?1, strftime('%Y-%m-%d %H:%M:%f', 'now', ?2))",
        )
        .bind(host)
        .bind(format!("-{minutes} minutes"))
        .execute(store.inner())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_pool_connect() {
        let store = SqliteLogStore::connect("sqlite::memory:").await.unwrap();
        assert!(!store.is_closed());

        let row: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(store.inner())
            .await
            .unwrap();
        assert_eq!(row.0, 1);

        store.close().await;
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = memory_store().await;
        store.migrate().await.unwrap();

        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('logs')")
                .fetch_all(store.inner())
                .await
                .unwrap();
        for expected in ["id", "host", "arch", "kernel_version", "created_at"] {
            assert!(columns.iter().any(|c| c == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_migrate_upgrades_first_revision_table() {
        let store = SqliteLogStore::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host VARCHAR(255) NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(store.inner())
        .await
        .unwrap();

        store.migrate().await.unwrap();
        store
            .append(&AppendRequest::new("node-1").with_arch("x86_64"))
            .await
            .unwrap();

        let row = store.last("node-1").await.unwrap();
        assert_eq!(row.arch.as_deref(), Some("x86_64"));
    }

    #[tokio::test]
    async fn test_migrate_upgrades_second_revision_table() {
        let store = SqliteLogStore::connect("sqlite::memory:").await.unwrap();
        sqlx::query(SECOND_REVISION_DDL)
            .execute(store.inner())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO logs (id, arch, host, kernal_version, created_at) VALUES
                (1, 'x86_64', 'node-1', '5.15', '2024-03-01 12:00:00'),
                (2, '', 'node-2', '', '2024-03-01T12:30:00Z'),
                (3, 'x86_64', '', '6.1', '2024-03-01 12:45:00')",
        )
        .execute(store.inner())
        .await
        .unwrap();

        store.migrate().await.unwrap();

        // Check-ins without node details are accepted again.
        store.append(&AppendRequest::new("node-1")).await.unwrap();
        let rows = store.read(&LogQuery::new("node-1")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].arch, None);
        assert_eq!(rows[0].kernel_version, None);
        assert_eq!(rows[1].arch.as_deref(), Some("x86_64"));
        assert_eq!(rows[1].kernel_version.as_deref(), Some("5.15"));
        assert_eq!(
            rows[1].created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );

        // Empty details from the old NOT NULL columns become NULL.
        let row = store.last("node-2").await.unwrap();
        assert_eq!(row.arch, None);
        assert_eq!(row.kernel_version, None);
        assert_eq!(
            row.created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
        );

        let columns = store.columns().await.unwrap();
        assert!(!columns.iter().any(|c| c.name == LEGACY_KERNEL_COLUMN));
        assert!(!sqlite_needs_rebuild(&columns));

        // A second run leaves the upgraded table alone.
        store.migrate().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(store.inner())
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_migrate_merges_both_kernel_columns() {
        let store = SqliteLogStore::connect("sqlite::memory:").await.unwrap();
        sqlx::query(SECOND_REVISION_DDL)
            .execute(store.inner())
            .await
            .unwrap();
        // An earlier upgrade added the correctly spelled column next to the old one.
        sqlx::query("ALTER TABLE logs ADD COLUMN kernel_version VARCHAR(255)")
            .execute(store.inner())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO logs (id, arch, host, kernal_version, kernel_version, created_at) VALUES
                (1, 'x86_64', 'node-1', '5.10', NULL, '2024-03-01 12:00:00'),
                (2, 'x86_64', 'node-1', 'stale', '6.6', '2024-03-01 12:05:00')",
        )
        .execute(store.inner())
        .await
        .unwrap();

        store.migrate().await.unwrap();

        let rows = store.read(&LogQuery::new("node-1")).await.unwrap();
        let kernels: Vec<_> = rows.iter().map(|r| r.kernel_version.as_deref()).collect();
        assert_eq!(kernels, vec![Some("6.6"), Some("5.10")]);
    }

    #[tokio::test]
    async fn test_append_then_last() {
        let store = memory_store().await;
        let before = Utc::now() - chrono::Duration::seconds(1);

        store
            .append(
                &AppendRequest::new("node-1")
                    .with_arch("aarch64")
                    .with_kernel_version("6.1.0-rpi"),
            )
            .await
            .unwrap();

        let row = store.last("node-1").await.unwrap();
        assert_eq!(row.host, "node-1");
        assert_eq!(row.arch.as_deref(), Some("aarch64"));
        assert_eq!(row.kernel_version.as_deref(), Some("6.1.0-rpi"));
        assert!(row.created_at >= before);
    }

    #[tokio::test]
    async fn test_last_unknown_host_is_not_found() {
        let store = memory_store().await;
        store.append(&AppendRequest::new("node-1")).await.unwrap();

        let err = store.last("node-2").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_orders_newest_first() {
        let store = memory_store().await;
        insert_backdated(&store, "node-1", 30).await;
        insert_backdated(&store, "node-1", 20).await;
        store.append(&AppendRequest::new("node-1")).await.unwrap();

        let rows = store.read(&LogQuery::new("node-1")).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn test_read_without_window_honours_limit() {
        let store = memory_store().await;
        insert_backdated(&store, "node-1", 120).await;
        for _ in 0..4 {
            store.append(&AppendRequest::new("node-1")).await.unwrap();
        }

        let rows = store
            .read(&LogQuery::new("node-1").with_limit(3))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);

        // since = 0 ignores age entirely
        let rows = store.read(&LogQuery::new("node-1")).await.unwrap();
        assert_eq!(rows.len(), 5);
    }

    #[tokio::test]
    async fn test_read_with_window_excludes_old_rows() {
        let store = memory_store().await;
        insert_backdated(&store, "node-1", 30).await;
        insert_backdated(&store, "node-1", 15).await;
        store.append(&AppendRequest::new("node-1")).await.unwrap();

        let rows = store
            .read(&LogQuery::new("node-1").with_since(10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let rows = store
            .read(&LogQuery::new("node-1").with_since(20))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_host_is_not_found_within_window() {
        let store = memory_store().await;
        insert_backdated(&store, "node-1", 45).await;

        let err = store
            .read(&LogQuery::last("node-1").with_since(10))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_is_scoped_to_host() {
        let store = memory_store().await;
        store.append(&AppendRequest::new("node-1")).await.unwrap();
        store.append(&AppendRequest::new("node-2")).await.unwrap();

        let rows = store.read(&LogQuery::new("node-1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].host, "node-1");
    }

    #[tokio::test]
    async fn test_append_zero_rows_affected_is_write_failed() {
        let store = memory_store().await;
        sqlx::query(
            "CREATE TRIGGER drop_logs BEFORE INSERT ON logs
             BEGIN SELECT RAISE(IGNORE); END",
        )
        .execute(store.inner())
        .await
        .unwrap();

        let err = store
            .append(&AppendRequest::new("node-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed { affected: 0 }));
    }

    #[tokio::test]
    async fn test_empty_host_rejected_by_schema() {
        let store = memory_store().await;
        let err = store.append(&AppendRequest::new("")).await.unwrap_err();
        assert!(matches!(err, StorageError::Database(_)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_for_different_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("logs.db").display());
        let store = std::sync::Arc::new(SqliteLogStore::connect(&url).await.unwrap());
        store.migrate().await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.append(&AppendRequest::new(format!("node-{i}"))).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for i in 0..16 {
            assert_eq!(store.last(&format!("node-{i}")).await.unwrap().host, format!("node-{i}"));
        }
        store.close().await;
    }

    #[test]
    fn test_is_memory_url() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite:file:test?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite:data/cluster.db?mode=rwc"));
    }
}
