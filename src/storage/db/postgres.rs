//! PostgreSQL backend implementation using sqlx.
//!
//! The production store for the collector. `created_at` is stamped with the
//! database server's `now()` and the freshness window is evaluated against
//! the same clock.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

use crate::storage::schema::{
    ColumnInfo, PG_LOGS_INDEX_DDL, PG_LOGS_TABLE_DDL, pg_upgrade_statements,
};
use crate::storage::store::{ensure_single_row, non_empty};
use crate::storage::{AppendRequest, LogQuery, LogRow, LogStore, StorageError};

const COLUMNS_SQL: &str = r#"
SELECT column_name::text, data_type::text, is_nullable = 'YES'
FROM information_schema.columns
WHERE table_schema = current_schema() AND table_name = 'logs'
"#;

const APPEND_SQL: &str = r#"
INSERT INTO logs (host, arch, kernel_version, created_at)
VALUES ($1, $2, $3, now())
"#;

const READ_SQL: &str = r#"
SELECT host, arch, kernel_version, created_at
FROM logs
WHERE host = $1
ORDER BY created_at DESC, id DESC
LIMIT $2
"#;

const READ_WINDOW_SQL: &str = r#"
SELECT host, arch, kernel_version, created_at
FROM logs
WHERE host = $1
  AND created_at >= now() - make_interval(mins => $2)
ORDER BY created_at DESC, id DESC
LIMIT $3
"#;

/// Connection parameters for [`PostgresLogStore`].
#[derive(Clone)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for PgSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

impl PgSettings {
    /// Build sqlx connect options. TLS is disabled, matching the in-cluster
    /// deployment where the database is only reachable on the private network.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .ssl_mode(PgSslMode::Disable);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        options
    }
}

/// PostgreSQL-backed [`LogStore`].
#[derive(Clone)]
pub struct PostgresLogStore {
    inner: PgPool,
}

impl std::fmt::Debug for PostgresLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLogStore").finish_non_exhaustive()
    }
}

impl PostgresLogStore {
    /// Connect and verify the server is reachable.
    ///
    /// Fails fast: the collector cannot serve without its store.
    pub async fn connect(settings: &PgSettings) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect_with(settings.connect_options())
            .await?;

        tracing::debug!(
            host = %settings.host,
            port = settings.port,
            database = %settings.database,
            "Connected to PostgreSQL"
        );
        Ok(Self { inner: pool })
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &PgPool {
        &self.inner
    }

    async fn columns(&self) -> Result<Vec<ColumnInfo>, StorageError> {
        let rows: Vec<(String, String, bool)> =
            sqlx::query_as(COLUMNS_SQL).fetch_all(&self.inner).await?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable)| ColumnInfo::new(name, data_type, nullable))
            .collect())
    }
}

#[async_trait::async_trait]
impl LogStore for PostgresLogStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(PG_LOGS_TABLE_DDL).execute(&self.inner).await?;

        let upgrade = pg_upgrade_statements(&self.columns().await?);
        if !upgrade.is_empty() {
            let mut tx = self.inner.begin().await?;
            for stmt in &upgrade {
                sqlx::query(stmt).execute(&mut *tx).await?;
            }
            tx.commit().await?;
            tracing::info!(steps = upgrade.len(), "Upgraded logs table from an earlier revision");
        }

        sqlx::query(PG_LOGS_INDEX_DDL).execute(&self.inner).await?;

        tracing::info!(backend = "postgres", "Database schema migrated");
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
                .bind(i32::from(query.since))
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

    fn settings() -> PgSettings {
        PgSettings {
            host: "db.internal".to_string(),
            port: 5433,
            database: "logs".to_string(),
            user: "postgres".to_string(),
            password: "s3cret".to_string(),
            max_connections: 5,
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_connect_options() {
        let options = settings().connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("logs"));
        assert_eq!(options.get_username(), "postgres");
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", settings());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("db.internal"));
    }

    #[test]
    fn test_window_query_binds_every_placeholder() {
        assert!(READ_WINDOW_SQL.contains("host = $1"));
        assert!(READ_WINDOW_SQL.contains("mins => $2"));
        assert!(!READ_WINDOW_SQL.contains("'$1'"));
    }
}
