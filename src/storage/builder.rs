//! Storage builder and handles.
//!
//! Provides a builder for connecting the configured backend and a handles
//! struct that owns the shared [`LogStore`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DatabaseConfig, DatabaseDriver};
use crate::storage::db::{PostgresLogStore, SqliteLogStore};
use crate::storage::{LogStore, StorageError};

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    config: DatabaseConfig,
    migrate: bool,
}

impl StorageBuilder {
    /// Create a new storage builder from database configuration.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            migrate: false,
        }
    }

    /// Set the maximum number of pooled connections.
    pub fn max_connections(mut self, size: u32) -> Self {
        self.config.max_connections = size;
        self
    }

    /// Set the pool acquire timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Run the schema migration as part of `build()`.
    ///
    /// The collector service migrates explicitly so it can report the
    /// `Migrating` phase; `tools db migrate` uses this shortcut.
    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    /// Connect to the configured backend and return handles.
    ///
    /// # Errors
    /// Any connection failure; the caller treats it as fatal.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        if self.config.max_connections == 0 {
            return Err(StorageError::Internal(
                "max_connections must be positive".to_string(),
            ));
        }

        tracing::info!(
            driver = %self.config.driver,
            target = %self.config.connection_url(),
            "Connecting to heartbeat store"
        );

        let store: Arc<dyn LogStore> = match self.config.driver {
            DatabaseDriver::Postgres => {
                Arc::new(PostgresLogStore::connect(&self.config.pg_settings()).await?)
            }
            DatabaseDriver::Sqlite => Arc::new(
                SqliteLogStore::connect_with(
                    &self.config.sqlite_url(),
                    self.config.max_connections,
                    self.config.connect_timeout,
                )
                .await?,
            ),
        };

        if self.migrate {
            store.migrate().await?;
        }

        Ok(StorageHandles { store })
    }
}

/// Handles to the storage layer.
#[derive(Clone)]
pub struct StorageHandles {
    /// Shared heartbeat store.
    pub store: Arc<dyn LogStore>,
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles")
            .field("backend", &self.store.backend())
            .finish()
    }
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer by closing the pool.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.store.close().await;
        tracing::info!(backend = self.store.backend(), "Storage closed");
        Ok(())
    }
}
