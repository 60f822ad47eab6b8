//! Database configuration and environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::storage::PgSettings;

use super::validation::ConfigError;

/// Default connection pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default pool acquire timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default PostgreSQL port.
pub const DEFAULT_PG_PORT: u16 = 5432;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PG_PORT
}

fn default_database() -> String {
    "logs".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_path() -> String {
    "cluster.db".to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

/// Storage backend selection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DatabaseDriver {
    /// PostgreSQL server (production).
    #[default]
    Postgres,
    /// Embedded SQLite file or `:memory:`.
    Sqlite,
}

/// Database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Storage backend (default: postgres).
    #[serde(default)]
    pub driver: DatabaseDriver,

    /// PostgreSQL host (env: `POSTGRES_HOST`, default: localhost).
    #[serde(default = "default_host")]
    pub host: String,

    /// PostgreSQL port (env: `POSTGRES_PORT`, default: 5432).
    #[serde(default = "default_port")]
    pub port: u16,

    /// PostgreSQL database (env: `POSTGRES_DATABASE`, default: logs).
    #[serde(default = "default_database")]
    pub database: String,

    /// PostgreSQL user (env: `POSTGRES_USER`, default: postgres).
    #[serde(default = "default_user")]
    pub user: String,

    /// PostgreSQL password (env: `POSTGRES_PASSWORD`, default: empty).
    #[serde(default)]
    pub password: String,

    /// SQLite database path, or `:memory:` (sqlite driver only).
    #[serde(default = "default_path")]
    pub path: String,

    /// Maximum pooled connections (default: 5).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Pool acquire timeout (default: "30s").
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            host: default_host(),
            port: DEFAULT_PG_PORT,
            database: default_database(),
            user: default_user(),
            password: String::new(),
            path: default_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("target", &self.connection_url())
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl DatabaseConfig {
    /// SQLite configuration for the given path (`:memory:` for a transient store).
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: DatabaseDriver::Sqlite,
            path: path.into(),
            ..Self::default()
        }
    }

    /// Apply `POSTGRES_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `POSTGRES_*` overrides from a custom lookup.
    ///
    /// Empty values are ignored, except for the password which may be empty.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = non_empty("POSTGRES_HOST") {
            self.host = host;
        }
        if let Some(port) = non_empty("POSTGRES_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid POSTGRES_PORT"),
            }
        }
        if let Some(database) = non_empty("POSTGRES_DATABASE") {
            self.database = database;
        }
        if let Some(user) = non_empty("POSTGRES_USER") {
            self.user = user;
        }
        if let Some(password) = lookup("POSTGRES_PASSWORD") {
            self.password = password;
        }
        self
    }

    /// Human-readable connection target with the password redacted.
    pub fn connection_url(&self) -> String {
        match self.driver {
            DatabaseDriver::Postgres => format!(
                "postgresql://{}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ),
            DatabaseDriver::Sqlite => self.sqlite_url(),
        }
    }

    /// sqlx URL for the SQLite backend.
    pub fn sqlite_url(&self) -> String {
        if self.path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", self.path)
        }
    }

    /// Connection parameters for the PostgreSQL backend.
    pub fn pg_settings(&self) -> PgSettings {
        PgSettings {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            max_connections: self.max_connections,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database max_connections must be positive".to_string(),
            ));
        }
        match self.driver {
            DatabaseDriver::Postgres => {
                if self.host.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "database host cannot be empty".to_string(),
                    ));
                }
                if self.database.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "database name cannot be empty".to_string(),
                    ));
                }
            }
            DatabaseDriver::Sqlite => {
                if self.path.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "database path cannot be empty for sqlite".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
