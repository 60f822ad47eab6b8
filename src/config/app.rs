//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::database::DatabaseConfig;
use super::deploy::DeployConfig;
use super::validation::{ConfigError, expand_env_vars};

/// Default collector port.
pub const DEFAULT_PORT: u16 = 8080;

// =============================================================================
// Server Configuration
// =============================================================================

/// Collector HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080). The `run collector [PORT]` argument wins.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
///
/// Built once in `main` and handed to each subcommand by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Collector server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Heartbeat store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Ansible / kubectl settings.
    #[serde(default)]
    pub deploy: DeployConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        self.database.validate()?;

        Ok(())
    }
}
