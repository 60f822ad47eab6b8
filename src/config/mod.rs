//! Configuration module for the cluster CLI.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Collector server settings (bind address, port)
//! - Heartbeat store settings (driver, PostgreSQL credentials, pool size)
//! - Deployment settings for the Ansible and kubectl wrappers

mod app;
mod database;
mod deploy;
mod validation;

pub use app::{AppConfig, DEFAULT_PORT, ServerConfig};
pub use database::{DatabaseConfig, DatabaseDriver};
pub use deploy::DeployConfig;
pub use validation::{ConfigError, expand_env_vars, expand_vars_with};
