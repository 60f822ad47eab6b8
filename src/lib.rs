//! Cluster - Operations Library
//!
//! Core functionality for the `cluster` operations CLI. The centrepiece is
//! the fleet heartbeat collector: nodes check in over HTTP, check-ins are
//! appended to a relational store, and liveness/history queries are answered
//! from it.
//!
//! # Architecture
//!
//! - **Config**: YAML configuration with environment overrides
//! - **Storage**: Append-only heartbeat log on PostgreSQL or SQLite
//! - **Server**: Axum routes for health, append and read
//! - **Service**: Collector lifecycle with bounded graceful drain
//! - **Tools**: Ansible and kubectl wrappers behind one trait
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cluster::{CollectorService, DatabaseConfig, StorageBuilder, shutdown_signal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handles = StorageBuilder::new(DatabaseConfig::default().with_env_overrides())
//!         .build()
//!         .await?;
//!     let service = CollectorService::new(handles.store.clone());
//!     service.migrate().await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     service.serve(listener, shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod server;
pub mod service;
pub mod storage;
pub mod tools;

pub use config::{AppConfig, ConfigError, DatabaseConfig, DatabaseDriver, DeployConfig};
pub use server::{ApiError, ApiResponse, AppState, create_router};
pub use service::{
    CollectorService, DRAIN_TIMEOUT, DrainOutcome, Phase, ServiceError, shutdown_signal,
};
pub use storage::{
    AppendRequest, LogQuery, LogRow, LogStore, StorageBuilder, StorageError, StorageHandles,
};
pub use tools::{ExternalTool, ProcessTool, ToolError};
