//! Storage Layer
//!
//! Append-only heartbeat store over a relational database:
//! - **PostgreSQL** in production, configured from `POSTGRES_*`
//! - **SQLite** for local runs and tests
//!
//! # Components
//!
//! - [`LogStore`]: Async trait implemented by every backend
//! - [`LogRow`] / [`AppendRequest`] / [`LogQuery`]: Data model
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod builder;
pub mod db;
mod error;
mod schema;
mod store;
mod types;

pub use builder::{StorageBuilder, StorageHandles};
pub use db::{PgSettings, PostgresLogStore, SqliteLogStore};
pub use error::StorageError;
pub use store::{LogStore, ensure_single_row};
pub use types::{AppendRequest, DEFAULT_LIMIT, LogQuery, LogRow, MAX_LIMIT};
