//! Database backends.
//!
//! - `PostgresLogStore`: production store used by the collector
//! - `SqliteLogStore`: embedded store for local runs and tests
//!
//! Both implement [`LogStore`](crate::storage::LogStore) with the same SQL
//! shape; only placeholder syntax and the clock expression differ.

mod postgres;
mod sqlite;

pub use postgres::{PgSettings, PostgresLogStore};
pub use sqlite::SqliteLogStore;
