//! Account management module
//!
//! The [`AccountStore`] boundary and its backends: SQLite (embedded,
//! single writer), PostgreSQL (networked, pooled) and a caching decorator.

pub mod cache;
#[cfg(test)]
pub mod mock;
pub mod models;
pub mod postgres;
pub mod schema;
pub mod sqlite;
pub mod store;

// Re-export commonly used types
pub use cache::CachedAccountStore;
pub use models::{Account, NewLogEntry, TransactionLogEntry, TransactionType};
pub use postgres::PgAccountStore;
pub use sqlite::SqliteAccountStore;
pub use store::{AccountStore, MAX_HISTORY_LIMIT, StoreError, StoreResult};

// Re-export Database from top-level db module
pub use crate::db::Database;
