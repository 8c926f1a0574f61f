//! Coordination store boundary
//!
//! Advisory mutual exclusion and pub/sub shared by every instance of a
//! cluster. The coordination store is never durable state: losing it costs
//! cross-instance exclusion and cache invalidation, never balances.
//!
//! # Backends
//!
//! - [`memory::InMemoryCoordination`] - process-local, for single-instance
//!   deployments and tests
//! - [`postgres::PgCoordination`] - lock rows with owner tokens plus
//!   `LISTEN/NOTIFY`
//!
//! [`lock::DistributedLockCoordinator`] builds per-account locking on top.

pub mod lock;
pub mod memory;
pub mod postgres;

pub use lock::{DistributedLockCoordinator, LockError, LockGuard, LockHandle};
pub use memory::InMemoryCoordination;
pub use postgres::PgCoordination;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

/// Stream of raw payloads published on one topic
pub type PayloadStream = BoxStream<'static, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// The store cannot be reached; callers may degrade
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("Coordination store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for CoordinationError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => CoordinationError::Unavailable(e.to_string()),
            other => CoordinationError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Name for logging
    fn backend(&self) -> &'static str;

    /// Take `key` for `token` unless another live owner holds it.
    /// An expired owner is replaced.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration)
    -> Result<bool, CoordinationError>;

    /// Compare-and-delete: removes the lock only if `token` still owns it
    async fn unlock(&self, key: &str, token: &str) -> Result<bool, CoordinationError>;

    /// Fire-and-forget broadcast to every current subscriber of `topic`
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CoordinationError>;

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, CoordinationError>;
}
