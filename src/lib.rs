//! Ledger Cluster - multi-instance virtual-currency ledger
//!
//! Several server instances share one account store and one coordination
//! store. Every balance mutation runs under a per-account distributed lock
//! and is announced to the other instances so their caches stay coherent.
//!
//! # Modules
//!
//! - [`core_types`] - AccountId, InstanceId, ClusterId, amount aliases
//! - [`money`] - Decimal ↔ minor-unit conversion
//! - [`fee`] - Transfer fee arithmetic
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`tier`] - Tier table
//! - [`account`] - Account store boundary (SQLite, PostgreSQL, cache)
//! - [`coordination`] - Coordination store and distributed locks
//! - [`notifier`] - Cross-instance balance-change broadcast
//! - [`events`] - Pre/post transaction listeners
//! - [`external`] - External wallet, secondary currency, sessions
//! - [`requirements`] - Tier requirement expressions
//! - [`pipeline`] - Transaction pipeline with compensation
//! - [`interest`] - Periodic interest accrual

// Core types - must be first!
pub mod core_types;
pub mod money;

pub mod config;
pub mod logging;

pub mod db;
pub mod fee;
pub mod tier;

pub mod account;
pub mod coordination;
pub mod events;
pub mod external;
pub mod notifier;
pub mod requirements;

pub mod interest;
pub mod pipeline;

// Convenient re-exports at crate root
pub use account::{Account, AccountStore, StoreError, TransactionLogEntry, TransactionType};
pub use config::AppConfig;
pub use coordination::{CoordinationStore, DistributedLockCoordinator};
pub use core_types::{AccountId, ClusterId, InstanceId, ScaledAmount, TimestampMs};
pub use events::{EventBus, EventDecision, TransactionListener};
pub use interest::{CycleReport, InterestAccrualEngine, InterestPolicy};
pub use money::MoneyError;
pub use notifier::CrossInstanceNotifier;
pub use pipeline::{AdminMode, LedgerError, PipelineDeps, TransactionPipeline, TransactionResult};
pub use tier::{TierDefinition, TierTable};
