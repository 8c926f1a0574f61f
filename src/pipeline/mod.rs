//! Transaction pipeline
//!
//! Deposit, withdraw, transfer, tier upgrade, admin adjustment and
//! interest credit, each guarded by the distributed account lock and
//! unwound through a compensation saga on partial failure.
//!
//! # Flow
//!
//! ```text
//! caller ──▶ TransactionPipeline ──▶ DistributedLockCoordinator
//!                  │                        │
//!                  ├──▶ AccountStore ◀──────┘ (re-read under lock)
//!                  ├──▶ ExternalWallet / SecondaryCurrency
//!                  ├──▶ CrossInstanceNotifier ──▶ other instances
//!                  └──▶ EventBus (pre / post / level-up)
//! ```

pub mod cooldown;
pub mod error;
pub mod result;
pub mod saga;
pub mod service;


pub use cooldown::CooldownTracker;
pub use error::{ErrorCategory, LedgerError};
pub use result::TransactionResult;
pub use saga::{Compensation, Saga};
pub use service::{AdminMode, PipelineDeps, TransactionPipeline};
