//! Transaction listeners
//!
//! Observers invoked in-line with the pipeline step that fires them:
//!
//! | Event | When | Can cancel |
//! |-------|------|-----------|
//! | [`PreTransactionEvent`] | after the lock and re-read, before any mutation | yes, via [`EventDecision::Deny`] |
//! | [`PostTransactionEvent`] | after the mutation is committed and logged | no |
//! | [`LevelUpEvent`] | after a tier upgrade commits | no |
//!
//! Listeners run while the account lock is held and must not block.

use std::sync::Arc;

use tracing::debug;

use crate::account::TransactionType;
use crate::core_types::{AccountId, ScaledAmount};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDecision {
    Allow,
    Deny(String),
}

impl EventDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, EventDecision::Allow)
    }
}

#[derive(Debug, Clone)]
pub struct PreTransactionEvent {
    pub account_id: AccountId,
    pub tx_type: TransactionType,
    pub amount: ScaledAmount,
    pub balance: ScaledAmount,
}

#[derive(Debug, Clone)]
pub struct PostTransactionEvent {
    pub account_id: AccountId,
    pub tx_type: TransactionType,
    pub amount: ScaledAmount,
    pub balance_before: ScaledAmount,
    pub balance_after: ScaledAmount,
}

#[derive(Debug, Clone)]
pub struct LevelUpEvent {
    pub account_id: AccountId,
    pub previous_tier: i64,
    pub new_tier: i64,
}

/// Every method defaults to a no-op, so listeners override only what they watch
pub trait TransactionListener: Send + Sync {
    fn before(&self, _event: &PreTransactionEvent) -> EventDecision {
        EventDecision::Allow
    }

    fn after(&self, _event: &PostTransactionEvent) {}

    fn level_up(&self, _event: &LevelUpEvent) {}
}

/// Immutable listener list, built once before the pipeline starts
#[derive(Default, Clone)]
pub struct EventBus {
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransactionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// First denial wins; later listeners are not consulted
    pub fn fire_before(&self, event: &PreTransactionEvent) -> EventDecision {
        for listener in &self.listeners {
            if let EventDecision::Deny(reason) = listener.before(event) {
                debug!(
                    account_id = %event.account_id,
                    tx_type = %event.tx_type,
                    reason = %reason,
                    "Transaction denied by listener"
                );
                return EventDecision::Deny(reason);
            }
        }
        EventDecision::Allow
    }

    pub fn fire_after(&self, event: &PostTransactionEvent) {
        for listener in &self.listeners {
            listener.after(event);
        }
    }

    pub fn fire_level_up(&self, event: &LevelUpEvent) {
        for listener in &self.listeners {
            listener.level_up(event);
        }
    }
}
