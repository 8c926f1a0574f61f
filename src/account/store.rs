//! AccountStore boundary
//!
//! The store owns the only atomic balance primitives. Every balance
//! mutation is a relative update executed inside one statement (or one
//! database transaction for transfers); application code never computes a
//! new balance from a prior read outside the per-account lock.

use async_trait::async_trait;
use thiserror::Error;

use super::models::{Account, NewLogEntry, TransactionLogEntry};
use crate::core_types::{AccountId, ScaledAmount, TimestampMs};

/// History queries never return more than this many rows
pub const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store not initialized")]
    NotInitialized,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Name for logging
    fn backend(&self) -> &'static str;

    /// Create tables and indexes (idempotent)
    async fn initialize(&self) -> StoreResult<()>;

    async fn shutdown(&self);

    /// Existing account, or a new one with zero balance at tier 1.
    /// Renames the account when the display name drifted.
    async fn get_or_create(&self, id: &AccountId, display_name: &str) -> StoreResult<Account>;

    async fn get(&self, id: &AccountId) -> StoreResult<Option<Account>>;

    /// Case-insensitive; the most recently active account wins on duplicates
    async fn get_by_display_name(&self, name: &str) -> StoreResult<Option<Account>>;

    /// `balance = balance + delta` in one statement.
    ///
    /// Returns the new balance, or `None` when the account does not exist.
    /// Does not refuse a delta that drives the balance negative; callers
    /// check under the account lock.
    async fn update_balance_atomic(
        &self,
        id: &AccountId,
        delta: ScaledAmount,
    ) -> StoreResult<Option<ScaledAmount>>;

    /// One database transaction: debit `from` only if its balance covers
    /// `amount` (checked in the debit statement itself), then credit `to`.
    /// Any step failing rolls back everything and yields `false`.
    async fn transfer_atomic(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: ScaledAmount,
    ) -> StoreResult<bool>;

    /// Absolute overwrite; `false` when the account does not exist
    async fn set_balance(&self, id: &AccountId, balance: ScaledAmount) -> StoreResult<bool>;

    async fn update_tier(&self, id: &AccountId, tier: i64) -> StoreResult<bool>;

    /// Append an audit row, returning its sequence id
    async fn insert_log(&self, entry: &NewLogEntry) -> StoreResult<i64>;

    /// Newest first, at most [`MAX_HISTORY_LIMIT`] rows
    async fn transaction_history(
        &self,
        id: &AccountId,
        limit: u32,
    ) -> StoreResult<Vec<TransactionLogEntry>>;

    async fn accounts_eligible_for_interest(
        &self,
        min_balance: ScaledAmount,
    ) -> StoreResult<Vec<Account>>;

    /// Credit interest and stamp `last_interest_at = at` in one statement.
    ///
    /// Guarded by `last_interest_at < at` so the timestamp only moves
    /// forward; `None` when the account is missing or the guard failed.
    async fn apply_interest(
        &self,
        id: &AccountId,
        amount: ScaledAmount,
        at: TimestampMs,
    ) -> StoreResult<Option<ScaledAmount>>;

    /// Undo an [`AccountStore::apply_interest`] stamped `applied_at`:
    /// subtract `amount` from balance and total interest and put back
    /// `previous_at`. `false` when the account is missing or was stamped
    /// again since.
    async fn revert_interest(
        &self,
        id: &AccountId,
        amount: ScaledAmount,
        applied_at: TimestampMs,
        previous_at: Option<TimestampMs>,
    ) -> StoreResult<bool>;

    /// Richest accounts first
    async fn top_accounts(&self, limit: u32) -> StoreResult<Vec<Account>>;

    /// Hook for caching implementations; called when another instance
    /// reports a balance change.
    fn invalidate_cache(&self, _id: &AccountId) {}
}

pub(crate) fn clamp_history_limit(limit: u32) -> i64 {
    limit.clamp(1, MAX_HISTORY_LIMIT) as i64
}
