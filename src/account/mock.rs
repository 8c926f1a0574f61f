//! Failure-injecting store for pipeline tests
//!
//! Forwards to a real store unless a switch is set. Injected failures look
//! like a dropped connection (`PoolTimedOut`).

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::Notify;

use super::models::{Account, NewLogEntry, TransactionLogEntry};
use super::store::{AccountStore, StoreError, StoreResult};
use crate::core_types::{AccountId, ScaledAmount, TimestampMs};

pub struct FaultyStore {
    inner: Arc<dyn AccountStore>,
    /// Positive `update_balance_atomic` deltas fail
    fail_credit: Mutex<bool>,
    /// Negative `update_balance_atomic` deltas fail
    fail_debit: Mutex<bool>,
    fail_update_tier: Mutex<bool>,
    fail_insert_log: Mutex<bool>,
    /// Park `update_balance_atomic` before it reaches the inner store
    hold_updates: Mutex<bool>,
    update_entered: Notify,
    update_release: Notify,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn AccountStore>) -> Self {
        Self {
            inner,
            fail_credit: Mutex::new(false),
            fail_debit: Mutex::new(false),
            fail_update_tier: Mutex::new(false),
            fail_insert_log: Mutex::new(false),
            hold_updates: Mutex::new(false),
            update_entered: Notify::new(),
            update_release: Notify::new(),
        }
    }

    pub fn set_fail_credit(&self, fail: bool) {
        *self.fail_credit.lock().unwrap() = fail;
    }

    pub fn set_fail_debit(&self, fail: bool) {
        *self.fail_debit.lock().unwrap() = fail;
    }

    pub fn set_fail_update_tier(&self, fail: bool) {
        *self.fail_update_tier.lock().unwrap() = fail;
    }

    pub fn set_fail_insert_log(&self, fail: bool) {
        *self.fail_insert_log.lock().unwrap() = fail;
    }

    pub fn set_hold_updates(&self, hold: bool) {
        *self.hold_updates.lock().unwrap() = hold;
    }

    /// Resolves once a held update is parked
    pub async fn update_parked(&self) {
        self.update_entered.notified().await;
    }

    /// Let one parked update through
    pub fn release_update(&self) {
        self.update_release.notify_one();
    }

    fn injected() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl AccountStore for FaultyStore {
    fn backend(&self) -> &'static str {
        "faulty"
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.inner.initialize().await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    async fn get_or_create(&self, id: &AccountId, display_name: &str) -> StoreResult<Account> {
        self.inner.get_or_create(id, display_name).await
    }

    async fn get(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        self.inner.get(id).await
    }

    async fn get_by_display_name(&self, name: &str) -> StoreResult<Option<Account>> {
        self.inner.get_by_display_name(name).await
    }

    async fn update_balance_atomic(
        &self,
        id: &AccountId,
        delta: ScaledAmount,
    ) -> StoreResult<Option<ScaledAmount>> {
        let hold = *self.hold_updates.lock().unwrap();
        if hold {
            self.update_entered.notify_one();
            self.update_release.notified().await;
        }
        if delta > 0 && *self.fail_credit.lock().unwrap() {
            return Err(Self::injected());
        }
        if delta < 0 && *self.fail_debit.lock().unwrap() {
            return Err(Self::injected());
        }
        self.inner.update_balance_atomic(id, delta).await
    }

    async fn transfer_atomic(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: ScaledAmount,
    ) -> StoreResult<bool> {
        self.inner.transfer_atomic(from, to, amount).await
    }

    async fn set_balance(&self, id: &AccountId, balance: ScaledAmount) -> StoreResult<bool> {
        self.inner.set_balance(id, balance).await
    }

    async fn update_tier(&self, id: &AccountId, tier: i64) -> StoreResult<bool> {
        if *self.fail_update_tier.lock().unwrap() {
            return Err(Self::injected());
        }
        self.inner.update_tier(id, tier).await
    }

    async fn insert_log(&self, entry: &NewLogEntry) -> StoreResult<i64> {
        if *self.fail_insert_log.lock().unwrap() {
            return Err(Self::injected());
        }
        self.inner.insert_log(entry).await
    }

    async fn transaction_history(
        &self,
        id: &AccountId,
        limit: u32,
    ) -> StoreResult<Vec<TransactionLogEntry>> {
        self.inner.transaction_history(id, limit).await
    }

    async fn accounts_eligible_for_interest(
        &self,
        min_balance: ScaledAmount,
    ) -> StoreResult<Vec<Account>> {
        self.inner.accounts_eligible_for_interest(min_balance).await
    }

    async fn apply_interest(
        &self,
        id: &AccountId,
        amount: ScaledAmount,
        at: TimestampMs,
    ) -> StoreResult<Option<ScaledAmount>> {
        self.inner.apply_interest(id, amount, at).await
    }

    async fn revert_interest(
        &self,
        id: &AccountId,
        amount: ScaledAmount,
        applied_at: TimestampMs,
        previous_at: Option<TimestampMs>,
    ) -> StoreResult<bool> {
        self.inner
            .revert_interest(id, amount, applied_at, previous_at)
            .await
    }

    async fn top_accounts(&self, limit: u32) -> StoreResult<Vec<Account>> {
        self.inner.top_accounts(limit).await
    }

    fn invalidate_cache(&self, id: &AccountId) {
        self.inner.invalidate_cache(id);
    }
}
