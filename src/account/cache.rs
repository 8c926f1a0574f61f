//! Read-through account cache
//!
//! Wraps any [`AccountStore`] with a `DashMap` of recently read accounts.
//! Local mutations drop the touched entries; remote mutations arrive
//! through [`AccountStore::invalidate_cache`] via the cross-instance
//! notifier. Balance primitives always go to the inner store, and the
//! touched entries are dropped both before and after the write so a read
//! racing the write cannot repopulate the cache with the old row.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use super::models::{Account, NewLogEntry, TransactionLogEntry};
use super::store::{AccountStore, StoreResult};
use crate::core_types::{AccountId, ScaledAmount, TimestampMs};

pub struct CachedAccountStore {
    inner: Arc<dyn AccountStore>,
    accounts: DashMap<AccountId, Account>,
    hits: AtomicU64,
    invalidations: AtomicU64,
}

impl CachedAccountStore {
    pub fn new(inner: Arc<dyn AccountStore>) -> Self {
        Self {
            inner,
            accounts: DashMap::new(),
            hits: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn is_cached(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id)
    }

    fn forget(&self, id: &AccountId) {
        self.accounts.remove(id);
    }
}

#[async_trait]
impl AccountStore for CachedAccountStore {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.inner.initialize().await
    }

    async fn shutdown(&self) {
        self.accounts.clear();
        self.inner.shutdown().await;
    }

    async fn get_or_create(&self, id: &AccountId, display_name: &str) -> StoreResult<Account> {
        let account = self.inner.get_or_create(id, display_name).await?;
        self.accounts.insert(*id, account.clone());
        Ok(account)
    }

    async fn get(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        if let Some(cached) = self.accounts.get(id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(cached.clone()));
        }
        let account = self.inner.get(id).await?;
        if let Some(a) = &account {
            self.accounts.insert(*id, a.clone());
        }
        Ok(account)
    }

    async fn get_by_display_name(&self, name: &str) -> StoreResult<Option<Account>> {
        self.inner.get_by_display_name(name).await
    }

    async fn update_balance_atomic(
        &self,
        id: &AccountId,
        delta: ScaledAmount,
    ) -> StoreResult<Option<ScaledAmount>> {
        self.forget(id);
        let result = self.inner.update_balance_atomic(id, delta).await;
        self.forget(id);
        result
    }

    async fn transfer_atomic(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: ScaledAmount,
    ) -> StoreResult<bool> {
        self.forget(from);
        self.forget(to);
        let result = self.inner.transfer_atomic(from, to, amount).await;
        self.forget(from);
        self.forget(to);
        result
    }

    async fn set_balance(&self, id: &AccountId, balance: ScaledAmount) -> StoreResult<bool> {
        self.forget(id);
        let result = self.inner.set_balance(id, balance).await;
        self.forget(id);
        result
    }

    async fn update_tier(&self, id: &AccountId, tier: i64) -> StoreResult<bool> {
        self.forget(id);
        let result = self.inner.update_tier(id, tier).await;
        self.forget(id);
        result
    }

    async fn insert_log(&self, entry: &NewLogEntry) -> StoreResult<i64> {
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
        self.forget(id);
        let result = self.inner.apply_interest(id, amount, at).await;
        self.forget(id);
        result
    }

    async fn revert_interest(
        &self,
        id: &AccountId,
        amount: ScaledAmount,
        applied_at: TimestampMs,
        previous_at: Option<TimestampMs>,
    ) -> StoreResult<bool> {
        self.forget(id);
        let result = self
            .inner
            .revert_interest(id, amount, applied_at, previous_at)
            .await;
        self.forget(id);
        result
    }

    async fn top_accounts(&self, limit: u32) -> StoreResult<Vec<Account>> {
        self.inner.top_accounts(limit).await
    }

    fn invalidate_cache(&self, id: &AccountId) {
        if self.accounts.remove(id).is_some() {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            trace!(account_id = %id, "Cache entry invalidated");
        }
        self.inner.invalidate_cache(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::mock::FaultyStore;
    use crate::account::sqlite::SqliteAccountStore;

    async fn setup() -> (Arc<SqliteAccountStore>, CachedAccountStore) {
        let inner = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
        let cached = CachedAccountStore::new(inner.clone());
        (inner, cached)
    }

    #[tokio::test]
    async fn test_reads_are_cached() {
        let (_, cached) = setup().await;
        let id = AccountId::new();
        cached.get_or_create(&id, "alice").await.unwrap();

        cached.get(&id).await.unwrap();
        cached.get(&id).await.unwrap();
        assert_eq!(cached.hits(), 2);
    }

    #[tokio::test]
    async fn test_local_mutation_drops_entry() {
        let (_, cached) = setup().await;
        let id = AccountId::new();
        cached.get_or_create(&id, "alice").await.unwrap();

        cached.update_balance_atomic(&id, 300).await.unwrap();
        assert!(!cached.is_cached(&id));
        assert_eq!(cached.get(&id).await.unwrap().unwrap().balance, 300);
    }

    #[tokio::test]
    async fn test_read_racing_a_write_does_not_leave_stale_entry() {
        let inner = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
        let faulty = Arc::new(FaultyStore::new(inner));
        let cached = Arc::new(CachedAccountStore::new(faulty.clone()));
        let id = AccountId::new();
        cached.get_or_create(&id, "alice").await.unwrap();

        faulty.set_hold_updates(true);
        let writer = {
            let cached = cached.clone();
            tokio::spawn(async move { cached.update_balance_atomic(&id, 700).await })
        };
        faulty.update_parked().await;

        // Unlocked reader slips in between the first drop and the write
        assert_eq!(cached.get(&id).await.unwrap().unwrap().balance, 0);
        assert!(cached.is_cached(&id));

        faulty.release_update();
        assert_eq!(writer.await.unwrap().unwrap(), Some(700));
        assert!(!cached.is_cached(&id));
        assert_eq!(cached.get(&id).await.unwrap().unwrap().balance, 700);
    }

    #[tokio::test]
    async fn test_remote_change_visible_after_invalidation() {
        let (inner, cached) = setup().await;
        let id = AccountId::new();
        cached.get_or_create(&id, "alice").await.unwrap();

        // Another instance writes straight to the shared store
        inner.update_balance_atomic(&id, 900).await.unwrap();
        assert_eq!(cached.get(&id).await.unwrap().unwrap().balance, 0);

        cached.invalidate_cache(&id);
        assert_eq!(cached.invalidations(), 1);
        assert_eq!(cached.get(&id).await.unwrap().unwrap().balance, 900);
    }
}
