//! SQLite account store
//!
//! Single-writer embedded backend. The pool holds exactly one connection,
//! which also keeps `sqlite::memory:` databases alive for the pool lifetime.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::models::{Account, AccountRow, LogRow, NewLogEntry, TransactionLogEntry};
use super::schema::SQLITE_SCHEMA;
use super::store::{AccountStore, StoreResult, clamp_history_limit};
use crate::core_types::{AccountId, ScaledAmount, TimestampMs, now_ms};

const ACCOUNT_COLUMNS: &str = "id, display_name, balance, tier, total_interest, \
     last_interest_at, last_active_at, created_at, updated_at";

const LOG_COLUMNS: &str = "seq, account_id, display_name, tx_type, amount, balance_before, \
     balance_after, counterparty_id, counterparty_name, origin_instance, reason, is_admin, \
     admin_name, created_at";

pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    /// Open (creating if missing) a database file or `sqlite::memory:`
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        info!(url = %url, "SQLite account store opened");
        Ok(Self { pool })
    }

    /// Fresh in-memory store with the schema applied
    pub async fn in_memory() -> StoreResult<Self> {
        let store = Self::connect("sqlite::memory:").await?;
        store.initialize().await?;
        Ok(store)
    }

    async fn fetch_account(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {} FROM ledger_accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.key())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn initialize(&self) -> StoreResult<()> {
        for statement in SQLITE_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    async fn shutdown(&self) {
        self.pool.close().await;
    }

    async fn get_or_create(&self, id: &AccountId, display_name: &str) -> StoreResult<Account> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ledger_accounts
                (id, display_name, balance, tier, total_interest, last_interest_at,
                 last_active_at, created_at, updated_at)
            VALUES (?, ?, 0, 1, 0, NULL, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id.key())
        .bind(display_name)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let renamed = sqlx::query(
            r#"
            UPDATE ledger_accounts SET display_name = ?, updated_at = ?
            WHERE id = ? AND display_name <> ?
            "#,
        )
        .bind(display_name)
        .bind(now)
        .bind(id.key())
        .bind(display_name)
        .execute(&mut *tx)
        .await?;
        if renamed.rows_affected() > 0 {
            debug!(account_id = %id, name = %display_name, "Display name updated");
        }

        let sql = format!("SELECT {} FROM ledger_accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(id.key())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Account::try_from(row)
    }

    async fn get(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        self.fetch_account(id).await
    }

    async fn get_by_display_name(&self, name: &str) -> StoreResult<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM ledger_accounts WHERE LOWER(display_name) = LOWER(?) \
             ORDER BY last_active_at DESC LIMIT 1",
            ACCOUNT_COLUMNS
        );
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn update_balance_atomic(
        &self,
        id: &AccountId,
        delta: ScaledAmount,
    ) -> StoreResult<Option<ScaledAmount>> {
        let now = now_ms();
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE ledger_accounts
            SET balance = balance + ?, updated_at = ?, last_active_at = ?
            WHERE id = ?
            RETURNING balance
            "#,
        )
        .bind(delta)
        .bind(now)
        .bind(now)
        .bind(id.key())
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn transfer_atomic(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: ScaledAmount,
    ) -> StoreResult<bool> {
        if amount <= 0 || from == to {
            return Ok(false);
        }
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        // Sufficiency is checked in the debit statement itself
        let debited = sqlx::query(
            r#"
            UPDATE ledger_accounts
            SET balance = balance - ?, updated_at = ?, last_active_at = ?
            WHERE id = ? AND balance >= ?
            "#,
        )
        .bind(amount)
        .bind(now)
        .bind(now)
        .bind(from.key())
        .bind(amount)
        .execute(&mut *tx)
        .await?;
        if debited.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        let credited = sqlx::query(
            "UPDATE ledger_accounts SET balance = balance + ?, updated_at = ? WHERE id = ?",
        )
        .bind(amount)
        .bind(now)
        .bind(to.key())
        .execute(&mut *tx)
        .await?;
        if credited.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn set_balance(&self, id: &AccountId, balance: ScaledAmount) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE ledger_accounts SET balance = ?, updated_at = ? WHERE id = ?")
                .bind(balance)
                .bind(now_ms())
                .bind(id.key())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_tier(&self, id: &AccountId, tier: i64) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE ledger_accounts SET tier = ?, updated_at = ? WHERE id = ?")
            .bind(tier)
            .bind(now_ms())
            .bind(id.key())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_log(&self, entry: &NewLogEntry) -> StoreResult<i64> {
        let (counterparty_id, counterparty_name) = match &entry.counterparty {
            Some((id, name)) => (Some(id.key()), Some(name.as_str())),
            None => (None, None),
        };
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_transactions
                (account_id, display_name, tx_type, amount, balance_before, balance_after,
                 counterparty_id, counterparty_name, origin_instance, reason, is_admin,
                 admin_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING seq
            "#,
        )
        .bind(entry.account_id.key())
        .bind(&entry.display_name)
        .bind(entry.tx_type.id() as i64)
        .bind(entry.amount)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(counterparty_id)
        .bind(counterparty_name)
        .bind(entry.origin.as_str())
        .bind(&entry.reason)
        .bind(entry.admin.is_some())
        .bind(entry.admin.as_deref())
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(seq)
    }

    async fn transaction_history(
        &self,
        id: &AccountId,
        limit: u32,
    ) -> StoreResult<Vec<TransactionLogEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_transactions WHERE account_id = ? ORDER BY seq DESC LIMIT ?",
            LOG_COLUMNS
        );
        let rows: Vec<LogRow> = sqlx::query_as(&sql)
            .bind(id.key())
            .bind(clamp_history_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TransactionLogEntry::try_from).collect()
    }

    async fn accounts_eligible_for_interest(
        &self,
        min_balance: ScaledAmount,
    ) -> StoreResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM ledger_accounts WHERE balance >= ? ORDER BY balance DESC",
            ACCOUNT_COLUMNS
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(min_balance)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    async fn apply_interest(
        &self,
        id: &AccountId,
        amount: ScaledAmount,
        at: TimestampMs,
    ) -> StoreResult<Option<ScaledAmount>> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE ledger_accounts
            SET balance = balance + ?, total_interest = total_interest + ?,
                last_interest_at = ?, updated_at = ?
            WHERE id = ? AND (last_interest_at IS NULL OR last_interest_at < ?)
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(amount)
        .bind(at)
        .bind(at)
        .bind(id.key())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn revert_interest(
        &self,
        id: &AccountId,
        amount: ScaledAmount,
        applied_at: TimestampMs,
        previous_at: Option<TimestampMs>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_accounts
            SET balance = balance - ?, total_interest = total_interest - ?,
                last_interest_at = ?, updated_at = ?
            WHERE id = ? AND last_interest_at = ?
            "#,
        )
        .bind(amount)
        .bind(amount)
        .bind(previous_at)
        .bind(now_ms())
        .bind(id.key())
        .bind(applied_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn top_accounts(&self, limit: u32) -> StoreResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM ledger_accounts ORDER BY balance DESC, display_name ASC LIMIT ?",
            ACCOUNT_COLUMNS
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(clamp_history_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Account::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::models::TransactionType;
    use crate::core_types::InstanceId;
    use std::sync::Arc;

    async fn store() -> SqliteAccountStore {
        SqliteAccountStore::in_memory().await.unwrap()
    }

    fn log(id: &AccountId, amount: i64) -> NewLogEntry {
        NewLogEntry {
            account_id: *id,
            display_name: "alice".into(),
            tx_type: TransactionType::Deposit,
            amount,
            balance_before: 0,
            balance_after: amount,
            counterparty: None,
            origin: InstanceId::from("test"),
            reason: "test".into(),
            admin: None,
            created_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent_and_renames() {
        let store = store().await;
        let id = AccountId::new();

        let created = store.get_or_create(&id, "Alice").await.unwrap();
        assert_eq!(created.balance, 0);
        assert_eq!(created.tier, 1);

        store.update_balance_atomic(&id, 500).await.unwrap();
        let again = store.get_or_create(&id, "AliceRenamed").await.unwrap();
        assert_eq!(again.balance, 500);
        assert_eq!(again.display_name, "AliceRenamed");
        assert_eq!(again.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_lookup_by_name_is_case_insensitive() {
        let store = store().await;
        let id = AccountId::new();
        store.get_or_create(&id, "Notch").await.unwrap();

        let found = store.get_by_display_name("nOTCH").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(store.get_by_display_name("jeb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_balance_missing_account() {
        let store = store().await;
        assert_eq!(
            store
                .update_balance_atomic(&AccountId::new(), 10)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_concurrent_deltas_no_lost_update() {
        let store = Arc::new(store().await);
        let id = AccountId::new();
        store.get_or_create(&id, "alice").await.unwrap();
        store.set_balance(&id, 10_000).await.unwrap();

        let deltas: Vec<i64> = (1..=40).map(|i| if i % 3 == 0 { -i } else { i * 2 }).collect();
        let expected = 10_000 + deltas.iter().sum::<i64>();

        let handles: Vec<_> = deltas
            .into_iter()
            .map(|d| {
                let store = store.clone();
                tokio::spawn(async move { store.update_balance_atomic(&id, d).await.unwrap() })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.get(&id).await.unwrap().unwrap().balance, expected);
    }

    #[tokio::test]
    async fn test_transfer_atomic_checks_balance_in_statement() {
        let store = store().await;
        let a = AccountId::new();
        let b = AccountId::new();
        store.get_or_create(&a, "a").await.unwrap();
        store.get_or_create(&b, "b").await.unwrap();
        store.set_balance(&a, 1_000).await.unwrap();

        assert!(!store.transfer_atomic(&a, &b, 1_001).await.unwrap());
        assert!(store.transfer_atomic(&a, &b, 400).await.unwrap());

        assert_eq!(store.get(&a).await.unwrap().unwrap().balance, 600);
        assert_eq!(store.get(&b).await.unwrap().unwrap().balance, 400);
    }

    #[tokio::test]
    async fn test_transfer_atomic_rolls_back_on_missing_receiver() {
        let store = store().await;
        let a = AccountId::new();
        store.get_or_create(&a, "a").await.unwrap();
        store.set_balance(&a, 1_000).await.unwrap();

        assert!(
            !store
                .transfer_atomic(&a, &AccountId::new(), 100)
                .await
                .unwrap()
        );
        // Debit was rolled back
        assert_eq!(store.get(&a).await.unwrap().unwrap().balance, 1_000);
    }

    #[tokio::test]
    async fn test_history_newest_first_and_capped() {
        let store = store().await;
        let id = AccountId::new();
        for i in 1..=5 {
            store.insert_log(&log(&id, i)).await.unwrap();
        }
        let history = store.transaction_history(&id, 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].amount, 5);
        assert!(history[0].seq > history[1].seq);
    }

    #[tokio::test]
    async fn test_apply_interest_timestamp_monotonic() {
        let store = store().await;
        let id = AccountId::new();
        store.get_or_create(&id, "saver").await.unwrap();
        store.set_balance(&id, 10_000).await.unwrap();

        assert_eq!(
            store.apply_interest(&id, 100, 2_000).await.unwrap(),
            Some(10_100)
        );
        // Same or earlier stamp is refused
        assert_eq!(store.apply_interest(&id, 100, 2_000).await.unwrap(), None);
        assert_eq!(store.apply_interest(&id, 100, 1_000).await.unwrap(), None);

        let account = store.get(&id).await.unwrap().unwrap();
        assert_eq!(account.total_interest, 100);
        assert_eq!(account.last_interest_at, Some(2_000));
    }

    #[tokio::test]
    async fn test_revert_interest_restores_stamp_and_total() {
        let store = store().await;
        let id = AccountId::new();
        store.get_or_create(&id, "saver").await.unwrap();
        store.set_balance(&id, 10_000).await.unwrap();
        store.apply_interest(&id, 100, 2_000).await.unwrap();
        store.apply_interest(&id, 50, 3_000).await.unwrap();

        // Only the latest stamp can be reverted
        assert!(!store.revert_interest(&id, 100, 2_000, None).await.unwrap());
        assert!(store.revert_interest(&id, 50, 3_000, Some(2_000)).await.unwrap());

        let account = store.get(&id).await.unwrap().unwrap();
        assert_eq!(account.balance, 10_100);
        assert_eq!(account.total_interest, 100);
        assert_eq!(account.last_interest_at, Some(2_000));

        // The same cycle can be applied again
        assert_eq!(
            store.apply_interest(&id, 50, 3_000).await.unwrap(),
            Some(10_150)
        );
    }

    #[tokio::test]
    async fn test_eligible_and_top_accounts() {
        let store = store().await;
        for (name, balance) in [("a", 50), ("b", 5_000), ("c", 20_000)] {
            let id = AccountId::new();
            store.get_or_create(&id, name).await.unwrap();
            store.set_balance(&id, balance).await.unwrap();
        }
        let eligible = store.accounts_eligible_for_interest(5_000).await.unwrap();
        assert_eq!(eligible.len(), 2);

        let top = store.top_accounts(1).await.unwrap();
        assert_eq!(top[0].display_name, "c");
    }
}
