//! PostgreSQL account store
//!
//! Networked multi-writer backend over a `PgPool`. Balance primitives are
//! single relative UPDATE statements; the schema's `CHECK (balance >= 0)`
//! makes a negative commit impossible even if a caller skips its checks.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::models::{Account, AccountRow, LogRow, NewLogEntry, TransactionLogEntry};
use super::schema::PG_SCHEMA;
use super::store::{AccountStore, StoreResult, clamp_history_limit};
use crate::core_types::{AccountId, ScaledAmount, TimestampMs, now_ms};

const ACCOUNT_COLUMNS: &str = "id, display_name, balance, tier, total_interest, \
     last_interest_at, last_active_at, created_at, updated_at";

const LOG_COLUMNS: &str = "seq, account_id, display_name, tx_type, amount, balance_before, \
     balance_after, counterparty_id, counterparty_name, origin_instance, reason, is_admin, \
     admin_name, created_at";

pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn initialize(&self) -> StoreResult<()> {
        for statement in PG_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("PostgreSQL ledger schema ready");
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
            VALUES ($1, $2, 0, 1, 0, NULL, $3, $3, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id.key())
        .bind(display_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let renamed = sqlx::query(
            r#"
            UPDATE ledger_accounts SET display_name = $1, updated_at = $2
            WHERE id = $3 AND display_name <> $1
            "#,
        )
        .bind(display_name)
        .bind(now)
        .bind(id.key())
        .execute(&mut *tx)
        .await?;
        if renamed.rows_affected() > 0 {
            debug!(account_id = %id, name = %display_name, "Display name updated");
        }

        let sql = format!("SELECT {} FROM ledger_accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(id.key())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Account::try_from(row)
    }

    async fn get(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {} FROM ledger_accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.key())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn get_by_display_name(&self, name: &str) -> StoreResult<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM ledger_accounts WHERE LOWER(display_name) = LOWER($1) \
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
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE ledger_accounts
            SET balance = balance + $1, updated_at = $2, last_active_at = $2
            WHERE id = $3
            RETURNING balance
            "#,
        )
        .bind(delta)
        .bind(now_ms())
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

        // Conditional debit: the row only matches while it can cover the amount
        let debited = sqlx::query(
            r#"
            UPDATE ledger_accounts
            SET balance = balance - $1, updated_at = $2, last_active_at = $2
            WHERE id = $3 AND balance >= $1
            "#,
        )
        .bind(amount)
        .bind(now)
        .bind(from.key())
        .execute(&mut *tx)
        .await?;
        if debited.rows_affected() != 1 {
            tx.rollback().await?;
            debug!(from = %from, amount, "Transfer debit refused (missing or insufficient)");
            return Ok(false);
        }

        let credited = sqlx::query(
            "UPDATE ledger_accounts SET balance = balance + $1, updated_at = $2 WHERE id = $3",
        )
        .bind(amount)
        .bind(now)
        .bind(to.key())
        .execute(&mut *tx)
        .await?;
        if credited.rows_affected() != 1 {
            tx.rollback().await?;
            warn!(to = %to, "Transfer credit target vanished, rolled back");
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn set_balance(&self, id: &AccountId, balance: ScaledAmount) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE ledger_accounts SET balance = $1, updated_at = $2 WHERE id = $3")
                .bind(balance)
                .bind(now_ms())
                .bind(id.key())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_tier(&self, id: &AccountId, tier: i64) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE ledger_accounts SET tier = $1, updated_at = $2 WHERE id = $3")
                .bind(tier)
                .bind(now_ms())
                .bind(id.key())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_log(&self, entry: &NewLogEntry) -> StoreResult<i64> {
        let (counterparty_id, counterparty_name) = match &entry.counterparty {
            Some((id, name)) => (Some(id.key()), Some(name.clone())),
            None => (None, None),
        };
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_transactions
                (account_id, display_name, tx_type, amount, balance_before, balance_after,
                 counterparty_id, counterparty_name, origin_instance, reason, is_admin,
                 admin_name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
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
        .bind(entry.admin.clone())
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
            "SELECT {} FROM ledger_transactions WHERE account_id = $1 ORDER BY seq DESC LIMIT $2",
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
            "SELECT {} FROM ledger_accounts WHERE balance >= $1 ORDER BY balance DESC",
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
            SET balance = balance + $1, total_interest = total_interest + $1,
                last_interest_at = $2, updated_at = $2
            WHERE id = $3 AND (last_interest_at IS NULL OR last_interest_at < $2)
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(at)
        .bind(id.key())
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
            SET balance = balance - $1, total_interest = total_interest - $1,
                last_interest_at = $2, updated_at = $3
            WHERE id = $4 AND last_interest_at = $5
            "#,
        )
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
            "SELECT {} FROM ledger_accounts ORDER BY balance DESC, display_name ASC LIMIT $1",
            ACCOUNT_COLUMNS
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(clamp_history_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Account::try_from).collect()
    }
}
