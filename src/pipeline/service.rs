//! Transaction Pipeline
//!
//! Orchestrates every balance mutation:
//!
//! ```text
//! Validate → AcquireLock(s) → ReadCurrentState → PreEvent → Mutate → Log → Publish → PostEvent → ReleaseLock(s)
//! ```
//!
//! # Invariants
//!
//! 1. **Re-read under lock**: decisions are made on state read after the
//!    lock is held, with the local cache entry dropped first
//! 2. **Relative mutation**: balances only change through the store's
//!    atomic primitives
//! 3. **Compensate, never leave half-done**: every mutating step records
//!    its inverse in a [`Saga`]; a later failure unwinds newest-first
//! 4. **No panics, no errors across the boundary**: every path ends in a
//!    [`TransactionResult`]

use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::cooldown::CooldownTracker;
use super::error::{ErrorCategory, LedgerError};
use super::result::TransactionResult;
use super::saga::{Compensation, CompensationTargets, Saga};
use crate::account::{
    Account, AccountStore, NewLogEntry, StoreResult, TransactionLogEntry, TransactionType,
};
use crate::config::{LedgerConfig, OverflowPolicy};
use crate::coordination::DistributedLockCoordinator;
use crate::core_types::{AccountId, InstanceId, ScaledAmount, TimestampMs, now_ms};
use crate::events::{EventBus, EventDecision, LevelUpEvent, PostTransactionEvent, PreTransactionEvent};
use crate::external::{
    ExternalWallet, HolderContext, NotificationSink, SecondaryCurrency, SessionGateway,
};
use crate::fee;
use crate::money::{self, MoneyError};
use crate::notifier::CrossInstanceNotifier;
use crate::requirements::RequirementSet;
use crate::tier::{TierDefinition, TierTable};

/// Administrative adjustment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminMode {
    Give,
    /// Removes at most the current balance
    Take,
    /// Absolute overwrite
    Set,
}

impl AdminMode {
    pub fn tx_type(&self) -> TransactionType {
        match self {
            AdminMode::Give => TransactionType::AdminGive,
            AdminMode::Take => TransactionType::AdminTake,
            AdminMode::Set => TransactionType::AdminSet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdminMode::Give => "give",
            AdminMode::Take => "take",
            AdminMode::Set => "set",
        }
    }
}

/// Collaborators the pipeline is built from
pub struct PipelineDeps {
    pub store: Arc<dyn AccountStore>,
    pub locks: Arc<DistributedLockCoordinator>,
    pub notifier: Arc<CrossInstanceNotifier>,
    pub wallet: Arc<dyn ExternalWallet>,
    pub secondary: Arc<dyn SecondaryCurrency>,
    pub holder: Arc<dyn HolderContext>,
    pub sessions: Arc<dyn SessionGateway>,
    pub sink: Arc<dyn NotificationSink>,
    pub events: EventBus,
}

pub struct TransactionPipeline {
    store: Arc<dyn AccountStore>,
    locks: Arc<DistributedLockCoordinator>,
    notifier: Arc<CrossInstanceNotifier>,
    wallet: Arc<dyn ExternalWallet>,
    secondary: Arc<dyn SecondaryCurrency>,
    holder: Arc<dyn HolderContext>,
    sessions: Arc<dyn SessionGateway>,
    sink: Arc<dyn NotificationSink>,
    events: EventBus,
    tiers: TierTable,
    /// Index = tier level - 1
    requirements: Vec<RequirementSet>,
    ledger: LedgerConfig,
    min_amount: ScaledAmount,
    max_amount: ScaledAmount,
    cooldown: CooldownTracker,
    instance: InstanceId,
    op_timeout: Duration,
}

impl TransactionPipeline {
    pub fn new(
        deps: PipelineDeps,
        ledger: LedgerConfig,
        tiers: TierTable,
        op_timeout: Duration,
    ) -> Result<Self, MoneyError> {
        let min_amount = money::to_scaled(ledger.min_transaction)?;
        let max_amount = money::to_scaled(ledger.max_transaction)?;
        let requirements = (1..=tiers.max_level())
            .map(|level| RequirementSet::parse(&tiers.get(level).requirements))
            .collect();
        let instance = deps.notifier.instance().clone();

        Ok(Self {
            store: deps.store,
            locks: deps.locks,
            notifier: deps.notifier,
            wallet: deps.wallet,
            secondary: deps.secondary,
            holder: deps.holder,
            sessions: deps.sessions,
            sink: deps.sink,
            events: deps.events,
            tiers,
            requirements,
            cooldown: CooldownTracker::new(ledger.cooldown()),
            ledger,
            min_amount,
            max_amount,
            instance,
            op_timeout,
        })
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    pub fn sessions(&self) -> &Arc<dyn SessionGateway> {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Move `amount` from the holder's external wallet into the ledger.
    ///
    /// The credit is clamped to the tier max (or rejected, per
    /// `deposit_overflow_policy`) unless the holder has the unlimited
    /// capability.
    pub async fn deposit(
        &self,
        account: &AccountId,
        display_name: &str,
        amount: Decimal,
        reason: &str,
    ) -> TransactionResult {
        let mut result = TransactionResult::new(TransactionType::Deposit, *account);
        let outcome = self
            .run_deposit(account, display_name, amount, reason, &mut result)
            .await;
        self.finish(result, outcome)
    }

    /// Move `amount` out of the ledger into the holder's external wallet
    pub async fn withdraw(
        &self,
        account: &AccountId,
        display_name: &str,
        amount: Decimal,
        reason: &str,
    ) -> TransactionResult {
        let mut result = TransactionResult::new(TransactionType::Withdraw, *account);
        let outcome = self
            .run_withdraw(account, display_name, amount, reason, &mut result)
            .await;
        self.finish(result, outcome)
    }

    /// Pay `amount` to the account whose display name is `recipient_name`.
    ///
    /// The fee is charged on top of the principal in a separate debit. If
    /// that debit fails after the principal moved, the principal stands and
    /// the result reports `fee = 0`.
    pub async fn transfer(
        &self,
        sender: &AccountId,
        sender_name: &str,
        recipient_name: &str,
        amount: Decimal,
    ) -> TransactionResult {
        let mut result = TransactionResult::new(TransactionType::TransferOut, *sender);
        let outcome = self
            .run_transfer(sender, sender_name, recipient_name, amount, &mut result)
            .await;
        self.finish(result, outcome)
    }

    /// Advance one tier. Unmet requirements are listed in
    /// `unmet_requirements`.
    pub async fn upgrade_tier(&self, account: &AccountId, display_name: &str) -> TransactionResult {
        let mut result = TransactionResult::new(TransactionType::TierUpgrade, *account);
        let outcome = self.run_upgrade(account, display_name, &mut result).await;
        self.finish(result, outcome)
    }

    /// Operator adjustment; skips cooldown and tier max
    pub async fn admin_adjust(
        &self,
        target: &AccountId,
        target_name: &str,
        amount: Decimal,
        admin: &str,
        mode: AdminMode,
    ) -> TransactionResult {
        let mut result = TransactionResult::new(mode.tx_type(), *target);
        let outcome = self
            .run_admin(target, target_name, amount, admin, mode, &mut result)
            .await;
        self.finish(result, outcome)
    }

    /// Credit interest computed from the account state read under lock.
    ///
    /// Returns `None` when the account was skipped: interest already
    /// applied less than half an `interval` ago, or `compute` yielded
    /// nothing.
    pub async fn accrue_interest<F>(
        &self,
        account: &AccountId,
        interval: Duration,
        at: TimestampMs,
        compute: F,
    ) -> Option<TransactionResult>
    where
        F: FnOnce(&Account, &TierDefinition) -> ScaledAmount + Send,
    {
        let mut result = TransactionResult::new(TransactionType::Interest, *account);
        let guard = match self.locks.acquire(account, self.locks.default_timeout()).await {
            Ok(g) => g,
            Err(e) => return Some(self.finish(result, Err(e.into()))),
        };
        let outcome = self
            .interest_locked(account, interval, at, compute, &mut result)
            .await;
        self.locks.release(guard).await;

        match outcome {
            Ok(true) => Some(self.finish(result, Ok(()))),
            Ok(false) => None,
            Err(e) => Some(self.finish(result, Err(e))),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn account(&self, id: &AccountId) -> Result<Option<Account>, LedgerError> {
        self.store_op(self.store.get(id)).await
    }

    /// Newest first, capped at 100 entries
    pub async fn history(
        &self,
        id: &AccountId,
        limit: u32,
    ) -> Result<Vec<TransactionLogEntry>, LedgerError> {
        self.store_op(self.store.transaction_history(id, limit))
            .await
    }

    pub async fn top_accounts(&self, limit: u32) -> Result<Vec<Account>, LedgerError> {
        self.store_op(self.store.top_accounts(limit)).await
    }

    // ========================================================================
    // Deposit / Withdraw
    // ========================================================================

    async fn run_deposit(
        &self,
        account: &AccountId,
        display_name: &str,
        amount: Decimal,
        reason: &str,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let amount = self.validate_amount(amount)?;
        self.check_cooldown(account)?;
        if !self.wallet.has(account, amount).await? {
            return Err(LedgerError::InsufficientWalletFunds);
        }

        let guard = self
            .locks
            .acquire(account, self.locks.default_timeout())
            .await?;
        let outcome = self
            .deposit_locked(account, display_name, amount, reason, result)
            .await;
        self.locks.release(guard).await;

        if outcome.is_ok() {
            self.cooldown.stamp(account);
        }
        outcome
    }

    async fn deposit_locked(
        &self,
        account: &AccountId,
        display_name: &str,
        amount: ScaledAmount,
        reason: &str,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let current = self.read_locked(account, display_name).await?;
        result.observe(current.balance);
        self.check_event(account, TransactionType::Deposit, amount, current.balance)?;

        let credit = self.fit_deposit(&current, amount).await?;
        result.processed = credit;

        self.wallet.withdraw(account, credit).await?;
        let mut saga = Saga::new("deposit", *account);
        saga.record(Compensation::RefundWallet {
            account: *account,
            amount: credit,
        });

        let new_balance = match self
            .store_op(self.store.update_balance_atomic(account, credit))
            .await
        {
            Ok(Some(b)) => b,
            Ok(None) => return Err(self.unwind(&mut saga, LedgerError::AccountNotFound).await),
            Err(e) => return Err(self.unwind(&mut saga, e).await),
        };
        saga.record(Compensation::ReverseCredit {
            account: *account,
            amount: credit,
        });

        let entry = self.entry(
            &current,
            TransactionType::Deposit,
            credit,
            current.balance,
            new_balance,
            reason,
        );
        if let Err(e) = self.write_log(&entry).await {
            return Err(self.unwind(&mut saga, e).await);
        }
        saga.commit();

        result.new_balance = new_balance;
        self.publish(account, new_balance).await;
        self.fire_after(account, TransactionType::Deposit, credit, current.balance, new_balance);
        Ok(())
    }

    /// Amount that may be credited without passing the tier max
    async fn fit_deposit(
        &self,
        current: &Account,
        amount: ScaledAmount,
    ) -> Result<ScaledAmount, LedgerError> {
        if self
            .holder
            .has_capability(&current.id, &self.ledger.unlimited_capability)
            .await
        {
            return match current.balance.checked_add(amount) {
                Some(_) => Ok(amount),
                None => Err(MoneyError::Overflow.into()),
            };
        }

        let max = self.tiers.get(current.tier).max_balance_scaled()?;
        let room = max.saturating_sub(current.balance);
        if amount <= room {
            return Ok(amount);
        }
        match self.ledger.deposit_overflow_policy {
            OverflowPolicy::Clamp if room > 0 => {
                debug!(
                    account_id = %current.id,
                    requested = amount,
                    credited = room,
                    "Deposit clamped to tier max"
                );
                Ok(room)
            }
            _ => Err(LedgerError::MaxBalanceReached {
                max: money::from_scaled(max),
            }),
        }
    }

    async fn run_withdraw(
        &self,
        account: &AccountId,
        display_name: &str,
        amount: Decimal,
        reason: &str,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let amount = self.validate_amount(amount)?;
        self.check_cooldown(account)?;

        let guard = self
            .locks
            .acquire(account, self.locks.default_timeout())
            .await?;
        let outcome = self
            .withdraw_locked(account, display_name, amount, reason, result)
            .await;
        self.locks.release(guard).await;

        if outcome.is_ok() {
            self.cooldown.stamp(account);
        }
        outcome
    }

    async fn withdraw_locked(
        &self,
        account: &AccountId,
        display_name: &str,
        amount: ScaledAmount,
        reason: &str,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let current = self.read_locked(account, display_name).await?;
        result.observe(current.balance);
        self.check_event(account, TransactionType::Withdraw, amount, current.balance)?;

        if current.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                available: money::from_scaled(current.balance),
                required: money::from_scaled(amount),
            });
        }

        let mut saga = Saga::new("withdraw", *account);
        let new_balance = match self
            .store_op(self.store.update_balance_atomic(account, -amount))
            .await?
        {
            Some(b) => b,
            None => return Err(LedgerError::AccountNotFound),
        };
        if new_balance < 0 {
            error!(
                account_id = %account,
                amount,
                new_balance,
                "CRITICAL: balance negative after debit under lock, restoring"
            );
            saga.record(Compensation::RestoreBalance {
                account: *account,
                balance: new_balance + amount,
            });
            let err = LedgerError::Persistence("balance went negative after debit".to_string());
            return Err(self.unwind(&mut saga, err).await);
        }
        saga.record(Compensation::ReverseDebit {
            account: *account,
            amount,
        });

        if let Err(e) = self.wallet.deposit(account, amount).await {
            return Err(self.unwind(&mut saga, e.into()).await);
        }
        saga.record(Compensation::ReclaimWallet {
            account: *account,
            amount,
        });

        let entry = self.entry(
            &current,
            TransactionType::Withdraw,
            amount,
            current.balance,
            new_balance,
            reason,
        );
        if let Err(e) = self.write_log(&entry).await {
            return Err(self.unwind(&mut saga, e).await);
        }
        saga.commit();

        result.processed = amount;
        result.new_balance = new_balance;
        self.publish(account, new_balance).await;
        self.fire_after(account, TransactionType::Withdraw, amount, current.balance, new_balance);
        Ok(())
    }

    // ========================================================================
    // Transfer
    // ========================================================================

    async fn run_transfer(
        &self,
        sender: &AccountId,
        sender_name: &str,
        recipient_name: &str,
        amount: Decimal,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let amount = self.validate_amount(amount)?;
        if amount > self.max_amount {
            return Err(LedgerError::AboveMaximum {
                max: money::from_scaled(self.max_amount),
            });
        }
        let recipient_name = recipient_name.trim();
        if sender_name.trim().eq_ignore_ascii_case(recipient_name) {
            return Err(LedgerError::SelfTransfer);
        }
        self.check_cooldown(sender)?;

        let recipient = self
            .store_op(self.store.get_by_display_name(recipient_name))
            .await?
            .ok_or_else(|| LedgerError::RecipientNotFound(recipient_name.to_string()))?;
        if recipient.id == *sender {
            return Err(LedgerError::SelfTransfer);
        }
        if !self.ledger.allow_offline_transfers && !self.sessions.is_online(&recipient.id) {
            return Err(LedgerError::RecipientOffline);
        }
        let fee = fee::calculate_fee(amount, self.ledger.transfer_fee_rate)?;

        let guard = self
            .locks
            .acquire_pair(sender, &recipient.id, self.locks.default_timeout())
            .await?;
        let outcome = self
            .transfer_locked(sender, sender_name, &recipient.id, recipient_name, amount, fee, result)
            .await;
        self.locks.release(guard).await;

        if outcome.is_ok() {
            self.cooldown.stamp(sender);
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer_locked(
        &self,
        sender: &AccountId,
        sender_name: &str,
        recipient_id: &AccountId,
        recipient_name: &str,
        amount: ScaledAmount,
        fee: ScaledAmount,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let from = self.read_locked(sender, sender_name).await?;
        result.observe(from.balance);
        self.store.invalidate_cache(recipient_id);
        let to = self
            .store_op(self.store.get(recipient_id))
            .await?
            .ok_or_else(|| LedgerError::RecipientNotFound(recipient_name.to_string()))?;

        self.check_event(sender, TransactionType::TransferOut, amount, from.balance)?;

        let required = fee::required_total(amount, fee).ok_or(MoneyError::Overflow)?;
        if from.balance < required {
            return Err(LedgerError::InsufficientFunds {
                available: money::from_scaled(from.balance),
                required: money::from_scaled(required),
            });
        }
        let to_max = self.tiers.get(to.tier).max_balance_scaled()?;
        if to.balance.checked_add(amount).is_none_or(|b| b > to_max) {
            return Err(LedgerError::RecipientMaxBalance {
                max: money::from_scaled(to_max),
            });
        }

        if !self
            .store_op(self.store.transfer_atomic(sender, &to.id, amount))
            .await?
        {
            return Err(LedgerError::InsufficientFunds {
                available: money::from_scaled(from.balance),
                required: money::from_scaled(amount),
            });
        }
        let mut saga = Saga::new("transfer", *sender);
        saga.record(Compensation::ReverseTransfer {
            from: *sender,
            to: to.id,
            amount,
        });

        let (charged, sender_after) = self.charge_fee(sender, fee, from.balance - amount).await;
        if charged > 0 {
            saga.record(Compensation::ReverseDebit {
                account: *sender,
                amount: charged,
            });
        }
        let recipient_after = to.balance + amount;

        let out_entry = NewLogEntry {
            counterparty: Some((to.id, to.display_name.clone())),
            ..self.entry(
                &from,
                TransactionType::TransferOut,
                amount,
                from.balance,
                sender_after,
                &format!("Transfer to {}", to.display_name),
            )
        };
        let in_entry = NewLogEntry {
            counterparty: Some((from.id, from.display_name.clone())),
            ..self.entry(
                &to,
                TransactionType::TransferIn,
                amount,
                to.balance,
                recipient_after,
                &format!("Transfer from {}", from.display_name),
            )
        };
        for entry in [&out_entry, &in_entry] {
            if let Err(e) = self.write_log(entry).await {
                return Err(self.unwind(&mut saga, e).await);
            }
        }
        saga.commit();

        result.processed = amount;
        result.fee = charged;
        result.new_balance = sender_after;

        self.publish(sender, sender_after).await;
        self.publish(&to.id, recipient_after).await;
        self.fire_after(
            sender,
            TransactionType::TransferOut,
            amount,
            from.balance,
            sender_after,
        );
        self.fire_after(
            &to.id,
            TransactionType::TransferIn,
            amount,
            to.balance,
            recipient_after,
        );
        if self.sessions.is_online(&to.id) {
            self.sessions.deliver(
                &to.id,
                &format!(
                    "You received {} from {}",
                    money::format_amount(amount),
                    from.display_name
                ),
            );
        }
        Ok(())
    }

    /// Separate fee debit after the principal moved.
    ///
    /// Returns `(fee charged, sender balance)`. A failure here is logged and
    /// yields `(0, balance)`; the principal stands.
    async fn charge_fee(
        &self,
        sender: &AccountId,
        fee: ScaledAmount,
        balance: ScaledAmount,
    ) -> (ScaledAmount, ScaledAmount) {
        if fee == 0 {
            return (0, balance);
        }
        match self
            .store_op(self.store.update_balance_atomic(sender, -fee))
            .await
        {
            Ok(Some(after)) if after >= 0 => (fee, after),
            Ok(Some(after)) => {
                match self
                    .store_op(self.store.update_balance_atomic(sender, fee))
                    .await
                {
                    Ok(Some(_)) => warn!(
                        account_id = %sender,
                        fee,
                        after,
                        "Fee debit drove balance negative and was reverted; transfer stands without fee"
                    ),
                    _ => error!(
                        account_id = %sender,
                        fee,
                        after,
                        "CRITICAL: negative balance after fee debit could not be reverted"
                    ),
                }
                (0, balance)
            }
            Ok(None) => {
                warn!(account_id = %sender, fee, "Fee not charged: sender vanished; transfer stands");
                (0, balance)
            }
            Err(e) => {
                warn!(account_id = %sender, fee, error = %e, "Fee not charged; transfer stands");
                (0, balance)
            }
        }
    }

    // ========================================================================
    // Tier upgrade
    // ========================================================================

    async fn run_upgrade(
        &self,
        account: &AccountId,
        display_name: &str,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let guard = self
            .locks
            .acquire(account, self.locks.default_timeout())
            .await?;
        let outcome = self.upgrade_locked(account, display_name, result).await;
        self.locks.release(guard).await;
        outcome
    }

    async fn upgrade_locked(
        &self,
        account: &AccountId,
        display_name: &str,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let current = self.read_locked(account, display_name).await?;
        result.observe(current.balance);

        let next_level = current.tier + 1;
        let next = self
            .tiers
            .lookup(next_level)
            .ok_or(LedgerError::MaxTierReached)?;

        if let Some(requirements) = self.requirements.get((next_level - 1) as usize) {
            let unmet = requirements.unmet(self.holder.as_ref(), account).await;
            if !unmet.is_empty() {
                let count = unmet.len();
                result.unmet_requirements = unmet;
                return Err(LedgerError::RequirementsNotMet { count });
            }
        }

        let cost = next.upgrade_cost_scaled()?;
        self.check_event(account, TransactionType::TierUpgrade, cost, current.balance)?;
        if current.balance < cost {
            return Err(LedgerError::InsufficientFunds {
                available: money::from_scaled(current.balance),
                required: money::from_scaled(cost),
            });
        }
        let secondary_cost = next.upgrade_secondary_cost;
        if secondary_cost > 0 && !self.secondary.has(account, secondary_cost).await {
            return Err(LedgerError::InsufficientSecondary {
                required: secondary_cost,
            });
        }

        let mut saga = Saga::new("upgrade_tier", *account);
        let mut new_balance = current.balance;
        if cost > 0 {
            new_balance = match self
                .store_op(self.store.update_balance_atomic(account, -cost))
                .await?
            {
                Some(b) => b,
                None => return Err(LedgerError::AccountNotFound),
            };
            saga.record(Compensation::ReverseDebit {
                account: *account,
                amount: cost,
            });
        }
        if secondary_cost > 0 {
            if !self.secondary.take(account, secondary_cost).await {
                let err = LedgerError::InsufficientSecondary {
                    required: secondary_cost,
                };
                return Err(self.unwind(&mut saga, err).await);
            }
            saga.record(Compensation::RefundSecondary {
                account: *account,
                amount: secondary_cost,
            });
        }

        match self
            .store_op(self.store.update_tier(account, next_level))
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(self.unwind(&mut saga, LedgerError::AccountNotFound).await),
            Err(e) => return Err(self.unwind(&mut saga, e).await),
        }
        saga.record(Compensation::RestoreTier {
            account: *account,
            tier: current.tier,
        });

        let entry = self.entry(
            &current,
            TransactionType::TierUpgrade,
            cost,
            current.balance,
            new_balance,
            &format!("Upgrade to {}", next.name),
        );
        if let Err(e) = self.write_log(&entry).await {
            return Err(self.unwind(&mut saga, e).await);
        }
        saga.commit();

        result.processed = cost;
        result.new_balance = new_balance;
        self.publish(account, new_balance).await;
        self.fire_after(
            account,
            TransactionType::TierUpgrade,
            cost,
            current.balance,
            new_balance,
        );
        self.events.fire_level_up(&LevelUpEvent {
            account_id: *account,
            previous_tier: current.tier,
            new_tier: next_level,
        });
        info!(
            account_id = %account,
            tier = next_level,
            tier_name = %next.name,
            "Tier upgraded"
        );
        Ok(())
    }

    // ========================================================================
    // Admin
    // ========================================================================

    async fn run_admin(
        &self,
        target: &AccountId,
        target_name: &str,
        amount: Decimal,
        admin: &str,
        mode: AdminMode,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let amount = money::to_scaled(amount)?;
        if mode != AdminMode::Set && amount <= 0 {
            return Err(LedgerError::InvalidAmount(
                "amount must be positive".to_string(),
            ));
        }

        let guard = self
            .locks
            .acquire(target, self.locks.default_timeout())
            .await?;
        let outcome = self
            .admin_locked(target, target_name, amount, admin, mode, result)
            .await;
        self.locks.release(guard).await;
        outcome
    }

    async fn admin_locked(
        &self,
        target: &AccountId,
        target_name: &str,
        amount: ScaledAmount,
        admin: &str,
        mode: AdminMode,
        result: &mut TransactionResult,
    ) -> Result<(), LedgerError> {
        let current = self.read_locked(target, target_name).await?;
        result.observe(current.balance);
        let tx_type = mode.tx_type();
        self.check_event(target, tx_type, amount, current.balance)?;

        let mut saga = Saga::new("admin_adjust", *target);
        let (processed, new_balance) = match mode {
            AdminMode::Give => {
                let b = self.delta_or_missing(target, amount).await?;
                saga.record(Compensation::ReverseCredit {
                    account: *target,
                    amount,
                });
                (amount, b)
            }
            AdminMode::Take => {
                let take = amount.min(current.balance);
                if take <= 0 {
                    return Err(LedgerError::InsufficientFunds {
                        available: money::from_scaled(current.balance),
                        required: money::from_scaled(amount),
                    });
                }
                let b = self.delta_or_missing(target, -take).await?;
                saga.record(Compensation::ReverseDebit {
                    account: *target,
                    amount: take,
                });
                (take, b)
            }
            AdminMode::Set => {
                if !self
                    .store_op(self.store.set_balance(target, amount))
                    .await?
                {
                    return Err(LedgerError::AccountNotFound);
                }
                saga.record(Compensation::RestoreBalance {
                    account: *target,
                    balance: current.balance,
                });
                (amount, amount)
            }
        };

        let entry = NewLogEntry {
            admin: Some(admin.to_string()),
            ..self.entry(
                &current,
                tx_type,
                processed,
                current.balance,
                new_balance,
                &format!("Admin {} by {}", mode.as_str(), admin),
            )
        };
        if let Err(e) = self.write_log(&entry).await {
            return Err(self.unwind(&mut saga, e).await);
        }
        saga.commit();

        result.processed = processed;
        result.new_balance = new_balance;
        self.publish(target, new_balance).await;
        self.fire_after(target, tx_type, processed, current.balance, new_balance);
        self.sink.notify(admin, mode.as_str(), target_name, processed);
        Ok(())
    }

    // ========================================================================
    // Interest
    // ========================================================================

    async fn interest_locked<F>(
        &self,
        account: &AccountId,
        interval: Duration,
        at: TimestampMs,
        compute: F,
        result: &mut TransactionResult,
    ) -> Result<bool, LedgerError>
    where
        F: FnOnce(&Account, &TierDefinition) -> ScaledAmount + Send,
    {
        self.store.invalidate_cache(account);
        let current = self
            .store_op(self.store.get(account))
            .await?
            .ok_or(LedgerError::AccountNotFound)?;
        result.observe(current.balance);

        // Half an interval of slack so a late timer tick never drops the next cycle
        let min_gap = (interval.as_millis() / 2) as i64;
        if let Some(last) = current.last_interest_at {
            if at.saturating_sub(last) < min_gap {
                debug!(account_id = %account, last_interest_at = last, "Interest already applied this cycle");
                return Ok(false);
            }
        }

        let interest = compute(&current, self.tiers.get(current.tier));
        if interest <= 0 {
            return Ok(false);
        }
        self.check_event(account, TransactionType::Interest, interest, current.balance)?;

        let new_balance = match self
            .store_op(self.store.apply_interest(account, interest, at))
            .await?
        {
            Some(b) => b,
            None => return Ok(false),
        };
        let mut saga = Saga::new("interest", *account);
        saga.record(Compensation::ReverseInterest {
            account: *account,
            amount: interest,
            applied_at: at,
            previous_at: current.last_interest_at,
        });

        let entry = self.entry(
            &current,
            TransactionType::Interest,
            interest,
            current.balance,
            new_balance,
            "Interest",
        );
        if let Err(e) = self.write_log(&entry).await {
            return Err(self.unwind(&mut saga, e).await);
        }
        saga.commit();

        result.processed = interest;
        result.new_balance = new_balance;
        self.publish(account, new_balance).await;
        self.fire_after(
            account,
            TransactionType::Interest,
            interest,
            current.balance,
            new_balance,
        );
        Ok(true)
    }

    // ========================================================================
    // Steps
    // ========================================================================

    fn validate_amount(&self, amount: Decimal) -> Result<ScaledAmount, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(
                "amount must be positive".to_string(),
            ));
        }
        let scaled = money::to_scaled(amount)?;
        if scaled < self.min_amount.max(1) {
            return Err(LedgerError::BelowMinimum {
                min: money::from_scaled(self.min_amount.max(1)),
            });
        }
        Ok(scaled)
    }

    fn check_cooldown(&self, account: &AccountId) -> Result<(), LedgerError> {
        self.cooldown
            .check(account)
            .map_err(|remaining| LedgerError::CooldownActive {
                remaining_ms: remaining.as_millis() as u64,
            })
    }

    fn check_event(
        &self,
        account: &AccountId,
        tx_type: TransactionType,
        amount: ScaledAmount,
        balance: ScaledAmount,
    ) -> Result<(), LedgerError> {
        let event = PreTransactionEvent {
            account_id: *account,
            tx_type,
            amount,
            balance,
        };
        match self.events.fire_before(&event) {
            EventDecision::Allow => Ok(()),
            EventDecision::Deny(reason) => Err(LedgerError::Cancelled(reason)),
        }
    }

    /// Fresh read under the lock; remote writes may have landed since the
    /// cache was filled
    async fn read_locked(
        &self,
        account: &AccountId,
        display_name: &str,
    ) -> Result<Account, LedgerError> {
        self.store.invalidate_cache(account);
        self.store_op(self.store.get_or_create(account, display_name))
            .await
    }

    async fn delta_or_missing(
        &self,
        account: &AccountId,
        delta: ScaledAmount,
    ) -> Result<ScaledAmount, LedgerError> {
        self.store_op(self.store.update_balance_atomic(account, delta))
            .await?
            .ok_or(LedgerError::AccountNotFound)
    }

    async fn store_op<T>(
        &self,
        op: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, LedgerError> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(r) => r.map_err(LedgerError::from),
            Err(_) => Err(LedgerError::Persistence(format!(
                "store operation timed out after {} ms",
                self.op_timeout.as_millis()
            ))),
        }
    }

    async fn write_log(&self, entry: &NewLogEntry) -> Result<i64, LedgerError> {
        self.store_op(self.store.insert_log(entry)).await
    }

    fn entry(
        &self,
        account: &Account,
        tx_type: TransactionType,
        amount: ScaledAmount,
        before: ScaledAmount,
        after: ScaledAmount,
        reason: &str,
    ) -> NewLogEntry {
        NewLogEntry {
            account_id: account.id,
            display_name: account.display_name.clone(),
            tx_type,
            amount,
            balance_before: before,
            balance_after: after,
            counterparty: None,
            origin: self.instance.clone(),
            reason: reason.to_string(),
            admin: None,
            created_at: now_ms(),
        }
    }

    async fn unwind(&self, saga: &mut Saga, err: LedgerError) -> LedgerError {
        let targets = CompensationTargets {
            store: self.store.as_ref(),
            wallet: self.wallet.as_ref(),
            secondary: self.secondary.as_ref(),
        };
        saga.compensate(&targets).await;
        err
    }

    async fn publish(&self, account: &AccountId, new_balance: ScaledAmount) {
        self.notifier
            .publish_balance_change(account, new_balance)
            .await;
    }

    fn fire_after(
        &self,
        account: &AccountId,
        tx_type: TransactionType,
        amount: ScaledAmount,
        before: ScaledAmount,
        after: ScaledAmount,
    ) {
        self.events.fire_after(&PostTransactionEvent {
            account_id: *account,
            tx_type,
            amount,
            balance_before: before,
            balance_after: after,
        });
    }

    fn finish(
        &self,
        result: TransactionResult,
        outcome: Result<(), LedgerError>,
    ) -> TransactionResult {
        match &outcome {
            Ok(()) => info!(
                account_id = %result.account_id,
                tx_type = %result.tx_type,
                amount = result.processed,
                fee = result.fee,
                new_balance = result.new_balance,
                "Transaction committed"
            ),
            Err(e) => match e.category() {
                ErrorCategory::Persistence | ErrorCategory::External | ErrorCategory::Coordination => {
                    warn!(
                        account_id = %result.account_id,
                        tx_type = %result.tx_type,
                        code = e.code(),
                        error = %e,
                        "Transaction failed"
                    )
                }
                _ => debug!(
                    account_id = %result.account_id,
                    tx_type = %result.tx_type,
                    code = e.code(),
                    "Transaction rejected"
                ),
            },
        }
        result.finish(outcome)
    }
}
