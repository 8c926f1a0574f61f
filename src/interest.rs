//! Interest Accrual Engine
//!
//! Background worker that periodically credits interest to every account
//! at or above the configured minimum balance.
//!
//! ```text
//! interest = balance × (online_rate | offline_rate) × tier multiplier
//!          → min(max_per_cycle)
//!          → min(tier max - balance)
//! ```
//!
//! Each credit goes through [`TransactionPipeline::accrue_interest`], so it
//! takes the account lock, re-reads the account and is logged and
//! published like any other mutation. One failing account never aborts
//! the cycle.

use futures::StreamExt;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::account::Account;
use crate::config::InterestConfig;
use crate::core_types::{ScaledAmount, TimestampMs, now_ms};
use crate::money::{self, MoneyError};
use crate::pipeline::{LedgerError, TransactionPipeline};
use crate::tier::TierDefinition;

/// Rates and caps, resolved to minor units once
#[derive(Debug, Clone)]
pub struct InterestPolicy {
    pub online_rate: Decimal,
    pub offline_rate: Decimal,
    pub min_balance: ScaledAmount,
    pub max_per_cycle: ScaledAmount,
}

impl InterestPolicy {
    pub fn from_config(config: &InterestConfig) -> Result<Self, MoneyError> {
        Ok(Self {
            online_rate: config.online_rate,
            offline_rate: config.offline_rate,
            min_balance: money::to_scaled(config.min_balance)?,
            max_per_cycle: money::to_scaled(config.max_per_cycle)?,
        })
    }

    /// Interest for one cycle, already capped; `0` means skip
    pub fn compute(&self, account: &Account, tier: &TierDefinition, online: bool) -> ScaledAmount {
        if account.balance < self.min_balance || account.balance <= 0 {
            return 0;
        }
        let base = if online {
            self.online_rate
        } else {
            self.offline_rate
        };
        let raw = base
            .checked_mul(tier.interest_multiplier)
            .and_then(|rate| money::from_scaled(account.balance).checked_mul(rate));
        let interest = match raw.map(money::round_to_scaled) {
            Some(Ok(v)) => v,
            _ => {
                warn!(account_id = %account.id, "Interest computation overflowed, skipping");
                return 0;
            }
        };

        let room = match tier.max_balance_scaled() {
            Ok(max) => max.saturating_sub(account.balance),
            Err(_) => 0,
        };
        interest.min(self.max_per_cycle).min(room).max(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub credited: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_interest: ScaledAmount,
}

enum AccountOutcome {
    Credited(ScaledAmount),
    Skipped,
    Failed,
}

pub struct InterestAccrualEngine {
    pipeline: Arc<TransactionPipeline>,
    policy: InterestPolicy,
    interval: Duration,
    /// Accounts processed concurrently within a cycle
    batch_size: usize,
}

impl InterestAccrualEngine {
    pub fn new(
        pipeline: Arc<TransactionPipeline>,
        config: &InterestConfig,
    ) -> Result<Self, MoneyError> {
        Ok(Self {
            pipeline,
            policy: InterestPolicy::from_config(config)?,
            interval: config.interval(),
            batch_size: config.batch_size.max(1),
        })
    }

    pub fn policy(&self) -> &InterestPolicy {
        &self.policy
    }

    /// Run cycles forever on the configured interval
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.interval.as_secs(),
            min_balance = %money::format_amount(self.policy.min_balance),
            max_per_cycle = %money::format_amount(self.policy.max_per_cycle),
            "Starting interest accrual engine"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; wait one full interval instead
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Interest cycle failed");
            }
        }
    }

    /// One pass over every eligible account
    pub async fn run_cycle(&self) -> Result<CycleReport, LedgerError> {
        let at = now_ms();
        let accounts = self
            .pipeline
            .store()
            .accounts_eligible_for_interest(self.policy.min_balance)
            .await?;

        let mut report = CycleReport {
            scanned: accounts.len(),
            ..Default::default()
        };
        if accounts.is_empty() {
            debug!("No accounts eligible for interest");
            return Ok(report);
        }

        let outcomes: Vec<AccountOutcome> = futures::stream::iter(accounts)
            .map(|account| self.accrue_one(account, at))
            .buffer_unordered(self.batch_size)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                AccountOutcome::Credited(amount) => {
                    report.credited += 1;
                    report.total_interest += amount;
                }
                AccountOutcome::Skipped => report.skipped += 1,
                AccountOutcome::Failed => report.failed += 1,
            }
        }

        info!(
            scanned = report.scanned,
            credited = report.credited,
            skipped = report.skipped,
            failed = report.failed,
            total_interest = %money::format_amount(report.total_interest),
            "Interest cycle complete"
        );
        Ok(report)
    }

    async fn accrue_one(&self, account: Account, at: TimestampMs) -> AccountOutcome {
        let online = self.pipeline.sessions().is_online(&account.id);
        let policy = &self.policy;
        let result = self
            .pipeline
            .accrue_interest(&account.id, self.interval, at, move |fresh, tier| {
                policy.compute(fresh, tier, online)
            })
            .await;

        match result {
            None => AccountOutcome::Skipped,
            Some(r) if r.is_success() => AccountOutcome::Credited(r.processed),
            Some(r) => {
                error!(
                    account_id = %account.id,
                    code = r.code(),
                    error = ?r.error(),
                    "Interest credit failed"
                );
                AccountOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountStore, CachedAccountStore, SqliteAccountStore};
    use crate::config::{CoordinationConfig, LedgerConfig};
    use crate::coordination::{DistributedLockCoordinator, InMemoryCoordination};
    use crate::core_types::{AccountId, ClusterId, InstanceId};
    use crate::events::EventBus;
    use crate::external::mock::{MockHolder, MockSecondary, MockSessions, MockSink, MockWallet};
    use crate::notifier::CrossInstanceNotifier;
    use crate::pipeline::PipelineDeps;
    use crate::tier::TierTable;
    use rust_decimal_macros::dec;

    fn policy() -> InterestPolicy {
        InterestPolicy {
            online_rate: dec!(0.01),
            offline_rate: dec!(0.005),
            min_balance: 10_000,
            max_per_cycle: 100_000,
        }
    }

    fn account(balance: ScaledAmount) -> Account {
        Account {
            id: AccountId::new(),
            display_name: "x".into(),
            balance,
            tier: 1,
            total_interest: 0,
            last_interest_at: None,
            last_active_at: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn tier(max: Option<Decimal>, multiplier: Decimal) -> TierDefinition {
        TierDefinition {
            name: "t".into(),
            max_balance: max,
            interest_multiplier: multiplier,
            ..Default::default()
        }
    }

    #[test]
    fn test_compute_rates_and_multiplier() {
        let p = policy();
        let acc = account(100_000);
        // 1000.00 × 1% × 1.5 = 15.00
        assert_eq!(p.compute(&acc, &tier(None, dec!(1.5)), true), 1_500);
        // 1000.00 × 0.5% = 5.00
        assert_eq!(p.compute(&acc, &tier(None, dec!(1)), false), 500);
    }

    #[test]
    fn test_compute_caps() {
        let p = InterestPolicy {
            max_per_cycle: 1_000,
            ..policy()
        };
        let acc = account(100_000);
        assert_eq!(p.compute(&acc, &tier(None, dec!(1.5)), true), 1_000);
        // Tier max leaves room for 3.00 only
        assert_eq!(p.compute(&acc, &tier(Some(dec!(1003)), dec!(1)), true), 300);
        assert_eq!(p.compute(&acc, &tier(Some(dec!(900)), dec!(1)), true), 0);
    }

    #[test]
    fn test_compute_below_minimum_is_zero() {
        assert_eq!(policy().compute(&account(9_999), &tier(None, dec!(1)), true), 0);
    }

    async fn engine_with(
        store: Arc<SqliteAccountStore>,
        sessions: Arc<MockSessions>,
    ) -> InterestAccrualEngine {
        let bus = Arc::new(InMemoryCoordination::new());
        let cache = Arc::new(CachedAccountStore::new(store));
        let cluster = ClusterId::new("interest");
        let locks = Arc::new(DistributedLockCoordinator::new(
            bus.clone(),
            cluster.clone(),
            &CoordinationConfig::default(),
        ));
        let notifier = Arc::new(CrossInstanceNotifier::new(
            bus,
            cache.clone(),
            sessions.clone(),
            InstanceId::from("worker"),
            &cluster,
        ));
        let deps = PipelineDeps {
            store: cache,
            locks,
            notifier,
            wallet: Arc::new(MockWallet::new()),
            secondary: Arc::new(MockSecondary::new()),
            holder: Arc::new(MockHolder::new()),
            sessions,
            sink: Arc::new(MockSink::default()),
            events: EventBus::new(),
        };
        let pipeline = TransactionPipeline::new(
            deps,
            LedgerConfig::default(),
            TierTable::new(vec![tier(Some(dec!(10000)), dec!(1))]),
            Duration::from_secs(5),
        )
        .unwrap();
        let config = InterestConfig {
            enabled: true,
            interval_secs: 3_600,
            online_rate: dec!(0.01),
            offline_rate: dec!(0.005),
            min_balance: dec!(100),
            max_per_cycle: dec!(50),
            batch_size: 4,
        };
        InterestAccrualEngine::new(Arc::new(pipeline), &config).unwrap()
    }

    #[tokio::test]
    async fn test_cycle_credits_each_account_once() {
        let store = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
        let sessions = Arc::new(MockSessions::new());
        let rich = AccountId::new();
        let online = AccountId::new();
        let poor = AccountId::new();
        for (id, name, balance) in [
            (rich, "rich", 900_000),
            (online, "online", 100_000),
            (poor, "poor", 5_000),
        ] {
            store.get_or_create(&id, name).await.unwrap();
            store.update_balance_atomic(&id, balance).await.unwrap();
        }
        sessions.connect(&online);
        let engine = engine_with(store.clone(), sessions).await;

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.credited, 2);
        // rich: 9000 × 0.5% = 45.00; online: 1000 × 1% = 10.00
        assert_eq!(report.total_interest, 4_500 + 1_000);
        assert_eq!(store.get(&poor).await.unwrap().unwrap().balance, 5_000);

        // Back-to-back pass within the interval applies nothing
        let again = engine.run_cycle().await.unwrap();
        assert_eq!(again.credited, 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(store.get(&rich).await.unwrap().unwrap().balance, 904_500);
    }
}
