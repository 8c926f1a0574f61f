//! Compensation saga
//!
//! Each mutating step of a pipeline operation records its inverse. When a
//! later step fails the recorded inverses run newest-first; once the
//! operation is through, [`Saga::commit`] forgets them.
//!
//! ```text
//! Deposit:  wallet.withdraw ─▶ credit ─▶ log ─▶ commit
//!              │                 │        ✗
//!              ▼                 ▼
//!       RefundWallet  ◀──  ReverseCredit      (applied in reverse)
//! ```
//!
//! A failed inverse leaves money in a partial state. It is logged at
//! `error` with a `CRITICAL` prefix and the remaining inverses still run.

use std::fmt;
use tracing::{error, info};

use crate::account::AccountStore;
use crate::core_types::{AccountId, ScaledAmount, TimestampMs};
use crate::external::{ExternalWallet, SecondaryCurrency};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Give back what was taken from the external wallet
    RefundWallet {
        account: AccountId,
        amount: ScaledAmount,
    },
    /// Take back what was paid into the external wallet
    ReclaimWallet {
        account: AccountId,
        amount: ScaledAmount,
    },
    /// Undo a ledger credit
    ReverseCredit {
        account: AccountId,
        amount: ScaledAmount,
    },
    /// Undo a ledger debit
    ReverseDebit {
        account: AccountId,
        amount: ScaledAmount,
    },
    /// Move a transferred principal back
    ReverseTransfer {
        from: AccountId,
        to: AccountId,
        amount: ScaledAmount,
    },
    /// Overwrite with a known-good balance
    RestoreBalance {
        account: AccountId,
        balance: ScaledAmount,
    },
    RefundSecondary {
        account: AccountId,
        amount: u64,
    },
    /// Put the account back on its previous tier
    RestoreTier { account: AccountId, tier: i64 },
    /// Undo an interest credit including its total and cycle stamp
    ReverseInterest {
        account: AccountId,
        amount: ScaledAmount,
        applied_at: TimestampMs,
        previous_at: Option<TimestampMs>,
    },
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::RefundWallet { account, amount } => {
                write!(f, "refund wallet {} of {}", account, amount)
            }
            Compensation::ReclaimWallet { account, amount } => {
                write!(f, "reclaim {} from wallet {}", amount, account)
            }
            Compensation::ReverseCredit { account, amount } => {
                write!(f, "reverse credit of {} on {}", amount, account)
            }
            Compensation::ReverseDebit { account, amount } => {
                write!(f, "reverse debit of {} on {}", amount, account)
            }
            Compensation::ReverseTransfer { from, to, amount } => {
                write!(f, "return {} from {} to {}", amount, to, from)
            }
            Compensation::RestoreBalance { account, balance } => {
                write!(f, "restore {} to balance {}", account, balance)
            }
            Compensation::RefundSecondary { account, amount } => {
                write!(f, "refund {} secondary units to {}", amount, account)
            }
            Compensation::RestoreTier { account, tier } => {
                write!(f, "restore {} to tier {}", account, tier)
            }
            Compensation::ReverseInterest {
                account,
                amount,
                applied_at,
                ..
            } => write!(
                f,
                "reverse interest of {} stamped {} on {}",
                amount, applied_at, account
            ),
        }
    }
}

/// What inverses are applied against
pub struct CompensationTargets<'a> {
    pub store: &'a dyn AccountStore,
    pub wallet: &'a dyn ExternalWallet,
    pub secondary: &'a dyn SecondaryCurrency,
}

impl CompensationTargets<'_> {
    async fn apply(&self, step: &Compensation) -> Result<(), String> {
        match step {
            Compensation::RefundWallet { account, amount } => self
                .wallet
                .deposit(account, *amount)
                .await
                .map_err(|e| e.to_string()),
            Compensation::ReclaimWallet { account, amount } => self
                .wallet
                .withdraw(account, *amount)
                .await
                .map_err(|e| e.to_string()),
            Compensation::ReverseCredit { account, amount } => {
                self.delta(account, -*amount).await
            }
            Compensation::ReverseDebit { account, amount } => self.delta(account, *amount).await,
            Compensation::ReverseTransfer { from, to, amount } => {
                match self.store.transfer_atomic(to, from, *amount).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err("reverse transfer refused".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
            Compensation::RestoreBalance { account, balance } => {
                match self.store.set_balance(account, *balance).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err("account missing".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
            Compensation::RefundSecondary { account, amount } => {
                if self.secondary.give(account, *amount).await {
                    Ok(())
                } else {
                    Err("secondary currency refused refund".to_string())
                }
            }
            Compensation::RestoreTier { account, tier } => {
                match self.store.update_tier(account, *tier).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err("account missing".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
            Compensation::ReverseInterest {
                account,
                amount,
                applied_at,
                previous_at,
            } => match self
                .store
                .revert_interest(account, *amount, *applied_at, *previous_at)
                .await
            {
                Ok(true) => Ok(()),
                Ok(false) => Err("interest stamp moved or account missing".to_string()),
                Err(e) => Err(e.to_string()),
            },
        }
    }

    async fn delta(&self, account: &AccountId, delta: ScaledAmount) -> Result<(), String> {
        match self.store.update_balance_atomic(account, delta).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err("account missing".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

pub struct Saga {
    operation: &'static str,
    account: AccountId,
    steps: Vec<Compensation>,
}

impl Saga {
    pub fn new(operation: &'static str, account: AccountId) -> Self {
        Self {
            operation,
            account,
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    pub fn pending(&self) -> &[Compensation] {
        &self.steps
    }

    /// Forward path finished; nothing left to undo
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Apply recorded inverses newest-first. Returns `true` if every one
    /// succeeded.
    pub async fn compensate(&mut self, targets: &CompensationTargets<'_>) -> bool {
        let mut clean = true;
        while let Some(step) = self.steps.pop() {
            match targets.apply(&step).await {
                Ok(()) => info!(
                    operation = self.operation,
                    account_id = %self.account,
                    step = %step,
                    "Compensation applied"
                ),
                Err(e) => {
                    clean = false;
                    error!(
                        operation = self.operation,
                        account_id = %self.account,
                        step = %step,
                        error = %e,
                        "CRITICAL: compensation failed, ledger left in partial state"
                    );
                }
            }
        }
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::SqliteAccountStore;
    use crate::external::mock::{MockSecondary, MockWallet};

    #[tokio::test]
    async fn test_inverses_run_newest_first() {
        let store = SqliteAccountStore::in_memory().await.unwrap();
        let wallet = MockWallet::new();
        let secondary = MockSecondary::new();
        let id = AccountId::new();
        store.get_or_create(&id, "alice").await.unwrap();

        // Forward: wallet pays 500 into the ledger
        wallet.fund(&id, 500);
        wallet.withdraw(&id, 500).await.unwrap();
        store.update_balance_atomic(&id, 500).await.unwrap();

        let mut saga = Saga::new("deposit", id);
        saga.record(Compensation::RefundWallet {
            account: id,
            amount: 500,
        });
        saga.record(Compensation::ReverseCredit {
            account: id,
            amount: 500,
        });

        let targets = CompensationTargets {
            store: &store,
            wallet: &wallet,
            secondary: &secondary,
        };
        assert!(saga.compensate(&targets).await);
        assert!(saga.pending().is_empty());
        assert_eq!(store.get(&id).await.unwrap().unwrap().balance, 0);
        assert_eq!(wallet.balance(&id), 500);
    }

    #[tokio::test]
    async fn test_failed_inverse_does_not_stop_the_rest() {
        let store = SqliteAccountStore::in_memory().await.unwrap();
        let wallet = MockWallet::new();
        let secondary = MockSecondary::new();
        let id = AccountId::new();
        store.get_or_create(&id, "alice").await.unwrap();
        store.update_balance_atomic(&id, 300).await.unwrap();
        wallet.set_unavailable(true);

        let mut saga = Saga::new("deposit", id);
        saga.record(Compensation::RefundWallet {
            account: id,
            amount: 300,
        });
        saga.record(Compensation::ReverseCredit {
            account: id,
            amount: 300,
        });

        let targets = CompensationTargets {
            store: &store,
            wallet: &wallet,
            secondary: &secondary,
        };
        assert!(!saga.compensate(&targets).await);
        assert_eq!(store.get(&id).await.unwrap().unwrap().balance, 0);
    }
}
