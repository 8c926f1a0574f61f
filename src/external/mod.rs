//! External collaborator boundaries
//!
//! The ledger core talks to the host through these traits only:
//!
//! - [`ExternalWallet`]: the off-ledger purse Deposit draws from and
//!   Withdraw pays into
//! - [`SecondaryCurrency`]: second cost paid on tier upgrades
//! - [`HolderContext`]: placeholder substitution and capability checks
//! - [`SessionGateway`]: reachability of an account holder and message delivery
//! - [`NotificationSink`]: fire-and-forget admin audit notifications
//!
//! Wallet and secondary-currency calls are suspension points; the pipeline
//! never calls them while holding anything but the account lock.

pub mod detached;

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{AccountId, ScaledAmount};

pub use detached::{DetachedWallet, LogNotificationSink, NoSecondaryCurrency, NoSessions, StaticHolderContext};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Wallet unavailable: {0}")]
    Unavailable(String),

    #[error("Wallet rejected the operation: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ExternalWallet: Send + Sync {
    /// Name for logging
    fn name(&self) -> &'static str;

    async fn has(&self, account: &AccountId, amount: ScaledAmount) -> Result<bool, WalletError>;

    async fn withdraw(&self, account: &AccountId, amount: ScaledAmount) -> Result<(), WalletError>;

    async fn deposit(&self, account: &AccountId, amount: ScaledAmount) -> Result<(), WalletError>;
}

/// Non-ledger currency charged on tier upgrades (integral units)
#[async_trait]
pub trait SecondaryCurrency: Send + Sync {
    async fn has(&self, account: &AccountId, amount: u64) -> bool;

    async fn take(&self, account: &AccountId, amount: u64) -> bool;

    async fn give(&self, account: &AccountId, amount: u64) -> bool;
}

#[async_trait]
pub trait HolderContext: Send + Sync {
    /// Substitute placeholder tokens in `template` for this holder
    async fn resolve(&self, account: &AccountId, template: &str) -> String;

    async fn has_capability(&self, account: &AccountId, capability: &str) -> bool;
}

pub trait SessionGateway: Send + Sync {
    fn is_online(&self, account: &AccountId) -> bool;

    /// Best-effort message to a connected session; dropped if offline
    fn deliver(&self, account: &AccountId, message: &str);
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, admin: &str, action: &str, target: &str, amount: ScaledAmount);
}

/// Mock collaborators for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Purse balances per account, with failure switches
    #[derive(Default)]
    pub struct MockWallet {
        funds: Mutex<HashMap<AccountId, ScaledAmount>>,
        unavailable: AtomicBool,
        fail_withdraw: AtomicBool,
        fail_deposit: AtomicBool,
        withdraw_count: AtomicUsize,
        deposit_count: AtomicUsize,
    }

    impl MockWallet {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fund(&self, account: &AccountId, amount: ScaledAmount) {
            *self.funds.lock().unwrap().entry(*account).or_default() += amount;
        }

        pub fn balance(&self, account: &AccountId) -> ScaledAmount {
            self.funds
                .lock()
                .unwrap()
                .get(account)
                .copied()
                .unwrap_or(0)
        }

        pub fn set_unavailable(&self, v: bool) {
            self.unavailable.store(v, Ordering::SeqCst);
        }

        pub fn set_fail_withdraw(&self, v: bool) {
            self.fail_withdraw.store(v, Ordering::SeqCst);
        }

        pub fn set_fail_deposit(&self, v: bool) {
            self.fail_deposit.store(v, Ordering::SeqCst);
        }

        pub fn withdraw_count(&self) -> usize {
            self.withdraw_count.load(Ordering::SeqCst)
        }

        pub fn deposit_count(&self) -> usize {
            self.deposit_count.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), WalletError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(WalletError::Unavailable("mock offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ExternalWallet for MockWallet {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn has(&self, account: &AccountId, amount: ScaledAmount) -> Result<bool, WalletError> {
            self.check()?;
            Ok(self.balance(account) >= amount)
        }

        async fn withdraw(&self, account: &AccountId, amount: ScaledAmount) -> Result<(), WalletError> {
            self.check()?;
            self.withdraw_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_withdraw.load(Ordering::SeqCst) {
                return Err(WalletError::Rejected("mock withdraw failure".into()));
            }
            let mut funds = self.funds.lock().unwrap();
            let purse = funds.entry(*account).or_default();
            if *purse < amount {
                return Err(WalletError::Rejected("insufficient wallet funds".into()));
            }
            *purse -= amount;
            Ok(())
        }

        async fn deposit(&self, account: &AccountId, amount: ScaledAmount) -> Result<(), WalletError> {
            self.check()?;
            self.deposit_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_deposit.load(Ordering::SeqCst) {
                return Err(WalletError::Rejected("mock deposit failure".into()));
            }
            *self.funds.lock().unwrap().entry(*account).or_default() += amount;
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MockSecondary {
        units: Mutex<HashMap<AccountId, u64>>,
    }

    impl MockSecondary {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn grant(&self, account: &AccountId, amount: u64) {
            *self.units.lock().unwrap().entry(*account).or_default() += amount;
        }

        pub fn balance(&self, account: &AccountId) -> u64 {
            self.units.lock().unwrap().get(account).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl SecondaryCurrency for MockSecondary {
        async fn has(&self, account: &AccountId, amount: u64) -> bool {
            self.balance(account) >= amount
        }

        async fn take(&self, account: &AccountId, amount: u64) -> bool {
            let mut units = self.units.lock().unwrap();
            let held = units.entry(*account).or_default();
            if *held < amount {
                return false;
            }
            *held -= amount;
            true
        }

        async fn give(&self, account: &AccountId, amount: u64) -> bool {
            self.grant(account, amount);
            true
        }
    }

    /// Same placeholders and capabilities for every holder
    #[derive(Default)]
    pub struct MockHolder {
        placeholders: Mutex<HashMap<String, String>>,
        capabilities: Mutex<HashSet<String>>,
    }

    impl MockHolder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_placeholder(&self, token: &str, value: &str) {
            self.placeholders
                .lock()
                .unwrap()
                .insert(token.to_string(), value.to_string());
        }

        pub fn grant(&self, capability: &str) {
            self.capabilities
                .lock()
                .unwrap()
                .insert(capability.to_string());
        }
    }

    #[async_trait]
    impl HolderContext for MockHolder {
        async fn resolve(&self, _account: &AccountId, template: &str) -> String {
            let placeholders = self.placeholders.lock().unwrap();
            placeholders
                .iter()
                .fold(template.to_string(), |acc, (k, v)| acc.replace(k.as_str(), v))
        }

        async fn has_capability(&self, _account: &AccountId, capability: &str) -> bool {
            self.capabilities.lock().unwrap().contains(capability)
        }
    }

    #[derive(Default)]
    pub struct MockSessions {
        online: Mutex<HashSet<AccountId>>,
        delivered: Mutex<Vec<(AccountId, String)>>,
    }

    impl MockSessions {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn connect(&self, account: &AccountId) {
            self.online.lock().unwrap().insert(*account);
        }

        pub fn delivered(&self) -> Vec<(AccountId, String)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl SessionGateway for MockSessions {
        fn is_online(&self, account: &AccountId) -> bool {
            self.online.lock().unwrap().contains(account)
        }

        fn deliver(&self, account: &AccountId, message: &str) {
            if self.is_online(account) {
                self.delivered
                    .lock()
                    .unwrap()
                    .push((*account, message.to_string()));
            }
        }
    }

    #[derive(Default)]
    pub struct MockSink {
        pub calls: Mutex<Vec<(String, String, String, ScaledAmount)>>,
    }

    impl NotificationSink for MockSink {
        fn notify(&self, admin: &str, action: &str, target: &str, amount: ScaledAmount) {
            self.calls.lock().unwrap().push((
                admin.to_string(),
                action.to_string(),
                target.to_string(),
                amount,
            ));
        }
    }

    #[tokio::test]
    async fn test_mock_wallet_tracks_funds() {
        let wallet = MockWallet::new();
        let id = AccountId::new();
        wallet.fund(&id, 500);

        assert!(wallet.has(&id, 500).await.unwrap());
        wallet.withdraw(&id, 200).await.unwrap();
        assert_eq!(wallet.balance(&id), 300);
        assert!(wallet.withdraw(&id, 1_000).await.is_err());

        wallet.set_unavailable(true);
        assert!(matches!(
            wallet.has(&id, 1).await,
            Err(WalletError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_holder_substitutes_placeholders() {
        let holder = MockHolder::new();
        holder.set_placeholder("%level%", "12");
        let id = AccountId::new();
        assert_eq!(holder.resolve(&id, "%level% >= 10").await, "12 >= 10");
        assert!(!holder.has_capability(&id, "vip").await);
        holder.grant("vip");
        assert!(holder.has_capability(&id, "vip").await);
    }
}
