//! Stand-ins used when the node runs without a host attached.
//!
//! Wallet-backed operations fail cleanly with `WALLET_UNAVAILABLE`; nobody
//! is ever online; admin notifications go to the log.

use async_trait::async_trait;
use tracing::info;

use super::{
    ExternalWallet, HolderContext, NotificationSink, SecondaryCurrency, SessionGateway,
    WalletError,
};
use crate::core_types::{AccountId, ScaledAmount};
use crate::money;

pub struct DetachedWallet;

#[async_trait]
impl ExternalWallet for DetachedWallet {
    fn name(&self) -> &'static str {
        "detached"
    }

    async fn has(&self, _account: &AccountId, _amount: ScaledAmount) -> Result<bool, WalletError> {
        Err(WalletError::Unavailable("no wallet attached".into()))
    }

    async fn withdraw(&self, _account: &AccountId, _amount: ScaledAmount) -> Result<(), WalletError> {
        Err(WalletError::Unavailable("no wallet attached".into()))
    }

    async fn deposit(&self, _account: &AccountId, _amount: ScaledAmount) -> Result<(), WalletError> {
        Err(WalletError::Unavailable("no wallet attached".into()))
    }
}

/// Holds nothing; only zero-cost upgrades pass
pub struct NoSecondaryCurrency;

#[async_trait]
impl SecondaryCurrency for NoSecondaryCurrency {
    async fn has(&self, _account: &AccountId, amount: u64) -> bool {
        amount == 0
    }

    async fn take(&self, _account: &AccountId, amount: u64) -> bool {
        amount == 0
    }

    async fn give(&self, _account: &AccountId, _amount: u64) -> bool {
        false
    }
}

/// Leaves templates untouched and grants no capabilities
pub struct StaticHolderContext;

#[async_trait]
impl HolderContext for StaticHolderContext {
    async fn resolve(&self, _account: &AccountId, template: &str) -> String {
        template.to_string()
    }

    async fn has_capability(&self, _account: &AccountId, _capability: &str) -> bool {
        false
    }
}

pub struct NoSessions;

impl SessionGateway for NoSessions {
    fn is_online(&self, _account: &AccountId) -> bool {
        false
    }

    fn deliver(&self, _account: &AccountId, _message: &str) {}
}

pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, admin: &str, action: &str, target: &str, amount: ScaledAmount) {
        info!(
            admin = %admin,
            action = %action,
            target = %target,
            amount = %money::format_amount(amount),
            "[ADMIN] Balance adjusted"
        );
    }
}
