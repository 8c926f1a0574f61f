//! Pipeline outcome taxonomy
//!
//! Every failure a pipeline operation can end in. Codes are stable and
//! meant for the calling layer to pick a message.

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::account::StoreError;
use crate::coordination::LockError;
use crate::external::WalletError;
use crate::money::MoneyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    State,
    Coordination,
    Persistence,
    External,
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::State => "state",
            ErrorCategory::Coordination => "coordination",
            ErrorCategory::Persistence => "persistence",
            ErrorCategory::External => "external",
            ErrorCategory::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount is below the minimum of {min}")]
    BelowMinimum { min: Decimal },

    #[error("Amount exceeds the maximum of {max}")]
    AboveMaximum { max: Decimal },

    #[error("Cannot transfer to yourself")]
    SelfTransfer,

    #[error("Recipient is offline and offline transfers are disabled")]
    RecipientOffline,

    #[error("Cooldown active, retry in {remaining_ms} ms")]
    CooldownActive { remaining_ms: u64 },

    // === State Errors ===
    #[error("Account not found")]
    AccountNotFound,

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("Insufficient funds in external wallet")]
    InsufficientWalletFunds,

    #[error("Balance would exceed the tier maximum of {max}")]
    MaxBalanceReached { max: Decimal },

    #[error("Recipient balance would exceed their tier maximum of {max}")]
    RecipientMaxBalance { max: Decimal },

    #[error("Already at the highest tier")]
    MaxTierReached,

    #[error("{count} upgrade requirement(s) not met")]
    RequirementsNotMet { count: usize },

    #[error("Insufficient secondary currency: {required} required")]
    InsufficientSecondary { required: u64 },

    // === Cancellation ===
    #[error("Cancelled by listener: {0}")]
    Cancelled(String),

    // === Coordination Errors ===
    #[error("Account is locked by another operation ({key})")]
    Locked { key: String },

    #[error("Coordination failure: {0}")]
    CoordinationFailed(String),

    // === Persistence Errors ===
    #[error("Persistence failure: {0}")]
    Persistence(String),

    // === External Errors ===
    #[error("Wallet unavailable: {0}")]
    WalletUnavailable(String),

    #[error("Wallet operation failed: {0}")]
    WalletFailed(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::BelowMinimum { .. } => "BELOW_MINIMUM",
            LedgerError::AboveMaximum { .. } => "ABOVE_MAXIMUM",
            LedgerError::SelfTransfer => "SELF_TRANSFER",
            LedgerError::RecipientOffline => "RECIPIENT_OFFLINE",
            LedgerError::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            LedgerError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            LedgerError::RecipientNotFound(_) => "RECIPIENT_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::InsufficientWalletFunds => "INSUFFICIENT_WALLET_FUNDS",
            LedgerError::MaxBalanceReached { .. } => "MAX_BALANCE_REACHED",
            LedgerError::RecipientMaxBalance { .. } => "RECIPIENT_MAX_BALANCE",
            LedgerError::MaxTierReached => "MAX_TIER_REACHED",
            LedgerError::RequirementsNotMet { .. } => "REQUIREMENTS_NOT_MET",
            LedgerError::InsufficientSecondary { .. } => "INSUFFICIENT_SECONDARY",
            LedgerError::Cancelled(_) => "CANCELLED",
            LedgerError::Locked { .. } => "LOCKED",
            LedgerError::CoordinationFailed(_) => "COORDINATION_FAILED",
            LedgerError::Persistence(_) => "PERSISTENCE_FAILURE",
            LedgerError::WalletUnavailable(_) => "WALLET_UNAVAILABLE",
            LedgerError::WalletFailed(_) => "WALLET_FAILED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::BelowMinimum { .. }
            | LedgerError::AboveMaximum { .. }
            | LedgerError::SelfTransfer
            | LedgerError::RecipientOffline
            | LedgerError::CooldownActive { .. } => ErrorCategory::Validation,
            LedgerError::AccountNotFound
            | LedgerError::RecipientNotFound(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::InsufficientWalletFunds
            | LedgerError::MaxBalanceReached { .. }
            | LedgerError::RecipientMaxBalance { .. }
            | LedgerError::MaxTierReached
            | LedgerError::RequirementsNotMet { .. }
            | LedgerError::InsufficientSecondary { .. } => ErrorCategory::State,
            LedgerError::Cancelled(_) => ErrorCategory::Cancelled,
            LedgerError::Locked { .. } | LedgerError::CoordinationFailed(_) => {
                ErrorCategory::Coordination
            }
            LedgerError::Persistence(_) => ErrorCategory::Persistence,
            LedgerError::WalletUnavailable(_) | LedgerError::WalletFailed(_) => {
                ErrorCategory::External
            }
        }
    }

    /// Only a lock that could not be acquired is worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Locked { .. })
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::Persistence(e.to_string())
    }
}

impl From<LockError> for LedgerError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout { key, .. } => LedgerError::Locked { key },
            LockError::Backend(msg) => LedgerError::CoordinationFailed(msg),
        }
    }
}

impl From<WalletError> for LedgerError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Unavailable(msg) => LedgerError::WalletUnavailable(msg),
            WalletError::Rejected(msg) => LedgerError::WalletFailed(msg),
        }
    }
}

impl From<MoneyError> for LedgerError {
    fn from(e: MoneyError) -> Self {
        LedgerError::InvalidAmount(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_locked_is_retryable() {
        let locked = LedgerError::from(LockError::Timeout {
            key: "k".into(),
            waited_ms: 5000,
        });
        assert_eq!(locked.code(), "LOCKED");
        assert!(locked.is_retryable());
        assert_eq!(locked.category(), ErrorCategory::Coordination);

        let persistence = LedgerError::from(StoreError::NotInitialized);
        assert!(!persistence.is_retryable());
        assert_eq!(persistence.category(), ErrorCategory::Persistence);
    }

    #[test]
    fn test_wallet_mapping() {
        assert_eq!(
            LedgerError::from(WalletError::Unavailable("down".into())).code(),
            "WALLET_UNAVAILABLE"
        );
        assert_eq!(
            LedgerError::from(WalletError::Rejected("no".into())).category(),
            ErrorCategory::External
        );
    }

    #[test]
    fn test_money_errors_are_validation() {
        let e = LedgerError::from(MoneyError::PrecisionOverflow {
            provided: 3,
            max: 2,
        });
        assert_eq!(e.code(), "INVALID_AMOUNT");
        assert_eq!(e.category(), ErrorCategory::Validation);
    }
}
