//! Data models for ledger accounts and the audit log

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::fmt;

use super::store::StoreError;
use crate::core_types::{AccountId, InstanceId, ScaledAmount, TimestampMs};
use crate::money;

/// Ledger account
///
/// All balance fields are minor units. Mutated only through the
/// store's atomic primitives.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    /// Last known display name
    pub display_name: String,
    pub balance: ScaledAmount,
    pub tier: i64,
    pub total_interest: ScaledAmount,
    pub last_interest_at: Option<TimestampMs>,
    pub last_active_at: TimestampMs,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl Account {
    pub fn balance_decimal(&self) -> Decimal {
        money::from_scaled(self.balance)
    }

    pub fn last_interest_time(&self) -> Option<DateTime<Utc>> {
        self.last_interest_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at).single()
    }
}

/// Raw `accounts` row, shared by both SQL backends
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AccountRow {
    pub id: String,
    pub display_name: String,
    pub balance: i64,
    pub tier: i64,
    pub total_interest: i64,
    pub last_interest_at: Option<i64>,
    pub last_active_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("account id '{}': {}", row.id, e)))?;
        Ok(Account {
            id,
            display_name: row.display_name,
            balance: row.balance,
            tier: row.tier,
            total_interest: row.total_interest,
            last_interest_at: row.last_interest_at,
            last_active_at: row.last_active_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Transaction type recorded in the audit log
///
/// IDs are persisted; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransactionType {
    Deposit = 1,
    Withdraw = 2,
    TransferOut = 3,
    TransferIn = 4,
    Interest = 5,
    TierUpgrade = 6,
    AdminGive = 7,
    AdminTake = 8,
    AdminSet = 9,
}

impl TransactionType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionType::Deposit),
            2 => Some(TransactionType::Withdraw),
            3 => Some(TransactionType::TransferOut),
            4 => Some(TransactionType::TransferIn),
            5 => Some(TransactionType::Interest),
            6 => Some(TransactionType::TierUpgrade),
            7 => Some(TransactionType::AdminGive),
            8 => Some(TransactionType::AdminTake),
            9 => Some(TransactionType::AdminSet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdraw => "WITHDRAW",
            TransactionType::TransferOut => "TRANSFER_OUT",
            TransactionType::TransferIn => "TRANSFER_IN",
            TransactionType::Interest => "INTEREST",
            TransactionType::TierUpgrade => "TIER_UPGRADE",
            TransactionType::AdminGive => "ADMIN_GIVE",
            TransactionType::AdminTake => "ADMIN_TAKE",
            TransactionType::AdminSet => "ADMIN_SET",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            TransactionType::AdminGive | TransactionType::AdminTake | TransactionType::AdminSet
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log row to insert; the store assigns `seq`
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub account_id: AccountId,
    pub display_name: String,
    pub tx_type: TransactionType,
    pub amount: ScaledAmount,
    pub balance_before: ScaledAmount,
    pub balance_after: ScaledAmount,
    pub counterparty: Option<(AccountId, String)>,
    pub origin: InstanceId,
    pub reason: String,
    /// Admin identity when this is an administrative action
    pub admin: Option<String>,
    pub created_at: TimestampMs,
}

/// Immutable audit record
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionLogEntry {
    pub seq: i64,
    pub account_id: AccountId,
    pub display_name: String,
    pub tx_type: TransactionType,
    pub amount: ScaledAmount,
    pub balance_before: ScaledAmount,
    pub balance_after: ScaledAmount,
    pub counterparty_id: Option<AccountId>,
    pub counterparty_name: Option<String>,
    pub origin: InstanceId,
    pub reason: String,
    pub is_admin: bool,
    pub admin_name: Option<String>,
    pub created_at: TimestampMs,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LogRow {
    pub seq: i64,
    pub account_id: String,
    pub display_name: String,
    pub tx_type: i64,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub counterparty_id: Option<String>,
    pub counterparty_name: Option<String>,
    pub origin_instance: String,
    pub reason: String,
    pub is_admin: bool,
    pub admin_name: Option<String>,
    pub created_at: i64,
}

impl TryFrom<LogRow> for TransactionLogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, e: &dyn fmt::Display| {
            StoreError::Corrupt(format!("log seq {} {}: {}", row.seq, what, e))
        };
        let account_id = row
            .account_id
            .parse()
            .map_err(|e| corrupt("account_id", &e))?;
        let counterparty_id = match &row.counterparty_id {
            Some(raw) => Some(raw.parse().map_err(|e| corrupt("counterparty_id", &e))?),
            None => None,
        };
        let tx_type = i16::try_from(row.tx_type)
            .ok()
            .and_then(TransactionType::from_id)
            .ok_or_else(|| corrupt("tx_type", &row.tx_type))?;
        Ok(TransactionLogEntry {
            seq: row.seq,
            account_id,
            display_name: row.display_name,
            tx_type,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            counterparty_id,
            counterparty_name: row.counterparty_name,
            origin: InstanceId::from(row.origin_instance),
            reason: row.reason,
            is_admin: row.is_admin,
            admin_name: row.admin_name,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_ids_roundtrip() {
        for id in 1..=9 {
            let t = TransactionType::from_id(id).unwrap();
            assert_eq!(t.id(), id);
        }
        assert!(TransactionType::from_id(0).is_none());
        assert!(TransactionType::AdminTake.is_admin());
        assert!(!TransactionType::TransferIn.is_admin());
    }

    #[test]
    fn test_corrupt_row_rejected() {
        let row = AccountRow {
            id: "garbage".into(),
            display_name: "x".into(),
            balance: 0,
            tier: 1,
            total_interest: 0,
            last_interest_at: None,
            last_active_at: 0,
            created_at: 0,
            updated_at: 0,
        };
        assert!(matches!(Account::try_from(row), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_log_row_conversion() {
        let other = AccountId::new();
        let row = LogRow {
            seq: 7,
            account_id: AccountId::new().to_string(),
            display_name: "alice".into(),
            tx_type: 3,
            amount: 500,
            balance_before: 1000,
            balance_after: 500,
            counterparty_id: Some(other.to_string()),
            counterparty_name: Some("bob".into()),
            origin_instance: "node-a".into(),
            reason: "rent".into(),
            is_admin: false,
            admin_name: None,
            created_at: 1,
        };
        let entry = TransactionLogEntry::try_from(row).unwrap();
        assert_eq!(entry.tx_type, TransactionType::TransferOut);
        assert_eq!(entry.counterparty_id, Some(other));
    }
}
