//! Core types used throughout the system
//!
//! Identity types shared by the store, the lock coordinator, the notifier
//! and the pipeline. Amount aliases live here so every layer agrees on the
//! persisted representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Amount in minor units (see [`crate::money::BALANCE_DECIMALS`]).
///
/// Signed so that deltas and balances share one type. Balances are
/// never negative at a commit point.
pub type ScaledAmount = i64;

/// Milliseconds since the Unix epoch, as persisted.
pub type TimestampMs = i64;

/// Account holder identity - stable opaque key.
///
/// # Constraints:
/// - **Immutable**: the display name may drift, the id never does
/// - **Lock key**: the string form scopes per-account mutual exclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(uuid::Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Key used for locks and store rows (hyphenated lowercase UUID)
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// Identifier of the process that produced a change.
///
/// Used to suppress self-notification loops on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Fresh ULID-based id - sortable, no coordination needed
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cluster scope for lock keys and broadcast topics.
///
/// Independent clusters sharing one coordination store must use distinct
/// ids or they will contend on each other's locks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespaced lock key for an account
    pub fn lock_key(&self, account: &AccountId) -> String {
        format!("{}:lock:{}", self.0, account)
    }

    /// Broadcast topic for balance changes
    pub fn balance_topic(&self) -> String {
        format!("{}.balance", self.0)
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}
