use anyhow::{Context, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::core_types::{ClusterId, InstanceId};
use crate::tier::TierDefinition;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Defaults to a fresh ULID per process
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub cluster_id: ClusterId,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub interest: InterestConfig,
    #[serde(default)]
    pub tiers: Vec<TierDefinition>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Per-statement budget; exceeding it is a persistence failure
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

impl DatabaseConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationBackend {
    /// Process-local; correct only for a single instance
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoordinationConfig {
    pub backend: CoordinationBackend,
    #[serde(default)]
    pub url: Option<String>,
    pub lock_ttl_ms: u64,
    pub lock_timeout_ms: u64,
    pub lock_retry_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: CoordinationBackend::Memory,
            url: None,
            lock_ttl_ms: 30_000,
            lock_timeout_ms: 5_000,
            lock_retry_ms: 50,
        }
    }
}

impl CoordinationConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }
}

/// What a deposit does when it would push the balance past the tier max
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Credit only what fits; fail if nothing fits
    #[default]
    Clamp,
    /// Refuse the whole deposit
    Reject,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub min_transaction: Decimal,
    /// Upper bound for a single transfer
    pub max_transaction: Decimal,
    pub cooldown_ms: u64,
    pub transfer_fee_rate: Decimal,
    pub allow_offline_transfers: bool,
    #[serde(default)]
    pub deposit_overflow_policy: OverflowPolicy,
    /// Capability that lifts the tier max on deposits
    pub unlimited_capability: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_transaction: Decimal::new(1, 2),
            max_transaction: Decimal::new(1_000_000, 0),
            cooldown_ms: 1_000,
            transfer_fee_rate: Decimal::ZERO,
            allow_offline_transfers: true,
            deposit_overflow_policy: OverflowPolicy::Clamp,
            unlimited_capability: "ledger.unlimited".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InterestConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub online_rate: Decimal,
    pub offline_rate: Decimal,
    pub min_balance: Decimal,
    pub max_per_cycle: Decimal,
    pub batch_size: usize,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3_600,
            online_rate: Decimal::new(1, 3),
            offline_rate: Decimal::new(5, 4),
            min_balance: Decimal::new(100, 0),
            max_per_cycle: Decimal::new(1_000, 0),
            batch_size: 500,
        }
    }
}

impl InterestConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tiers.is_empty() {
            bail!("At least one tier must be configured");
        }
        let ledger = &self.ledger;
        if ledger.min_transaction.is_sign_negative() {
            bail!("ledger.min_transaction must not be negative");
        }
        if ledger.min_transaction > ledger.max_transaction {
            bail!(
                "ledger.min_transaction ({}) exceeds max_transaction ({})",
                ledger.min_transaction,
                ledger.max_transaction
            );
        }
        if ledger.transfer_fee_rate.is_sign_negative() {
            bail!("ledger.transfer_fee_rate must not be negative");
        }
        let interest = &self.interest;
        if interest.online_rate.is_sign_negative() || interest.offline_rate.is_sign_negative() {
            bail!("interest rates must not be negative");
        }
        if interest.enabled && interest.interval_secs == 0 {
            bail!("interest.interval_secs must be positive");
        }
        if self.coordination.backend == CoordinationBackend::Postgres
            && self.coordination.url.is_none()
        {
            bail!("coordination.url is required for the postgres backend");
        }
        if self.coordination.lock_ttl_ms <= self.coordination.lock_timeout_ms {
            tracing::warn!(
                ttl_ms = self.coordination.lock_ttl_ms,
                timeout_ms = self.coordination.lock_timeout_ms,
                "Lock TTL does not exceed the acquire timeout; long operations may lose their lock"
            );
        }
        Ok(())
    }

    pub fn instance_id(&self) -> InstanceId {
        match &self.instance_id {
            Some(id) => InstanceId::from(id.as_str()),
            None => InstanceId::generate(),
        }
    }
}
