//! Tier definitions
//!
//! Tiers are read-only configuration. Level N is the N-th entry of the
//! configured list; unknown levels fall back to tier 1.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::ScaledAmount;
use crate::money::{self, MoneyError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierDefinition {
    pub name: String,
    /// `None` = unlimited
    #[serde(default)]
    pub max_balance: Option<Decimal>,
    #[serde(default = "default_multiplier")]
    pub interest_multiplier: Decimal,
    #[serde(default)]
    pub upgrade_cost: Decimal,
    #[serde(default)]
    pub upgrade_secondary_cost: u64,
    /// Raw requirement strings, parsed by `requirements::Requirement::parse`
    #[serde(default)]
    pub requirements: Vec<String>,
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

impl TierDefinition {
    /// Max balance in minor units (`i64::MAX` when unlimited)
    pub fn max_balance_scaled(&self) -> Result<ScaledAmount, MoneyError> {
        match self.max_balance {
            Some(max) => money::to_scaled(max),
            None => Ok(ScaledAmount::MAX),
        }
    }

    pub fn upgrade_cost_scaled(&self) -> Result<ScaledAmount, MoneyError> {
        money::to_scaled(self.upgrade_cost)
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_balance.is_none()
    }
}

impl Default for TierDefinition {
    fn default() -> Self {
        Self {
            name: "Basic".to_string(),
            max_balance: None,
            interest_multiplier: Decimal::ONE,
            upgrade_cost: Decimal::ZERO,
            upgrade_secondary_cost: 0,
            requirements: Vec::new(),
        }
    }
}

/// Ordered tier list, 1-based
#[derive(Debug, Clone)]
pub struct TierTable {
    tiers: Vec<TierDefinition>,
}

impl TierTable {
    /// An empty list still yields one unlimited default tier
    pub fn new(tiers: Vec<TierDefinition>) -> Self {
        if tiers.is_empty() {
            return Self {
                tiers: vec![TierDefinition::default()],
            };
        }
        Self { tiers }
    }

    /// Tier for a level, falling back to tier 1 for unknown levels
    pub fn get(&self, level: i64) -> &TierDefinition {
        self.lookup(level).unwrap_or(&self.tiers[0])
    }

    /// Exact lookup, `None` past the top tier
    pub fn lookup(&self, level: i64) -> Option<&TierDefinition> {
        if level < 1 {
            return None;
        }
        self.tiers.get((level - 1) as usize)
    }

    pub fn max_level(&self) -> i64 {
        self.tiers.len() as i64
    }
}
