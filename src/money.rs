//! Money Conversion Module
//!
//! Unified conversion between the persisted i64 minor-unit representation
//! and the client-facing `Decimal`. All conversions MUST go through this module.
//!
//! ## Design Principles
//! 1. Single scale: every balance uses [`BALANCE_DECIMALS`]
//! 2. Explicit Error Handling: No silent truncation of client input
//! 3. Computed amounts (fees, interest) round half-up to the scale
//!
//! ## Usage
//! ```rust
//! use ledger_cluster::money::{to_scaled, from_scaled};
//! use rust_decimal::Decimal;
//! use std::str::FromStr;
//!
//! let internal = to_scaled(Decimal::from_str("12.5").unwrap()).unwrap();
//! assert_eq!(internal, 1250);
//! assert_eq!(from_scaled(internal).to_string(), "12.50");
//! ```

use crate::core_types::ScaledAmount;
use rust_decimal::prelude::*;
use thiserror::Error;

/// Fractional digits kept for every balance (cents)
pub const BALANCE_DECIMALS: u32 = 2;

const SCALE_FACTOR: i64 = 10i64.pow(BALANCE_DECIMALS);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must not be negative")]
    Negative,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Parse: Client → Internal (Decimal/String → i64)
// ============================================================================

/// Convert a client Decimal to minor units.
///
/// Zero is accepted here; callers decide whether zero is meaningful
/// (`set` accepts it, deposits do not).
pub fn to_scaled(amount: Decimal) -> Result<ScaledAmount, MoneyError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(MoneyError::Negative);
    }

    // 15000.000 is fine; 1.234 is not
    let normalized = amount.normalize();
    if normalized.scale() > BALANCE_DECIMALS {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: BALANCE_DECIMALS,
        });
    }

    let scaled = normalized
        .checked_mul(Decimal::from(SCALE_FACTOR))
        .ok_or(MoneyError::Overflow)?;
    scaled.to_i64().ok_or(MoneyError::Overflow)
}

/// Parse a client amount string ("12.50") into minor units
pub fn parse_amount(amount_str: &str) -> Result<ScaledAmount, MoneyError> {
    let trimmed = amount_str.trim();
    if trimmed.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if trimmed.starts_with('+') || trimmed.contains(['e', 'E']) {
        return Err(MoneyError::InvalidFormat(trimmed.to_string()));
    }
    let decimal =
        Decimal::from_str(trimmed).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
    to_scaled(decimal)
}

/// Round a computed Decimal (interest, fee) half-up into minor units
pub fn round_to_scaled(amount: Decimal) -> Result<ScaledAmount, MoneyError> {
    let rounded =
        amount.round_dp_with_strategy(BALANCE_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    let scaled = rounded
        .checked_mul(Decimal::from(SCALE_FACTOR))
        .ok_or(MoneyError::Overflow)?;
    scaled.to_i64().ok_or(MoneyError::Overflow)
}

// ============================================================================
// Format: Internal → Client
// ============================================================================

/// Convert minor units back to a Decimal with the balance scale
pub fn from_scaled(value: ScaledAmount) -> Decimal {
    Decimal::new(value, BALANCE_DECIMALS)
}

/// Display string with the full balance scale ("-3.05")
pub fn format_amount(value: ScaledAmount) -> String {
    from_scaled(value).to_string()
}
