//! Fee calculation utilities
//!
//! Transfer fees are a fraction of the principal: rate 0.02 = 2%.

use rust_decimal::Decimal;

use crate::core_types::ScaledAmount;
use crate::money::{self, MoneyError};

/// Calculate the fee for a principal amount.
///
/// # Arguments
/// * `amount` - Principal in minor units
/// * `rate` - Fraction of the principal (0.02 = 2%)
///
/// # Returns
/// Fee in minor units, rounded half-up. Zero rate or zero amount is zero fee.
///
/// # Example
/// ```
/// use ledger_cluster::fee::calculate_fee;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
/// // 500.00 * 2% = 10.00
/// let fee = calculate_fee(50_000, Decimal::from_str("0.02").unwrap()).unwrap();
/// assert_eq!(fee, 1_000);
/// ```
pub fn calculate_fee(amount: ScaledAmount, rate: Decimal) -> Result<ScaledAmount, MoneyError> {
    if amount <= 0 || rate <= Decimal::ZERO {
        return Ok(0);
    }
    let principal = money::from_scaled(amount);
    let fee = principal.checked_mul(rate).ok_or(MoneyError::Overflow)?;
    money::round_to_scaled(fee)
}

/// Total the sender must hold for a transfer: principal + fee
#[inline]
pub fn required_total(amount: ScaledAmount, fee: ScaledAmount) -> Option<ScaledAmount> {
    amount.checked_add(fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_calculate_fee_basic() {
        // 500.00 at 2% = 10.00
        assert_eq!(calculate_fee(50_000, dec!(0.02)).unwrap(), 1_000);
        // 1.00 at 0.5% = 0.005 -> 0.01
        assert_eq!(calculate_fee(100, dec!(0.005)).unwrap(), 1);
    }

    #[test]
    fn test_calculate_fee_zero() {
        assert_eq!(calculate_fee(0, dec!(0.02)).unwrap(), 0);
        assert_eq!(calculate_fee(100_000, dec!(0)).unwrap(), 0);
    }

    #[test]
    fn test_required_total() {
        assert_eq!(required_total(50_000, 1_000), Some(51_000));
        assert_eq!(required_total(i64::MAX, 1), None);
    }
}
