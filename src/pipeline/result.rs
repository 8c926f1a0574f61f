use rust_decimal::Decimal;

use super::error::LedgerError;
use crate::account::TransactionType;
use crate::core_types::{AccountId, ScaledAmount};
use crate::money;

/// Outcome of one pipeline operation.
///
/// Carries enough context for the caller to render a message without
/// querying again. Amounts are minor units; the `*_decimal` accessors
/// convert for display.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub tx_type: TransactionType,
    pub account_id: AccountId,
    pub outcome: Result<(), LedgerError>,
    pub previous_balance: ScaledAmount,
    pub new_balance: ScaledAmount,
    /// Amount actually moved; a clamped deposit reports the clamped value
    pub processed: ScaledAmount,
    pub fee: ScaledAmount,
    /// Filled only for `REQUIREMENTS_NOT_MET`
    pub unmet_requirements: Vec<String>,
}

impl TransactionResult {
    pub(crate) fn new(tx_type: TransactionType, account_id: AccountId) -> Self {
        Self {
            tx_type,
            account_id,
            outcome: Ok(()),
            previous_balance: 0,
            new_balance: 0,
            processed: 0,
            fee: 0,
            unmet_requirements: Vec::new(),
        }
    }

    /// Seen balance before and after are the same until a mutation lands
    pub(crate) fn observe(&mut self, balance: ScaledAmount) {
        self.previous_balance = balance;
        self.new_balance = balance;
    }

    pub(crate) fn finish(mut self, outcome: Result<(), LedgerError>) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&LedgerError> {
        self.outcome.as_ref().err()
    }

    /// `"SUCCESS"` or the error code
    pub fn code(&self) -> &'static str {
        match &self.outcome {
            Ok(()) => "SUCCESS",
            Err(e) => e.code(),
        }
    }

    pub fn previous_balance_decimal(&self) -> Decimal {
        money::from_scaled(self.previous_balance)
    }

    pub fn new_balance_decimal(&self) -> Decimal {
        money::from_scaled(self.new_balance)
    }

    pub fn processed_decimal(&self) -> Decimal {
        money::from_scaled(self.processed)
    }

    pub fn fee_decimal(&self) -> Decimal {
        money::from_scaled(self.fee)
    }
}
