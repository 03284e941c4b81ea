//! Fluent transaction builder
//!
//! The only way to construct a [`Transaction`]: `build()` runs full
//! structural validation, so no unvalidated transaction can reach the
//! store. Sign conventions are normalized here — From entries are forced
//! negative, To and Fee entries positive — so callers pass magnitudes.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{
    BalanceType, Ticker, Transaction, TransactionAction, TransactionEntry, TransactionSource,
};

/// Builder for [`Transaction`]
#[derive(Debug)]
pub struct TransactionBuilder {
    transaction: Transaction,
}

impl TransactionBuilder {
    /// Start a transaction for a user and action
    pub fn new(user_id: Uuid, action: TransactionAction, source: TransactionSource) -> Self {
        Self {
            transaction: Transaction {
                id: Uuid::now_v7(),
                user_id,
                action,
                source,
                from_balance: None,
                to_balance: None,
                fee: None,
                rounding: None,
                is_confirmed: false,
                confirmed_at: None,
                reversal_of_transaction_id: None,
                created_at: chrono::Utc::now(),
            },
        }
    }

    /// Debit leg; quantity is stored negative regardless of input sign
    pub fn from_balance(
        mut self,
        user_id: Uuid,
        asset_id: Uuid,
        ticker: Ticker,
        quantity: Decimal,
    ) -> Self {
        self.transaction.from_balance = Some(TransactionEntry::new(
            user_id,
            asset_id,
            ticker,
            -quantity.abs(),
            BalanceType::Available,
        ));
        self
    }

    /// Credit leg; quantity is stored positive regardless of input sign
    pub fn to_balance(
        mut self,
        user_id: Uuid,
        asset_id: Uuid,
        ticker: Ticker,
        quantity: Decimal,
    ) -> Self {
        self.transaction.to_balance = Some(TransactionEntry::new(
            user_id,
            asset_id,
            ticker,
            quantity.abs(),
            BalanceType::Available,
        ));
        self
    }

    /// Fee leg; quantity is stored positive regardless of input sign
    pub fn fee(
        mut self,
        user_id: Uuid,
        asset_id: Uuid,
        ticker: Ticker,
        quantity: Decimal,
    ) -> Self {
        self.transaction.fee = Some(TransactionEntry::new(
            user_id,
            asset_id,
            ticker,
            quantity.abs(),
            BalanceType::Available,
        ));
        self
    }

    /// Rounding leg; signed as given, may be zero
    pub fn rounding(
        mut self,
        user_id: Uuid,
        asset_id: Uuid,
        ticker: Ticker,
        quantity: Decimal,
    ) -> Self {
        self.transaction.rounding = Some(TransactionEntry::new(
            user_id,
            asset_id,
            ticker,
            quantity,
            BalanceType::Available,
        ));
        self
    }

    /// Override the from leg's balance type (Lock/Unlock flows)
    pub fn with_from_type(mut self, balance_type: BalanceType) -> Self {
        if let Some(from) = &mut self.transaction.from_balance {
            from.balance_type = balance_type;
        }
        self
    }

    /// Override the to leg's balance type (Lock/Unlock flows)
    pub fn with_to_type(mut self, balance_type: BalanceType) -> Self {
        if let Some(to) = &mut self.transaction.to_balance {
            to.balance_type = balance_type;
        }
        self
    }

    /// Mark this transaction as a reversal of an earlier one
    pub fn reversal_of(mut self, transaction_id: Uuid) -> Self {
        self.transaction.reversal_of_transaction_id = Some(transaction_id);
        self
    }

    /// Validate and produce the transaction
    pub fn build(self) -> crate::Result<Transaction> {
        self.transaction.validate()?;
        Ok(self.transaction)
    }
}
