//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Non-negativity: available >= 0 and locked >= 0 after every accepted delta
//! - Derivation: total == available + locked always holds
//! - Rejection leaves state untouched: a failed delta mutates nothing
//! - Builder normalization: entry signs follow their roles

use ledger_core::{
    Balance, BalanceDelta, BalanceType, Ticker, TransactionAction, TransactionBuilder,
    TransactionSource,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Signed quantities, two decimal places, both directions
fn delta_quantity_strategy() -> impl Strategy<Value = Decimal> {
    (-1_000_00i64..1_000_00i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Positive quantities
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000_00i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// A random sequence of (available_delta, locked_delta) pairs
fn delta_sequence_strategy() -> impl Strategy<Value = Vec<(Decimal, Decimal)>> {
    prop::collection::vec((delta_quantity_strategy(), delta_quantity_strategy()), 1..40)
}

fn apply_sequence(deltas: &[(Decimal, Decimal)]) -> (Balance, usize) {
    let user_id = Uuid::new_v4();
    let asset_id = Uuid::new_v4();
    let ticker = Ticker::new("BTC");
    let mut balance = Balance::new(user_id, asset_id, ticker.clone());

    let mut accepted = 0;
    for (available_delta, locked_delta) in deltas {
        let delta = BalanceDelta {
            user_id,
            asset_id,
            ticker: ticker.clone(),
            available_delta: *available_delta,
            locked_delta: *locked_delta,
        };
        if balance.apply(&delta, None).is_ok() {
            accepted += 1;
        }
    }
    (balance, accepted)
}

proptest! {
    /// No accepted sequence of deltas can drive a field negative or break
    /// the total derivation.
    #[test]
    fn prop_invariants_hold_after_any_sequence(deltas in delta_sequence_strategy()) {
        let (balance, accepted) = apply_sequence(&deltas);

        prop_assert!(balance.available >= Decimal::ZERO);
        prop_assert!(balance.locked >= Decimal::ZERO);
        prop_assert_eq!(balance.total, balance.available + balance.locked);
        prop_assert_eq!(balance.transaction_count, accepted as u64);
        prop_assert!(balance.check_invariants().is_ok());
    }

    /// A rejected delta leaves every field exactly as it was.
    #[test]
    fn prop_rejection_mutates_nothing(
        seed in amount_strategy(),
        overdraw in amount_strategy(),
    ) {
        let user_id = Uuid::new_v4();
        let asset_id = Uuid::new_v4();
        let ticker = Ticker::new("USDC");
        let mut balance = Balance::new(user_id, asset_id, ticker.clone());

        balance.apply(&BalanceDelta::credit_available(
            user_id, asset_id, ticker.clone(), seed,
        ), None).unwrap();

        let before_available = balance.available;
        let before_count = balance.transaction_count;

        let result = balance.apply(&BalanceDelta {
            user_id,
            asset_id,
            ticker: ticker.clone(),
            available_delta: -(seed + overdraw),
            locked_delta: Decimal::ZERO,
        }, None);

        prop_assert!(result.is_err());
        prop_assert_eq!(balance.available, before_available);
        prop_assert_eq!(balance.transaction_count, before_count);
    }

    /// Lock and unlock round-trips conserve the total.
    #[test]
    fn prop_lock_unlock_conserves_total(
        seed in amount_strategy(),
        lock_divisor in 1i64..10i64,
    ) {
        let user_id = Uuid::new_v4();
        let asset_id = Uuid::new_v4();
        let ticker = Ticker::new("USDC");
        let mut balance = Balance::new(user_id, asset_id, ticker.clone());

        balance.apply(&BalanceDelta::credit_available(
            user_id, asset_id, ticker.clone(), seed,
        ), None).unwrap();

        let lock_quantity = seed / Decimal::from(lock_divisor);
        let (available_delta, locked_delta) =
            BalanceType::LockFromAvailable.deltas(lock_quantity);
        balance.apply(&BalanceDelta {
            user_id, asset_id, ticker: ticker.clone(),
            available_delta, locked_delta,
        }, None).unwrap();

        prop_assert_eq!(balance.total, seed);
        prop_assert_eq!(balance.locked, lock_quantity);

        let (available_delta, locked_delta) =
            BalanceType::UnlockToAvailable.deltas(lock_quantity);
        balance.apply(&BalanceDelta {
            user_id, asset_id, ticker,
            available_delta, locked_delta,
        }, None).unwrap();

        prop_assert_eq!(balance.total, seed);
        prop_assert_eq!(balance.available, seed);
        prop_assert_eq!(balance.locked, Decimal::ZERO);
    }

    /// Builder forces From entries negative and To/Fee entries positive,
    /// whatever the caller passes.
    #[test]
    fn prop_builder_normalizes_signs(
        from_quantity in delta_quantity_strategy().prop_filter("non-zero", |q| !q.is_zero()),
        to_quantity in delta_quantity_strategy().prop_filter("non-zero", |q| !q.is_zero()),
        fee_quantity in amount_strategy(),
    ) {
        let user = Uuid::new_v4();
        let txn = TransactionBuilder::new(
            user,
            TransactionAction::Buy,
            TransactionSource::new("exchange", "ord"),
        )
        .from_balance(user, Uuid::new_v4(), Ticker::new("USDC"), from_quantity)
        .to_balance(user, Uuid::new_v4(), Ticker::new("BTC"), to_quantity)
        .fee(user, Uuid::new_v4(), Ticker::new("USDC"), fee_quantity)
        .build()
        .unwrap();

        prop_assert!(txn.from_balance.unwrap().quantity < Decimal::ZERO);
        prop_assert!(txn.to_balance.unwrap().quantity > Decimal::ZERO);
        prop_assert!(txn.fee.unwrap().quantity > Decimal::ZERO);
    }

    /// Paired same-asset entries must cancel; anything else is rejected.
    #[test]
    fn prop_same_asset_legs_must_cancel(
        quantity in amount_strategy(),
        skew in amount_strategy(),
    ) {
        let user = Uuid::new_v4();
        let asset = Uuid::new_v4();

        let unbalanced = TransactionBuilder::new(
            user,
            TransactionAction::Transfer,
            TransactionSource::new("internal", "tr"),
        )
        .from_balance(user, asset, Ticker::new("USDC"), quantity + skew)
        .to_balance(Uuid::new_v4(), asset, Ticker::new("USDC"), quantity)
        .build();
        prop_assert!(unbalanced.is_err());

        let balanced = TransactionBuilder::new(
            user,
            TransactionAction::Transfer,
            TransactionSource::new("internal", "tr"),
        )
        .from_balance(user, asset, Ticker::new("USDC"), quantity)
        .to_balance(Uuid::new_v4(), asset, Ticker::new("USDC"), quantity)
        .build();
        prop_assert!(balanced.is_ok());
    }
}
