//! Prometheus metrics for settlement
//!
//! # Metrics
//!
//! - `settlement_payments_total` - Payments processed by outcome
//! - `settlement_orders_placed_total` - Orders submitted to the venue
//! - `settlement_allocations_total` - Allocation outcomes
//! - `settlement_dust_quote_total` - Unfilled quote residue recorded

use lazy_static::lazy_static;
use prometheus::{register_counter, register_int_counter_vec, Counter, IntCounterVec};

lazy_static! {
    /// Payments processed, labeled by outcome (settled / partial / funding_gap)
    pub static ref PAYMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_payments_total",
        "Payments processed by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Orders submitted to the venue, labeled by ticker
    pub static ref ORDERS_PLACED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_orders_placed_total",
        "Orders submitted to the exchange",
        &["ticker"]
    )
    .unwrap();

    /// Allocation outcomes (settled / already_settled / failed)
    pub static ref ALLOCATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_allocations_total",
        "Allocation settlement outcomes",
        &["outcome"]
    )
    .unwrap();

    /// Quote residue left on orders that gave up retrying
    pub static ref DUST_QUOTE_TOTAL: Counter = register_counter!(
        "settlement_dust_quote_total",
        "Unfilled quote residue recorded as dust"
    )
    .unwrap();
}
