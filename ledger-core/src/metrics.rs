//! Prometheus metrics for the ledger
//!
//! # Metrics
//!
//! - `ledger_settlement_commits_total` - Settlement scopes by outcome
//! - `ledger_apply_delta_duration_seconds` - Balance delta latency
//! - `ledger_insufficient_balance_total` - Rejected overdraw attempts

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

lazy_static! {
    /// Settlement scope commits by outcome (committed / aborted)
    pub static ref SETTLEMENT_COMMITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ledger_settlement_commits_total",
        "Settlement scopes committed or aborted",
        &["status"]
    )
    .unwrap();

    /// Balance delta application latency
    pub static ref APPLY_DELTA_DURATION: Histogram = register_histogram!(
        "ledger_apply_delta_duration_seconds",
        "Balance delta application latency in seconds"
    )
    .unwrap();

    /// Deltas rejected because a balance field would go negative
    pub static ref INSUFFICIENT_BALANCE_TOTAL: IntCounter = register_int_counter!(
        "ledger_insufficient_balance_total",
        "Deltas rejected for insufficient balance"
    )
    .unwrap();
}
