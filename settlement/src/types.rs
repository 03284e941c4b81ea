//! Settlement domain types
//!
//! Everything here serializes to JSON: settlement reports are cached by
//! the idempotency store, so replays must deserialize to the exact result
//! the first run produced.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledger_core::Ticker;

/// One line of a subscription's allocation plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Asset to purchase
    pub asset_id: Uuid,

    /// Asset ticker
    pub ticker: Ticker,

    /// Share of the payment, in percent (0 < percent <= 100)
    pub percent: Decimal,
}

/// Terminal outcome of settling one allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderOutcome {
    /// An order reached the exchange and its fill was committed
    Settled {
        /// Ledger order id
        order_id: Uuid,
        /// Quote amount filled so far
        filled: Decimal,
        /// Residual quote amount not yet filled
        dust: Decimal,
    },

    /// An earlier delivery already covered this allocation in full
    AlreadySettled,

    /// The attempt failed; reconciliation owns any follow-up
    Failed {
        /// Human-readable failure reason
        reason: String,
    },
}

/// Result for a single allocation within a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    /// The allocation that was settled
    pub allocation: Allocation,

    /// What happened
    pub outcome: OrderOutcome,
}

/// Full settlement report for one payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    /// Payment provider reference
    pub payment_provider_id: String,

    /// Per-allocation results, in plan order
    pub results: Vec<OrderResult>,
}

impl SettlementReport {
    /// Whether every allocation reached a settled state
    pub fn all_settled(&self) -> bool {
        self.results.iter().all(|r| {
            matches!(
                r.outcome,
                OrderOutcome::Settled { .. } | OrderOutcome::AlreadySettled
            )
        })
    }
}
