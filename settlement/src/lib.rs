//! Strata Settlement
//!
//! Order settlement orchestration: turns incoming payments into exchange
//! orders per allocation plan, commits fills atomically through the
//! ledger, and reconciles anything the happy path missed.
//!
//! # Flow
//!
//! 1. A `payment.received` event arrives on the bus.
//! 2. The orchestrator checks the platform reserve, fetches the
//!    subscription's allocation plan and places one market order per
//!    allocation, each fill committed in a single ledger scope.
//! 3. The reconciliation loop sweeps queued and pending orders, folds in
//!    late venue outcomes and chains successor orders for failures and
//!    partial fills, up to the retry cap.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod allocation;
pub mod config;
pub mod error;
pub mod exchange;
pub mod metrics;
pub mod mock;
pub mod orchestrator;
pub mod reconciliation;
pub mod retry;
pub mod types;
pub mod worker;

// Re-exports
pub use allocation::{AllocationProvider, StaticAllocationProvider};
pub use config::SettlementConfig;
pub use error::{Error, Result};
pub use exchange::{ExchangeBalance, ExchangeClient, ExchangeOrderReply, OrderSide, ReplyStatus};
pub use mock::{FillPlan, MockExchange};
pub use orchestrator::SettlementOrchestrator;
pub use reconciliation::{ReconciliationLoop, SweepStats};
pub use retry::{RetryConfig, RetryPolicy};
pub use types::{Allocation, OrderOutcome, OrderResult, SettlementReport};
pub use worker::PaymentWorker;
