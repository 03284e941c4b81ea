//! Strata Ledger Core
//!
//! Double-entry balance ledger for the Strata investment platform.
//!
//! # Architecture
//!
//! - **Single Writer**: All balance mutations funnel through one actor task
//! - **Atomic Scopes**: Order + balances + transaction + outbox events
//!   commit in a single RocksDB `WriteBatch`
//! - **Outbox**: Domain events persist with the state change that caused
//!   them; a relay redelivers anything a live subscriber missed
//!
//! # Invariants
//!
//! - `available >= 0`, `locked >= 0`, `total == available + locked`
//! - Confirmed transactions are immutable
//! - Paired same-asset entries cancel exactly

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod builder;
pub mod catalog;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod metrics;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use builder::TransactionBuilder;
pub use catalog::{AssetCatalog, AssetInfo, StaticAssetCatalog};
pub use config::Config;
pub use error::{Error, Result};
pub use idempotency::IdempotencyStore;
pub use storage::{StagedWrite, Storage};
pub use store::{LedgerStore, OrderPrecondition, SettlementCommit, SettlementOutcome};
pub use types::{
    Balance, BalanceDelta, BalanceSnapshot, BalanceType, ExchangeOrder, IdempotencyRecord,
    OrderStatus, Ticker, Transaction, TransactionAction, TransactionEntry, TransactionSource,
};
