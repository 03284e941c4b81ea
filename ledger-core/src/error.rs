//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// A delta would drive a balance field negative; no write occurs
    #[error("Insufficient balance for {ticker}: required {required}, available {available}")]
    InsufficientBalance {
        /// Asset ticker
        ticker: String,
        /// Amount the operation needed
        required: Decimal,
        /// Amount actually held
        available: Decimal,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Concurrency error (duplicate key, lost update, actor mailbox closed)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Balance not found
    #[error("Balance not found: {0}")]
    BalanceNotFound(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Order not found
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Event not found
    #[error("Event not found: {0}")]
    EventNotFound(String),

    /// Asset not known to the catalog
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Invariant violation (total != available + locked, unbalanced legs)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<event_bus::Error> for Error {
    fn from(err: event_bus::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
