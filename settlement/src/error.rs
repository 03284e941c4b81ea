//! Settlement error types

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Reserve balance cannot cover the payment
    #[error("Insufficient reserve balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount the payment needs
        required: Decimal,
        /// Amount currently available
        available: Decimal,
    },

    /// Exchange call failed (retryable)
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// No allocation plan for the subscription
    #[error("Allocation plan not found for subscription: {0}")]
    AllocationNotFound(Uuid),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Event bus error
    #[error("Event bus error: {0}")]
    Bus(#[from] event_bus::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Exchange(_))
    }
}
