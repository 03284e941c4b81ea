//! Error types for the event bus

use thiserror::Error;

/// Event bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbox store error
    #[error("Outbox store error: {0}")]
    Store(String),

    /// Channel closed
    #[error("Channel closed: {0}")]
    Closed(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
