//! Settlement configuration

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use ledger_core::Ticker;

/// Settlement orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Reserve asset payments arrive in (quote side of every symbol)
    pub reserve_ticker: String,

    /// Venue name recorded as the transaction source
    pub exchange_name: String,

    /// Reconciliation sweep interval (seconds)
    pub reconcile_interval_secs: u64,

    /// Successor orders allowed per original order
    pub order_retry_cap: u32,

    /// Cached settlement results live this long (seconds)
    pub idempotency_ttl_secs: u64,

    /// In-call retry policy for exchange requests
    pub retry_max_retries: u32,
    /// Delay before the first in-call retry (ms)
    pub retry_initial_delay_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            reserve_ticker: "USDC".to_string(),
            exchange_name: "exchange".to_string(),
            reconcile_interval_secs: 30,
            order_retry_cap: 3,
            idempotency_ttl_secs: 86_400,
            retry_max_retries: 2,
            retry_initial_delay_ms: 2000,
        }
    }
}

impl SettlementConfig {
    /// Reserve asset as a [`Ticker`]
    pub fn reserve(&self) -> Ticker {
        Ticker::new(&self.reserve_ticker)
    }

    /// Retry policy config derived from the knobs here
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry_max_retries,
            initial_delay_ms: self.retry_initial_delay_ms,
            ..RetryConfig::default()
        }
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();

        if let Ok(ticker) = std::env::var("SETTLEMENT_RESERVE_TICKER") {
            config.reserve_ticker = ticker;
        }
        if let Ok(interval) = std::env::var("SETTLEMENT_RECONCILE_INTERVAL_SECS") {
            config.reconcile_interval_secs = interval
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid interval: {}", e)))?;
        }
        if let Ok(cap) = std::env::var("SETTLEMENT_ORDER_RETRY_CAP") {
            config.order_retry_cap = cap
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid retry cap: {}", e)))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SettlementConfig::default();
        assert_eq!(config.reserve().as_str(), "USDC");
        assert_eq!(config.order_retry_cap, 3);
        assert_eq!(config.retry_config().max_retries, 2);
    }
}
