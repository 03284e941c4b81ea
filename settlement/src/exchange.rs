//! Exchange client interface
//!
//! The orchestrator talks to the venue through this trait. Replies report
//! CUMULATIVE fill totals for an order, never increments; callers derive
//! increments by subtracting their stored state.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Result;
use ledger_core::Ticker;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy base with quote
    Buy,
    /// Sell base for quote
    Sell,
}

/// Venue-reported order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// Still working on the book
    Open,
    /// Fully filled
    Filled,
    /// Terminal with a partial fill
    PartiallyFilled,
    /// Rejected without a fill
    Rejected,
}

/// Exchange's view of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrderReply {
    /// Venue order id
    pub order_id: String,

    /// Current status
    pub status: ReplyStatus,

    /// Execution price
    pub price: Decimal,

    /// Cumulative base quantity filled
    pub quantity_filled: Decimal,

    /// Cumulative quote quantity filled
    pub quote_quantity_filled: Decimal,
}

/// Exchange account balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBalance {
    /// Available quantity on the venue
    pub available: Decimal,
}

/// Client for the trading venue
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Place a market order spending `quote_quantity` of the quote asset
    ///
    /// `client_ref` tags the order with the payment provider reference so
    /// a lost reply can be recovered by [`Self::get_orders_by_client_ref`].
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quote_quantity: Decimal,
        client_ref: &str,
    ) -> Result<ExchangeOrderReply>;

    /// Current state of a previously placed order
    async fn get_order_status(&self, order_id: &str) -> Result<ExchangeOrderReply>;

    /// Every order on `symbol` tagged with `client_ref`
    async fn get_orders_by_client_ref(
        &self,
        symbol: &str,
        client_ref: &str,
    ) -> Result<Vec<ExchangeOrderReply>>;

    /// Platform account balance for an asset
    async fn get_balance(&self, ticker: &Ticker) -> Result<ExchangeBalance>;
}
