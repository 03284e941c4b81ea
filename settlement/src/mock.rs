//! In-memory exchange for tests and local development
//!
//! Fill behavior is scripted per symbol, so tests can drive every venue
//! outcome: full fills, terminal partials, rejections, resting orders and
//! transient transport errors.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::exchange::{
    ExchangeBalance, ExchangeClient, ExchangeOrderReply, OrderSide, ReplyStatus,
};
use crate::{Error, Result};
use async_trait::async_trait;
use ledger_core::Ticker;

/// Scripted venue behavior for one symbol
#[derive(Debug, Clone)]
pub enum FillPlan {
    /// Fill the full quote quantity immediately
    Fill,
    /// Terminal partial: fill exactly this quote amount
    PartialQuote(Decimal),
    /// Reject the order without a fill
    Reject(String),
    /// Accept the order and leave it resting on the book
    Open,
    /// Fail the next `remaining` placements with a transport error, then fill
    ErrorThenFill {
        /// Placements left to fail
        remaining: u32,
    },
}

/// An order the mock venue has accepted
#[derive(Debug, Clone)]
pub struct MockOrder {
    /// Symbol the order was placed on
    pub symbol: String,
    /// Client reference tag
    pub client_ref: String,
    /// Reply returned at placement time
    pub reply: ExchangeOrderReply,
}

#[derive(Default)]
struct MockState {
    balances: HashMap<Ticker, Decimal>,
    prices: HashMap<String, Decimal>,
    plans: HashMap<String, FillPlan>,
    orders: Vec<MockOrder>,
    replies: HashMap<String, ExchangeOrderReply>,
    next_id: u64,
    balance_lookup_failures: u32,
    ref_lookup_failures: u32,
}

fn fail_transient(remaining: &mut u32, what: &str) -> Result<()> {
    if *remaining > 0 {
        *remaining -= 1;
        return Err(Error::Exchange(format!("Transient {} error", what)));
    }
    Ok(())
}

/// Scriptable in-memory exchange
#[derive(Default)]
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    /// Create empty mock venue
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the platform account balance for an asset
    pub fn with_reserve(self, ticker: Ticker, quantity: Decimal) -> Self {
        self.state.lock().balances.insert(ticker, quantity);
        self
    }

    /// Fix the execution price for a symbol (defaults to 1)
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    /// Script the fill behavior for a symbol (defaults to [`FillPlan::Fill`])
    pub fn set_plan(&self, symbol: &str, plan: FillPlan) {
        self.state.lock().plans.insert(symbol.to_string(), plan);
    }

    /// Override the reply returned by later status polls for an order
    pub fn set_order_reply(&self, order_id: &str, reply: ExchangeOrderReply) {
        self.state.lock().replies.insert(order_id.to_string(), reply);
    }

    /// Fail the next `count` balance lookups with a transport error
    pub fn set_balance_lookup_failures(&self, count: u32) {
        self.state.lock().balance_lookup_failures = count;
    }

    /// Fail the next `count` client_ref lookups with a transport error
    pub fn set_ref_lookup_failures(&self, count: u32) {
        self.state.lock().ref_lookup_failures = count;
    }

    /// Every order the venue has accepted, in placement order
    pub fn placed_orders(&self) -> Vec<MockOrder> {
        self.state.lock().orders.clone()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn place_market_order(
        &self,
        symbol: &str,
        _side: OrderSide,
        quote_quantity: Decimal,
        client_ref: &str,
    ) -> Result<ExchangeOrderReply> {
        let mut state = self.state.lock();

        let plan = state
            .plans
            .get(symbol)
            .cloned()
            .unwrap_or(FillPlan::Fill);
        let price = state
            .prices
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ONE);

        let (status, quote_filled) = match plan {
            FillPlan::Fill => (ReplyStatus::Filled, quote_quantity),
            FillPlan::PartialQuote(filled) => (ReplyStatus::PartiallyFilled, filled),
            FillPlan::Reject(reason) => {
                // Rejections are venue replies, not transport errors; still
                // assign an id so the order shows up in client_ref lookups
                state.next_id += 1;
                let order_id = format!("mock-{}", state.next_id);
                let reply = ExchangeOrderReply {
                    order_id: order_id.clone(),
                    status: ReplyStatus::Rejected,
                    price,
                    quantity_filled: Decimal::ZERO,
                    quote_quantity_filled: Decimal::ZERO,
                };
                state.orders.push(MockOrder {
                    symbol: symbol.to_string(),
                    client_ref: client_ref.to_string(),
                    reply: reply.clone(),
                });
                state.replies.insert(order_id, reply.clone());
                tracing::debug!(symbol, reason = %reason, "Mock venue rejected order");
                return Ok(reply);
            }
            FillPlan::Open => (ReplyStatus::Open, Decimal::ZERO),
            FillPlan::ErrorThenFill { remaining } => {
                if remaining > 0 {
                    state.plans.insert(
                        symbol.to_string(),
                        FillPlan::ErrorThenFill {
                            remaining: remaining - 1,
                        },
                    );
                    return Err(Error::Exchange(format!(
                        "Transient venue error on {}",
                        symbol
                    )));
                }
                (ReplyStatus::Filled, quote_quantity)
            }
        };

        state.next_id += 1;
        let order_id = format!("mock-{}", state.next_id);
        let reply = ExchangeOrderReply {
            order_id: order_id.clone(),
            status,
            price,
            quantity_filled: quote_filled / price,
            quote_quantity_filled: quote_filled,
        };

        state.orders.push(MockOrder {
            symbol: symbol.to_string(),
            client_ref: client_ref.to_string(),
            reply: reply.clone(),
        });
        state.replies.insert(order_id, reply.clone());

        Ok(reply)
    }

    async fn get_order_status(&self, order_id: &str) -> Result<ExchangeOrderReply> {
        self.state
            .lock()
            .replies
            .get(order_id)
            .cloned()
            .ok_or_else(|| Error::Exchange(format!("Unknown order: {}", order_id)))
    }

    async fn get_orders_by_client_ref(
        &self,
        symbol: &str,
        client_ref: &str,
    ) -> Result<Vec<ExchangeOrderReply>> {
        let mut state = self.state.lock();
        fail_transient(&mut state.ref_lookup_failures, "client_ref lookup")?;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && o.client_ref == client_ref)
            .map(|o| {
                // Served from the live reply map so later fills are visible
                state
                    .replies
                    .get(&o.reply.order_id)
                    .cloned()
                    .unwrap_or_else(|| o.reply.clone())
            })
            .collect())
    }

    async fn get_balance(&self, ticker: &Ticker) -> Result<ExchangeBalance> {
        let mut state = self.state.lock();
        fail_transient(&mut state.balance_lookup_failures, "balance lookup")?;
        let available = state.balances.get(ticker).copied().unwrap_or(Decimal::ZERO);
        Ok(ExchangeBalance { available })
    }
}
