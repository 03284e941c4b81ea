//! Reconciliation loop
//!
//! Periodic sweep over non-terminal orders:
//!
//! - Queued orders are submitted to the exchange (successor orders and
//!   orders whose first placement hit a transport failure enter the
//!   market here).
//! - Pending orders are polled for their venue status; terminal replies
//!   are folded into the ledger through the same atomic path the
//!   orchestrator uses.
//! - Failed and partially filled orders with unfilled remainder get a
//!   queued successor while the chain is under the retry cap, unless one
//!   already exists.
//!
//! The sweep is safe to run concurrently with itself and with live
//! settlement: every commit carries the order state it was computed
//! from, so when two sweeps act on the same order the ledger actor
//! rejects the second scope with a `Concurrency` error and only one
//! credit lands. Successor ids are derived from the parent order, so a
//! doubly spawned retry collides the same way. Queued submission checks
//! the venue for an order the ledger never recorded before placing a
//! new one.

use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::exchange::{OrderSide, ReplyStatus};
use crate::metrics;
use crate::orchestrator::SettlementOrchestrator;
use crate::Result;
use ledger_core::{ExchangeOrder, OrderPrecondition, OrderStatus, SettlementCommit};

/// Counts of what one sweep did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Queued orders submitted to the venue
    pub submitted: usize,
    /// Pending orders whose venue status was folded in
    pub reconciled: usize,
    /// Successor orders enqueued
    pub successors: usize,
}

impl SweepStats {
    /// Whether the sweep did anything
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Supervised periodic reconciliation worker
pub struct ReconciliationLoop {
    orchestrator: Arc<SettlementOrchestrator>,
    shutdown: watch::Receiver<bool>,
}

impl ReconciliationLoop {
    /// Create the loop
    pub fn new(orchestrator: Arc<SettlementOrchestrator>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            orchestrator,
            shutdown,
        }
    }

    /// Run sweeps until shutdown is signalled
    pub async fn run(mut self) {
        let interval =
            std::time::Duration::from_secs(self.orchestrator.config().reconcile_interval_secs);
        info!(interval = ?interval, "Starting reconciliation loop");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(stats) if stats.is_idle() => {}
                        Ok(stats) => info!(
                            submitted = stats.submitted,
                            reconciled = stats.reconciled,
                            successors = stats.successors,
                            "Reconciliation sweep complete"
                        ),
                        Err(e) => warn!("Reconciliation sweep failed: {}", e),
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Reconciliation loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over queued, pending and retryable orders
    pub async fn sweep(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let ledger = self.orchestrator.ledger();

        for order in ledger.orders_by_status(OrderStatus::Queued)? {
            // Re-read before acting; another sweep may have won the race
            let current = ledger.get_order(order.id)?;
            if current.status != OrderStatus::Queued {
                continue;
            }
            match self.submit_queued(current).await {
                Ok(()) => stats.submitted += 1,
                Err(e) => warn!(order_id = %order.id, "Queued submit failed: {}", e),
            }
        }

        for order in ledger.orders_by_status(OrderStatus::Pending)? {
            let current = ledger.get_order(order.id)?;
            if current.status != OrderStatus::Pending {
                continue;
            }
            match self.poll_pending(current).await {
                Ok(true) => stats.reconciled += 1,
                Ok(false) => {}
                Err(e) => warn!(order_id = %order.id, "Pending poll failed: {}", e),
            }
        }

        for status in [OrderStatus::Failed, OrderStatus::PartiallyFilled] {
            for order in ledger.orders_by_status(status)? {
                match self.spawn_successor(order).await {
                    Ok(true) => stats.successors += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Successor spawn failed: {}", e),
                }
            }
        }

        Ok(stats)
    }

    /// Submit a queued order to the venue and fold in the reply
    ///
    /// An order can sit Queued while the venue already holds a live
    /// order for it: a placement that reached the exchange before the
    /// process died, or a redelivery racing the chain. Placing again
    /// would overbuy, so the client_ref lookup runs first and any venue
    /// order the ledger never recorded is adopted instead.
    async fn submit_queued(&self, order: ExchangeOrder) -> Result<()> {
        let symbol = self.orchestrator.symbol(&order.ticker);
        let remaining = order.quote_quantity - order.quote_quantity_filled;
        let exchange = self.orchestrator.exchange();

        let chain = self
            .orchestrator
            .ledger()
            .orders_by_payment_provider(&order.payment_provider_id)?;
        let tracked: HashSet<&str> = chain
            .iter()
            .filter_map(|o| o.placed_order_id.as_deref())
            .collect();

        let venue_orders = self
            .orchestrator
            .retry()
            .run(
                || exchange.get_orders_by_client_ref(&symbol, &order.payment_provider_id),
                "reconcile_client_ref_lookup",
            )
            .await?;

        if let Some(orphan) = venue_orders
            .iter()
            .find(|r| !tracked.contains(r.order_id.as_str()))
        {
            warn!(
                order_id = %order.id,
                venue_order_id = %orphan.order_id,
                "Adopting venue order the ledger never recorded"
            );
            self.orchestrator
                .commit_order_fill(order, Some(OrderStatus::Queued), orphan)
                .await?;
            return Ok(());
        }

        let reply = self
            .orchestrator
            .retry()
            .run(
                || {
                    exchange.place_market_order(
                        &symbol,
                        OrderSide::Buy,
                        remaining,
                        &order.payment_provider_id,
                    )
                },
                "reconcile_place_order",
            )
            .await?;

        metrics::ORDERS_PLACED_TOTAL
            .with_label_values(&[order.ticker.as_str()])
            .inc();

        self.orchestrator
            .commit_order_fill(order, Some(OrderStatus::Queued), &reply)
            .await?;
        Ok(())
    }

    /// Poll a pending order; `false` means still open on the book
    async fn poll_pending(&self, order: ExchangeOrder) -> Result<bool> {
        let placed_order_id = match &order.placed_order_id {
            Some(id) => id.clone(),
            None => {
                // Should not happen; requeue so the submit path owns it
                warn!(order_id = %order.id, "Pending order has no venue id, requeueing");
                let precondition = OrderPrecondition {
                    status: OrderStatus::Pending,
                    quote_quantity_filled: order.quote_quantity_filled,
                };
                let mut requeued = order;
                requeued.status = OrderStatus::Queued;
                self.orchestrator
                    .ledger()
                    .commit_settlement(SettlementCommit {
                        order: requeued,
                        precondition: Some(precondition),
                        deltas: vec![],
                        transaction: None,
                        events: vec![],
                    })
                    .await?;
                return Ok(false);
            }
        };

        let exchange = self.orchestrator.exchange();
        let reply = self
            .orchestrator
            .retry()
            .run(
                || exchange.get_order_status(&placed_order_id),
                "reconcile_order_status",
            )
            .await?;

        if reply.status == ReplyStatus::Open {
            debug!(order_id = %order.id, "Order still open on the book");
            return Ok(false);
        }

        self.orchestrator
            .commit_order_fill(order, Some(OrderStatus::Pending), &reply)
            .await?;
        Ok(true)
    }

    /// Chain a queued successor for an unfilled remainder
    ///
    /// No-op when the chain cap is reached, the remainder is zero, or a
    /// successor for this order already exists.
    async fn spawn_successor(&self, order: ExchangeOrder) -> Result<bool> {
        let cap = self.orchestrator.config().order_retry_cap;
        if order.retry_count >= cap {
            return Ok(false);
        }

        let remaining = match order.status {
            OrderStatus::Failed => order.quote_quantity - order.quote_quantity_filled,
            OrderStatus::PartiallyFilled => order.quote_quantity_dust,
            _ => return Ok(false),
        };
        if remaining <= Decimal::ZERO {
            return Ok(false);
        }

        let ledger = self.orchestrator.ledger();
        let chain = ledger.orders_by_payment_provider(&order.payment_provider_id)?;
        if chain
            .iter()
            .any(|o| o.previous_order_id == Some(order.id))
        {
            return Ok(false);
        }

        let successor = order.successor(remaining);
        info!(
            order_id = %order.id,
            successor_id = %successor.id,
            retry_count = successor.retry_count,
            remaining = %remaining,
            "Enqueueing successor order"
        );

        ledger
            .commit_settlement(SettlementCommit {
                order: successor,
                precondition: None,
                deltas: vec![],
                transaction: None,
                events: vec![],
            })
            .await?;

        Ok(true)
    }
}
