//! Settlement orchestrator
//!
//! Turns a `payment.received` event into exchange orders per the
//! subscription's allocation plan and commits each fill atomically
//! through the ledger. Duplicate deliveries are absorbed twice over:
//! the idempotency store replays the cached report, and the exchange's
//! client_ref lookup subtracts anything already filled before a new
//! order is placed.
//!
//! Exchange replies carry CUMULATIVE fill totals. Credits are computed
//! as reply minus stored order state, which makes re-processing the same
//! reply a natural no-op.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::allocation::{validate_allocations, AllocationProvider};
use crate::config::SettlementConfig;
use crate::exchange::{ExchangeClient, ExchangeOrderReply, OrderSide, ReplyStatus};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::types::{Allocation, OrderOutcome, OrderResult, SettlementReport};
use crate::{Error, Result};
use event_bus::{DomainEvent, EventBus, EventRecord, PaymentReceived};
use ledger_core::{
    ExchangeOrder, IdempotencyStore, LedgerStore, OrderPrecondition, OrderStatus,
    SettlementCommit, Ticker, TransactionAction, TransactionBuilder, TransactionSource,
};

/// Drives payment settlement end to end
pub struct SettlementOrchestrator {
    ledger: LedgerStore,
    exchange: Arc<dyn ExchangeClient>,
    allocations: Arc<dyn AllocationProvider>,
    bus: Arc<dyn EventBus>,
    idempotency: IdempotencyStore,
    retry: RetryPolicy,
    config: SettlementConfig,
}

impl SettlementOrchestrator {
    /// Wire up the orchestrator
    pub fn new(
        ledger: LedgerStore,
        exchange: Arc<dyn ExchangeClient>,
        allocations: Arc<dyn AllocationProvider>,
        bus: Arc<dyn EventBus>,
        config: SettlementConfig,
    ) -> Self {
        let idempotency = IdempotencyStore::new(ledger.storage());
        let retry = RetryPolicy::new(config.retry_config());
        Self {
            ledger,
            exchange,
            allocations,
            bus,
            idempotency,
            retry,
            config,
        }
    }

    /// Ledger handle (reconciliation shares it)
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Orchestrator configuration
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub(crate) fn exchange(&self) -> &Arc<dyn ExchangeClient> {
        &self.exchange
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Trading symbol for an asset against the platform reserve
    pub fn symbol(&self, ticker: &Ticker) -> String {
        format!("{}{}", ticker, self.config.reserve_ticker)
    }

    /// Handle a delivered `payment.received` event
    ///
    /// Runs [`Self::process_payment`] under the idempotency store, then
    /// acknowledges the event only when every allocation reached a settled
    /// state — anything less leaves it unprocessed for the relay to
    /// redrive.
    pub async fn handle_event(&self, record: &EventRecord) -> Result<SettlementReport> {
        let payment = match record.decode()? {
            DomainEvent::PaymentReceived(payment) => payment,
            other => {
                return Err(Error::Validation(format!(
                    "Unexpected event on payment handler: {}",
                    other.name()
                )))
            }
        };

        let key = format!("settle:{}", payment.payment_provider_id);
        let ttl = std::time::Duration::from_secs(self.config.idempotency_ttl_secs);
        let report: SettlementReport = self
            .idempotency
            .execute(&key, ttl, || self.process_payment(&payment))
            .await?;

        if report.all_settled() {
            self.ledger.mark_event_processed(record.id).await?;
        }

        Ok(report)
    }

    /// Settle one payment against its subscription's allocation plan
    pub async fn process_payment(&self, payment: &PaymentReceived) -> Result<SettlementReport> {
        if payment.net_amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Payment amount must be positive: {}",
                payment.net_amount
            )));
        }
        if !payment
            .currency
            .eq_ignore_ascii_case(&self.config.reserve_ticker)
        {
            return Err(Error::Validation(format!(
                "Payment currency {} does not match reserve {}",
                payment.currency, self.config.reserve_ticker
            )));
        }

        self.check_reserve(payment).await?;

        let plan = self.allocations.allocations(payment.subscription_id)?;
        validate_allocations(&plan)?;

        let mut results = Vec::with_capacity(plan.len());
        for allocation in plan {
            let outcome = match self.settle_allocation(payment, &allocation).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        payment_provider_id = %payment.payment_provider_id,
                        ticker = %allocation.ticker,
                        "Allocation failed: {}", e
                    );
                    OrderOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            let label = match &outcome {
                OrderOutcome::Settled { .. } => "settled",
                OrderOutcome::AlreadySettled => "already_settled",
                OrderOutcome::Failed { .. } => "failed",
            };
            metrics::ALLOCATIONS_TOTAL.with_label_values(&[label]).inc();

            results.push(OrderResult {
                allocation,
                outcome,
            });
        }

        let report = SettlementReport {
            payment_provider_id: payment.payment_provider_id.clone(),
            results,
        };

        let outcome_label = if report.all_settled() {
            "settled"
        } else {
            "partial"
        };
        metrics::PAYMENTS_TOTAL
            .with_label_values(&[outcome_label])
            .inc();

        info!(
            payment_provider_id = %report.payment_provider_id,
            allocations = report.results.len(),
            all_settled = report.all_settled(),
            "Payment processed"
        );

        Ok(report)
    }

    /// Reserve gate: the platform exchange account must already hold the
    /// payment's amount in the reserve asset. A shortfall raises a
    /// persisted, operator-visible funding request and fails the payment.
    async fn check_reserve(&self, payment: &PaymentReceived) -> Result<()> {
        let reserve = self.config.reserve();
        let balance = self
            .retry
            .run(|| self.exchange.get_balance(&reserve), "get_balance")
            .await?;

        if balance.available < payment.net_amount {
            metrics::PAYMENTS_TOTAL
                .with_label_values(&["funding_gap"])
                .inc();

            let record = self
                .ledger
                .insert_event(DomainEvent::FundingRequested {
                    amount: payment.net_amount,
                    currency: reserve.to_string(),
                })
                .await?;
            self.publish_notification(&record).await;

            return Err(Error::InsufficientBalance {
                required: payment.net_amount,
                available: balance.available,
            });
        }

        Ok(())
    }

    /// Settle one allocation of a payment
    async fn settle_allocation(
        &self,
        payment: &PaymentReceived,
        allocation: &Allocation,
    ) -> Result<OrderOutcome> {
        let target = payment.net_amount * allocation.percent / Decimal::from(100);
        let symbol = self.symbol(&allocation.ticker);

        // Duplicate-delivery guard: the venue is the source of truth for
        // what this payment has already bought on this symbol
        let existing = self
            .retry
            .run(
                || {
                    self.exchange
                        .get_orders_by_client_ref(&symbol, &payment.payment_provider_id)
                },
                "get_orders_by_client_ref",
            )
            .await?;
        let already_filled: Decimal = existing.iter().map(|o| o.quote_quantity_filled).sum();

        let remaining = target - already_filled;
        if remaining <= Decimal::ZERO {
            info!(
                symbol,
                payment_provider_id = %payment.payment_provider_id,
                "Allocation already covered by earlier orders"
            );
            return Ok(OrderOutcome::AlreadySettled);
        }

        let mut order = ExchangeOrder::new(
            payment.user_id,
            payment.payment_provider_id.clone(),
            payment.subscription_id,
            allocation.asset_id,
            allocation.ticker.clone(),
            remaining,
        );

        let placement = self
            .retry
            .run(
                || {
                    self.exchange.place_market_order(
                        &symbol,
                        OrderSide::Buy,
                        remaining,
                        &payment.payment_provider_id,
                    )
                },
                "place_market_order",
            )
            .await;

        match placement {
            Ok(reply) => {
                metrics::ORDERS_PLACED_TOTAL
                    .with_label_values(&[allocation.ticker.as_str()])
                    .inc();
                let order = self.commit_order_fill(order, None, &reply).await?;
                match order.status {
                    OrderStatus::Failed => Ok(OrderOutcome::Failed {
                        reason: format!("Order {} rejected by the venue", order.id),
                    }),
                    _ => Ok(OrderOutcome::Settled {
                        order_id: order.id,
                        filled: order.quote_quantity_filled,
                        dust: order.quote_quantity_dust,
                    }),
                }
            }
            Err(e) => {
                // Transport-level failure: persist the order as Queued so
                // the reconciliation sweep owns the resubmission
                order.status = OrderStatus::Queued;
                self.ledger
                    .commit_settlement(SettlementCommit {
                        order,
                        precondition: None,
                        deltas: vec![],
                        transaction: None,
                        events: vec![],
                    })
                    .await?;
                Err(e)
            }
        }
    }

    /// Fold a venue reply into the ledger: order update, balance credit
    /// for the fill increment, Buy transaction and change event, all in
    /// one atomic scope.
    ///
    /// Shared by the orchestrator (placement replies) and the
    /// reconciliation loop (status polls), and idempotent because the
    /// credit is the cumulative reply minus what the order already holds.
    /// The commit carries the order state this call read; a concurrent
    /// writer that committed first fails the scope instead of crediting
    /// the same increment twice.
    pub(crate) async fn commit_order_fill(
        &self,
        mut order: ExchangeOrder,
        previous_status: Option<OrderStatus>,
        reply: &ExchangeOrderReply,
    ) -> Result<ExchangeOrder> {
        let precondition = previous_status.map(|status| OrderPrecondition {
            status,
            quote_quantity_filled: order.quote_quantity_filled,
        });
        let quote_increment = reply.quote_quantity_filled - order.quote_quantity_filled;
        let base_increment = reply.quantity_filled - order.quantity;

        if quote_increment < Decimal::ZERO || base_increment < Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Exchange reported shrinking fill for order {}",
                order.id
            )));
        }

        order.placed_order_id = Some(reply.order_id.clone());
        order.quote_quantity_filled = reply.quote_quantity_filled;
        order.quantity = reply.quantity_filled;
        if reply.price > Decimal::ZERO {
            order.price = reply.price;
        }
        order.quote_quantity_dust =
            (order.quote_quantity - order.quote_quantity_filled).max(Decimal::ZERO);
        order.status = match reply.status {
            ReplyStatus::Open => OrderStatus::Pending,
            ReplyStatus::Filled => OrderStatus::Filled,
            ReplyStatus::PartiallyFilled => OrderStatus::PartiallyFilled,
            ReplyStatus::Rejected => OrderStatus::Failed,
        };
        order.updated_at = chrono::Utc::now();

        let mut deltas = Vec::new();
        let mut transaction = None;
        let mut events = Vec::new();

        if base_increment > Decimal::ZERO {
            deltas.push(ledger_core::BalanceDelta::credit_available(
                order.user_id,
                order.asset_id,
                order.ticker.clone(),
                base_increment,
            ));
            transaction = Some(
                TransactionBuilder::new(
                    order.user_id,
                    TransactionAction::Buy,
                    TransactionSource::new(&self.config.exchange_name, &reply.order_id),
                )
                .to_balance(
                    order.user_id,
                    order.asset_id,
                    order.ticker.clone(),
                    base_increment,
                )
                .build()?,
            );
            events.push(DomainEvent::BalanceChanged {
                user_id: order.user_id,
                asset_id: order.asset_id,
            });
        }

        // Residue becomes terminal dust once the retry chain is exhausted
        if matches!(
            order.status,
            OrderStatus::Failed | OrderStatus::PartiallyFilled
        ) && order.retry_count >= self.config.order_retry_cap
            && order.quote_quantity_dust > Decimal::ZERO
        {
            metrics::DUST_QUOTE_TOTAL
                .inc_by(order.quote_quantity_dust.to_f64().unwrap_or(0.0));
        }

        let outcome = self
            .ledger
            .commit_settlement(SettlementCommit {
                order,
                precondition,
                deltas,
                transaction,
                events,
            })
            .await?;

        for record in &outcome.events {
            self.publish_notification(record).await;
        }

        Ok(outcome.order)
    }

    /// Publish a persisted notification event and acknowledge it
    ///
    /// Notification events (balance changes, funding requests) have no
    /// acking consumer of their own; a successful publish is their
    /// terminal state. Publish failures leave the record unprocessed for
    /// the relay.
    async fn publish_notification(&self, record: &EventRecord) {
        match self.bus.publish(record).await {
            Ok(()) => {
                if let Err(e) = self.ledger.mark_event_processed(record.id).await {
                    warn!(event_id = %record.id, "Failed to ack notification: {}", e);
                }
            }
            Err(e) => {
                warn!(event_id = %record.id, "Publish failed, relay will redeliver: {}", e);
            }
        }
    }
}
