//! Actor-based single-writer ledger store
//!
//! All balance-mutating writes funnel through one Tokio actor task, which
//! serializes them and commits each settlement scope as a single RocksDB
//! `WriteBatch`. Two guarantees fall out of this:
//!
//! - Per-document atomic increments: concurrent deltas against the same
//!   balance never interleave.
//! - Multi-record atomicity: an order update, its balance changes, its
//!   transaction record, and its outbox events land together or not at all.
//!
//! Reads bypass the actor and hit storage directly; RocksDB snapshots keep
//! them consistent with the committed state.

use crate::{
    catalog::AssetCatalog,
    metrics,
    storage::{StagedWrite, Storage},
    types::{Balance, BalanceDelta, ExchangeOrder, OrderStatus, Ticker, Transaction},
    Config, Error, Result,
};
use event_bus::{DomainEvent, EventRecord};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Actor mailbox depth; senders block when the writer falls behind
const MAILBOX_CAPACITY: usize = 1000;

/// The persisted order state a settlement commit was computed against
///
/// Callers read an order, talk to the exchange, then commit; the actor
/// compares this against what is actually on disk and rejects the scope
/// with [`Error::Concurrency`] when another writer got there first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPrecondition {
    /// Status the caller observed
    pub status: OrderStatus,
    /// Cumulative quote fill the caller observed
    pub quote_quantity_filled: Decimal,
}

/// A settlement scope: everything that must commit atomically
#[derive(Debug)]
pub struct SettlementCommit {
    /// Order to upsert
    pub order: ExchangeOrder,
    /// Persisted state this scope was computed from (None for a new
    /// order, which must not exist yet)
    pub precondition: Option<OrderPrecondition>,
    /// Balance deltas to apply
    pub deltas: Vec<BalanceDelta>,
    /// Transaction record tying the deltas together
    pub transaction: Option<Transaction>,
    /// Outbox events persisted in the same batch
    pub events: Vec<DomainEvent>,
}

/// What a committed settlement scope produced
#[derive(Debug)]
pub struct SettlementOutcome {
    /// Order as persisted
    pub order: ExchangeOrder,
    /// Balances after the deltas
    pub balances: Vec<Balance>,
    /// Confirmed transaction, if one was part of the scope
    pub transaction: Option<Transaction>,
    /// Persisted outbox records, ready for post-commit publish
    pub events: Vec<EventRecord>,
}

/// Message sent to the ledger actor
enum LedgerMessage {
    /// Apply a single balance delta
    ApplyDelta {
        delta: BalanceDelta,
        transaction_id: Option<Uuid>,
        response: oneshot::Sender<Result<Balance>>,
    },

    /// Load or materialize the balance for a (user, ticker) pair
    FetchOrCreate {
        user_id: Uuid,
        ticker: Ticker,
        response: oneshot::Sender<Result<Balance>>,
    },

    /// Commit a settlement scope atomically
    CommitSettlement {
        commit: Box<SettlementCommit>,
        response: oneshot::Sender<Result<SettlementOutcome>>,
    },

    /// Persist a standalone outbox event
    InsertEvent {
        event: DomainEvent,
        response: oneshot::Sender<Result<EventRecord>>,
    },

    /// Flip an outbox event to processed
    MarkEventProcessed {
        event_id: Uuid,
        response: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns all writes
struct LedgerActor {
    storage: Arc<Storage>,
    catalog: Arc<dyn AssetCatalog>,
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::ApplyDelta {
                    delta,
                    transaction_id,
                    response,
                } => {
                    let timer = metrics::APPLY_DELTA_DURATION.start_timer();
                    let result = self.apply_delta(delta, transaction_id);
                    timer.observe_duration();
                    let _ = response.send(result);
                }

                LedgerMessage::FetchOrCreate {
                    user_id,
                    ticker,
                    response,
                } => {
                    let _ = response.send(self.fetch_or_create(user_id, &ticker));
                }

                LedgerMessage::CommitSettlement { commit, response } => {
                    let result = self.commit_settlement(*commit);
                    match &result {
                        Ok(_) => metrics::SETTLEMENT_COMMITS_TOTAL
                            .with_label_values(&["committed"])
                            .inc(),
                        Err(_) => metrics::SETTLEMENT_COMMITS_TOTAL
                            .with_label_values(&["aborted"])
                            .inc(),
                    }
                    let _ = response.send(result);
                }

                LedgerMessage::InsertEvent { event, response } => {
                    let _ = response.send(self.insert_event(&event));
                }

                LedgerMessage::MarkEventProcessed { event_id, response } => {
                    let _ = response.send(self.storage.mark_event_processed(event_id));
                }

                LedgerMessage::Shutdown => break,
            }
        }
        tracing::info!("Ledger actor stopped");
    }

    fn load_or_create(&self, user_id: Uuid, asset_id: Uuid, ticker: &Ticker) -> Result<Balance> {
        match self.storage.find_balance(user_id, asset_id)? {
            Some(balance) => Ok(balance),
            None => Ok(Balance::new(user_id, asset_id, ticker.clone())),
        }
    }

    fn apply_delta(&self, delta: BalanceDelta, transaction_id: Option<Uuid>) -> Result<Balance> {
        let mut balance = self.load_or_create(delta.user_id, delta.asset_id, &delta.ticker)?;

        if let Err(e) = balance.apply(&delta, transaction_id) {
            if matches!(e, Error::InsufficientBalance { .. }) {
                metrics::INSUFFICIENT_BALANCE_TOTAL.inc();
            }
            return Err(e);
        }
        balance.check_invariants()?;

        let mut staged = StagedWrite::new();
        staged.stage_balance(&self.storage, &balance)?;
        self.storage.commit(staged)?;

        Ok(balance)
    }

    fn fetch_or_create(&self, user_id: Uuid, ticker: &Ticker) -> Result<Balance> {
        let info = self.catalog.resolve_ticker(ticker)?;
        let balance = self.load_or_create(user_id, info.asset_id, &info.ticker)?;

        // Persist a freshly materialized zero balance so its id is stable
        if balance.transaction_count == 0 {
            let mut staged = StagedWrite::new();
            staged.stage_balance(&self.storage, &balance)?;
            self.storage.commit(staged)?;
        }

        Ok(balance)
    }

    /// Apply a full settlement scope in one WriteBatch
    ///
    /// Validation and in-memory application run first; the batch is only
    /// written once every piece has succeeded, so a failing delta or an
    /// invalid transaction aborts with nothing persisted.
    ///
    /// The order precondition is checked here, inside the single-writer
    /// actor, which makes it a real compare-and-set: two callers racing
    /// on the same order snapshot serialize through the mailbox and the
    /// loser aborts before anything is staged.
    fn commit_settlement(&self, commit: SettlementCommit) -> Result<SettlementOutcome> {
        let SettlementCommit {
            order,
            precondition,
            deltas,
            mut transaction,
            events,
        } = commit;

        match &precondition {
            Some(expected) => {
                let persisted = self.storage.get_order(order.id)?;
                if persisted.status != expected.status
                    || persisted.quote_quantity_filled != expected.quote_quantity_filled
                {
                    return Err(Error::Concurrency(format!(
                        "Order {} moved to {:?}/{} since it was read at {:?}/{}",
                        order.id,
                        persisted.status,
                        persisted.quote_quantity_filled,
                        expected.status,
                        expected.quote_quantity_filled
                    )));
                }
            }
            None => match self.storage.get_order(order.id) {
                Ok(_) => {
                    return Err(Error::Concurrency(format!(
                        "Order {} already exists",
                        order.id
                    )))
                }
                Err(Error::OrderNotFound(_)) => {}
                Err(e) => return Err(e),
            },
        }

        // Apply deltas in memory, collapsing repeats against one balance
        let mut balances: Vec<Balance> = Vec::with_capacity(deltas.len());
        let mut snapshots = Vec::with_capacity(deltas.len());
        for delta in &deltas {
            let idx = balances
                .iter()
                .position(|b| b.user_id == delta.user_id && b.asset_id == delta.asset_id);
            let balance = match idx {
                Some(i) => &mut balances[i],
                None => {
                    let loaded =
                        self.load_or_create(delta.user_id, delta.asset_id, &delta.ticker)?;
                    balances.push(loaded);
                    let last = balances.len() - 1;
                    &mut balances[last]
                }
            };

            let before = balance.snapshot();
            let txn_id = transaction.as_ref().map(|t| t.id);
            if let Err(e) = balance.apply(delta, txn_id) {
                if matches!(e, Error::InsufficientBalance { .. }) {
                    metrics::INSUFFICIENT_BALANCE_TOTAL.inc();
                }
                return Err(e);
            }
            balance.check_invariants()?;
            snapshots.push((balance.id, before, balance.snapshot()));
        }

        // Validate and confirm the transaction record
        if let Some(txn) = &mut transaction {
            txn.validate()?;

            if let Some(original_id) = txn.reversal_of_transaction_id {
                let original = self.storage.get_transaction(original_id)?;
                if !original.is_confirmed {
                    return Err(Error::Validation(format!(
                        "Cannot reverse unconfirmed transaction {}",
                        original_id
                    )));
                }
            }

            txn.is_confirmed = true;
            txn.confirmed_at = Some(chrono::Utc::now());

            for entry in txn.entries_mut() {
                if let Some(balance) = balances
                    .iter()
                    .find(|b| b.user_id == entry.user_id && b.asset_id == entry.asset_id)
                {
                    entry.balance_id = Some(balance.id);
                    if let Some((_, before, after)) =
                        snapshots.iter().find(|(id, _, _)| *id == balance.id)
                    {
                        entry.balance_before = Some(*before);
                        entry.balance_after = Some(*after);
                    }
                }
            }
        }

        // Serialize outbox events
        let mut records = Vec::with_capacity(events.len());
        for event in &events {
            records.push(EventRecord::new(event)?);
        }

        // Stage everything into one batch
        let mut staged = StagedWrite::new();
        staged.stage_order(&self.storage, &order, precondition.map(|p| p.status))?;
        for balance in &balances {
            staged.stage_balance(&self.storage, balance)?;
        }
        if let Some(txn) = &transaction {
            staged.stage_transaction(&self.storage, txn)?;
        }
        for record in &records {
            staged.stage_event(&self.storage, record)?;
        }
        self.storage.commit(staged)?;

        tracing::debug!(
            order_id = %order.id,
            status = ?order.status,
            deltas = deltas.len(),
            events = records.len(),
            "Settlement scope committed"
        );

        Ok(SettlementOutcome {
            order,
            balances,
            transaction,
            events: records,
        })
    }

    fn insert_event(&self, event: &DomainEvent) -> Result<EventRecord> {
        let record = EventRecord::new(event)?;
        let mut staged = StagedWrite::new();
        staged.stage_event(&self.storage, &record)?;
        self.storage.commit(staged)?;
        Ok(record)
    }
}

/// Clonable handle to the ledger
///
/// Writes go through the actor; reads hit storage directly.
#[derive(Clone)]
pub struct LedgerStore {
    sender: mpsc::Sender<LedgerMessage>,
    storage: Arc<Storage>,
}

impl LedgerStore {
    /// Open storage and spawn the writer actor
    pub fn open(config: &Config, catalog: Arc<dyn AssetCatalog>) -> Result<Self> {
        let storage = Arc::new(Storage::open(config)?);
        let (sender, mailbox) = mpsc::channel(MAILBOX_CAPACITY);

        let actor = LedgerActor {
            storage: Arc::clone(&storage),
            catalog,
            mailbox,
        };
        tokio::spawn(actor.run());

        Ok(Self { sender, storage })
    }

    async fn send<T>(
        &self,
        msg: LedgerMessage,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| Error::Concurrency("Ledger actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Ledger actor response dropped".to_string()))?
    }

    /// Apply a single balance delta
    pub async fn apply_delta(
        &self,
        delta: BalanceDelta,
        transaction_id: Option<Uuid>,
    ) -> Result<Balance> {
        let (tx, rx) = oneshot::channel();
        self.send(
            LedgerMessage::ApplyDelta {
                delta,
                transaction_id,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Load or materialize the balance for a (user, ticker) pair
    pub async fn fetch_or_create(&self, user_id: Uuid, ticker: Ticker) -> Result<Balance> {
        let (tx, rx) = oneshot::channel();
        self.send(
            LedgerMessage::FetchOrCreate {
                user_id,
                ticker,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Commit a settlement scope atomically
    pub async fn commit_settlement(&self, commit: SettlementCommit) -> Result<SettlementOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(
            LedgerMessage::CommitSettlement {
                commit: Box::new(commit),
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Persist a standalone outbox event
    pub async fn insert_event(&self, event: DomainEvent) -> Result<EventRecord> {
        let (tx, rx) = oneshot::channel();
        self.send(LedgerMessage::InsertEvent { event, response: tx }, rx)
            .await
    }

    /// Flip an outbox event to processed
    pub async fn mark_event_processed(&self, event_id: Uuid) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(
            LedgerMessage::MarkEventProcessed {
                event_id,
                response: tx,
            },
            rx,
        )
        .await
    }

    // Direct reads

    /// Balance for a (user, asset) pair, if materialized
    pub fn find_balance(&self, user_id: Uuid, asset_id: Uuid) -> Result<Option<Balance>> {
        self.storage.find_balance(user_id, asset_id)
    }

    /// Order by ID
    pub fn get_order(&self, order_id: Uuid) -> Result<ExchangeOrder> {
        self.storage.get_order(order_id)
    }

    /// Orders in a given status
    pub fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<ExchangeOrder>> {
        self.storage.orders_by_status(status)
    }

    /// Every order created for one payment
    pub fn orders_by_payment_provider(&self, payment_provider_id: &str) -> Result<Vec<ExchangeOrder>> {
        self.storage.orders_by_payment_provider(payment_provider_id)
    }

    /// Transaction by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.storage.get_transaction(transaction_id)
    }

    /// Transactions for a user
    pub fn transactions_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        self.storage.transactions_for_user(user_id)
    }

    /// Underlying storage (idempotency store shares it)
    pub fn storage(&self) -> Arc<Storage> {
        Arc::clone(&self.storage)
    }

    /// Stop the writer actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(LedgerMessage::Shutdown).await;
    }
}

#[async_trait::async_trait]
impl event_bus::OutboxStore for LedgerStore {
    async fn unprocessed(
        &self,
        name: Option<&str>,
        limit: usize,
    ) -> event_bus::Result<Vec<EventRecord>> {
        self.storage
            .unprocessed_events(name, limit)
            .map_err(|e| event_bus::Error::Store(e.to_string()))
    }

    async fn mark_processed(&self, event_id: Uuid) -> event_bus::Result<()> {
        self.mark_event_processed(event_id)
            .await
            .map_err(|e| event_bus::Error::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TransactionBuilder;
    use crate::catalog::StaticAssetCatalog;
    use crate::types::{TransactionAction, TransactionSource};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    struct Fixture {
        store: LedgerStore,
        usdc: Uuid,
        btc: Uuid,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();

        let catalog = Arc::new(StaticAssetCatalog::new());
        let usdc = Uuid::new_v4();
        let btc = Uuid::new_v4();
        catalog.insert(usdc, Ticker::new("USDC"));
        catalog.insert(btc, Ticker::new("BTC"));

        let store = LedgerStore::open(&config, catalog).unwrap();
        Fixture {
            store,
            usdc,
            btc,
            _temp: temp,
        }
    }

    fn credit(user_id: Uuid, asset_id: Uuid, ticker: &str, quantity: Decimal) -> BalanceDelta {
        BalanceDelta::credit_available(user_id, asset_id, Ticker::new(ticker), quantity)
    }

    #[tokio::test]
    async fn test_apply_delta_creates_and_updates() {
        let f = fixture();
        let user = Uuid::new_v4();

        let balance = f
            .store
            .apply_delta(credit(user, f.usdc, "USDC", dec!(100)), None)
            .await
            .unwrap();
        assert_eq!(balance.available, dec!(100));

        let balance = f
            .store
            .apply_delta(credit(user, f.usdc, "USDC", dec!(-40)), None)
            .await
            .unwrap();
        assert_eq!(balance.available, dec!(60));
        assert_eq!(balance.transaction_count, 2);
    }

    #[tokio::test]
    async fn test_overdraft_leaves_state_untouched() {
        let f = fixture();
        let user = Uuid::new_v4();

        f.store
            .apply_delta(credit(user, f.usdc, "USDC", dec!(10)), None)
            .await
            .unwrap();

        let result = f
            .store
            .apply_delta(credit(user, f.usdc, "USDC", dec!(-20)), None)
            .await;
        assert!(matches!(result, Err(Error::InsufficientBalance { .. })));

        let balance = f.store.find_balance(user, f.usdc).unwrap().unwrap();
        assert_eq!(balance.available, dec!(10));
    }

    #[tokio::test]
    async fn test_fetch_or_create_persists_zero_balance() {
        let f = fixture();
        let user = Uuid::new_v4();

        let balance = f
            .store
            .fetch_or_create(user, Ticker::new("BTC"))
            .await
            .unwrap();
        assert_eq!(balance.total, dec!(0));

        let again = f
            .store
            .fetch_or_create(user, Ticker::new("BTC"))
            .await
            .unwrap();
        assert_eq!(again.id, balance.id);
    }

    #[tokio::test]
    async fn test_commit_settlement_all_or_nothing() {
        let f = fixture();
        let user = Uuid::new_v4();

        let order = ExchangeOrder::new(
            user,
            "pi_fail",
            Uuid::new_v4(),
            f.btc,
            Ticker::new("BTC"),
            dec!(50),
        );

        // Delta would overdraw the (empty) USDC balance
        let commit = SettlementCommit {
            order: order.clone(),
            precondition: None,
            deltas: vec![credit(user, f.usdc, "USDC", dec!(-50))],
            transaction: None,
            events: vec![DomainEvent::BalanceChanged {
                user_id: user,
                asset_id: f.usdc,
            }],
        };

        assert!(f.store.commit_settlement(commit).await.is_err());

        // Nothing from the scope is visible
        assert!(f.store.get_order(order.id).is_err());
        assert!(f.store.find_balance(user, f.usdc).unwrap().is_none());
        assert!(f
            .store
            .storage()
            .unprocessed_events(None, 10)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_commit_settlement_stamps_transaction() {
        let f = fixture();
        let user = Uuid::new_v4();

        let mut order = ExchangeOrder::new(
            user,
            "pi_ok",
            Uuid::new_v4(),
            f.btc,
            Ticker::new("BTC"),
            dec!(50),
        );
        order.status = OrderStatus::Filled;
        order.quote_quantity_filled = dec!(50);
        order.quote_quantity_dust = dec!(0);
        order.quantity = dec!(0.001);

        let txn = TransactionBuilder::new(
            user,
            TransactionAction::Buy,
            TransactionSource::new("exchange", "ex_1"),
        )
        .to_balance(user, f.btc, Ticker::new("BTC"), dec!(0.001))
        .build()
        .unwrap();

        let outcome = f
            .store
            .commit_settlement(SettlementCommit {
                order,
                precondition: None,
                deltas: vec![credit(user, f.btc, "BTC", dec!(0.001))],
                transaction: Some(txn),
                events: vec![DomainEvent::BalanceChanged {
                    user_id: user,
                    asset_id: f.btc,
                }],
            })
            .await
            .unwrap();

        let txn = outcome.transaction.unwrap();
        assert!(txn.is_confirmed);
        let entry = txn.to_balance.as_ref().unwrap();
        assert!(entry.balance_id.is_some());
        assert_eq!(entry.balance_before.unwrap().available, dec!(0));
        assert_eq!(entry.balance_after.unwrap().available, dec!(0.001));

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(f.store.transactions_for_user(user).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_order_snapshot_commits_once() {
        let f = fixture();
        let user = Uuid::new_v4();

        // Persist a pending order with nothing filled
        let mut order = ExchangeOrder::new(
            user,
            "pi_race",
            Uuid::new_v4(),
            f.btc,
            Ticker::new("BTC"),
            dec!(70),
        );
        order.status = OrderStatus::Pending;
        f.store
            .commit_settlement(SettlementCommit {
                order: order.clone(),
                precondition: None,
                deltas: vec![],
                transaction: None,
                events: vec![],
            })
            .await
            .unwrap();

        // Two writers read the same snapshot and both fold in a 70 fill
        let scope = |o: &ExchangeOrder| {
            let mut filled = o.clone();
            filled.status = OrderStatus::Filled;
            filled.quote_quantity_filled = dec!(70);
            filled.quote_quantity_dust = dec!(0);
            filled.quantity = dec!(70);
            SettlementCommit {
                order: filled,
                precondition: Some(OrderPrecondition {
                    status: OrderStatus::Pending,
                    quote_quantity_filled: dec!(0),
                }),
                deltas: vec![credit(user, f.btc, "BTC", dec!(70))],
                transaction: None,
                events: vec![],
            }
        };

        f.store.commit_settlement(scope(&order)).await.unwrap();
        let second = f.store.commit_settlement(scope(&order)).await;
        assert!(matches!(second, Err(Error::Concurrency(_))));

        // The losing scope credited nothing
        let balance = f.store.find_balance(user, f.btc).unwrap().unwrap();
        assert_eq!(balance.available, dec!(70));
    }

    #[tokio::test]
    async fn test_new_order_commit_is_exclusive() {
        let f = fixture();
        let user = Uuid::new_v4();

        let order = ExchangeOrder::new(
            user,
            "pi_twice",
            Uuid::new_v4(),
            f.btc,
            Ticker::new("BTC"),
            dec!(10),
        );
        let scope = || SettlementCommit {
            order: order.clone(),
            precondition: None,
            deltas: vec![],
            transaction: None,
            events: vec![],
        };

        f.store.commit_settlement(scope()).await.unwrap();
        let second = f.store.commit_settlement(scope()).await;
        assert!(matches!(second, Err(Error::Concurrency(_))));
    }

    #[tokio::test]
    async fn test_reversal_requires_confirmed_original() {
        let f = fixture();
        let user = Uuid::new_v4();

        let refund = TransactionBuilder::new(
            user,
            TransactionAction::Refund,
            TransactionSource::new("support", "case_7"),
        )
        .to_balance(user, f.usdc, Ticker::new("USDC"), dec!(5))
        .reversal_of(Uuid::new_v4())
        .build()
        .unwrap();

        let order = ExchangeOrder::new(
            user,
            "pi_refund",
            Uuid::new_v4(),
            f.usdc,
            Ticker::new("USDC"),
            dec!(5),
        );

        let result = f
            .store
            .commit_settlement(SettlementCommit {
                order,
                precondition: None,
                deltas: vec![credit(user, f.usdc, "USDC", dec!(5))],
                transaction: Some(refund),
                events: vec![],
            })
            .await;

        assert!(matches!(result, Err(Error::TransactionNotFound(_))));
    }
}
