//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `balances` - Balance documents (key: balance_id)
//! - `transactions` - Immutable transaction log (key: transaction_id)
//! - `orders` - Exchange orders (key: order_id)
//! - `idempotency` - Cached operation results (key: idempotency key)
//! - `events` - Outbox event records (key: event_id)
//! - `indices` - Secondary indices for fast lookups
//!
//! Multi-record writes go through [`StagedWrite`], a thin wrapper over a
//! RocksDB `WriteBatch`: everything staged into one `StagedWrite` commits
//! in a single atomic write or not at all.

use crate::{
    error::{Error, Result},
    types::{Balance, ExchangeOrder, IdempotencyRecord, OrderStatus, Transaction},
    Config,
};
use event_bus::EventRecord;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_BALANCES: &str = "balances";
const CF_TRANSACTIONS: &str = "transactions";
const CF_ORDERS: &str = "orders";
const CF_IDEMPOTENCY: &str = "idempotency";
const CF_EVENTS: &str = "events";
const CF_INDICES: &str = "indices";

/// Index key prefixes within CF_INDICES
const IDX_BALANCE: &[u8] = b"bal|";
const IDX_USER_TXN: &[u8] = b"utx|";
const IDX_ORDER_PROVIDER: &[u8] = b"opp|";
const IDX_ORDER_STATUS: &[u8] = b"ost|";
const IDX_EVENT_PROCESSED: &[u8] = b"evp|";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_archive()),
            ColumnFamilyDescriptor::new(CF_ORDERS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_archive()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened ledger RocksDB");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Frequently read, LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_archive() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Balance operations

    /// Get balance by ID
    pub fn get_balance(&self, balance_id: Uuid) -> Result<Balance> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let value = self
            .db
            .get_cf(cf, balance_id.as_bytes())?
            .ok_or_else(|| Error::BalanceNotFound(balance_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Find the balance for a (user, asset) pair via index
    pub fn find_balance(&self, user_id: Uuid, asset_id: Uuid) -> Result<Option<Balance>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key_balance(user_id, asset_id);

        match self.db.get_cf(cf, &key)? {
            Some(value) => {
                let balance_id = Self::uuid_from_value(&value)?;
                Ok(Some(self.get_balance(balance_id)?))
            }
            None => Ok(None),
        }
    }

    // Transaction operations

    /// Get transaction by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(cf, transaction_id.as_bytes())?
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// List transactions for a user (index scan)
    pub fn transactions_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        let mut prefix = IDX_USER_TXN.to_vec();
        prefix.extend_from_slice(user_id.as_bytes());

        let mut transactions = Vec::new();
        for key in self.scan_index(&prefix)? {
            let transaction_id = Self::uuid_from_key_suffix(&key)?;
            transactions.push(self.get_transaction(transaction_id)?);
        }
        Ok(transactions)
    }

    // Order operations

    /// Get order by ID
    pub fn get_order(&self, order_id: Uuid) -> Result<ExchangeOrder> {
        let cf = self.cf_handle(CF_ORDERS)?;
        let value = self
            .db
            .get_cf(cf, order_id.as_bytes())?
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// List orders in a given status (index scan)
    pub fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<ExchangeOrder>> {
        let mut prefix = IDX_ORDER_STATUS.to_vec();
        prefix.push(status.as_byte());

        let mut orders = Vec::new();
        for key in self.scan_index(&prefix)? {
            let order_id = Self::uuid_from_key_suffix(&key)?;
            orders.push(self.get_order(order_id)?);
        }
        Ok(orders)
    }

    /// List every order created for one payment (index scan)
    pub fn orders_by_payment_provider(&self, payment_provider_id: &str) -> Result<Vec<ExchangeOrder>> {
        let mut prefix = IDX_ORDER_PROVIDER.to_vec();
        prefix.extend_from_slice(payment_provider_id.as_bytes());
        prefix.push(b'|');

        let mut orders = Vec::new();
        for key in self.scan_index(&prefix)? {
            let order_id = Self::uuid_from_key_suffix(&key)?;
            orders.push(self.get_order(order_id)?);
        }
        Ok(orders)
    }

    // Idempotency operations

    /// Get cached idempotency record
    pub fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Store idempotency record
    pub fn put_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        let value = bincode::serialize(record)?;
        self.db.put_cf(cf, record.key.as_bytes(), &value)?;
        Ok(())
    }

    /// Remove an (expired) idempotency record
    pub fn delete_idempotency(&self, key: &str) -> Result<()> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        self.db.delete_cf(cf, key.as_bytes())?;
        Ok(())
    }

    // Event (outbox) operations

    /// Get event by ID
    pub fn get_event(&self, event_id: Uuid) -> Result<EventRecord> {
        let cf = self.cf_handle(CF_EVENTS)?;
        let value = self
            .db
            .get_cf(cf, event_id.as_bytes())?
            .ok_or_else(|| Error::EventNotFound(event_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// List unprocessed events, oldest first (v7 ids sort by time)
    pub fn unprocessed_events(&self, name: Option<&str>, limit: usize) -> Result<Vec<EventRecord>> {
        let mut prefix = IDX_EVENT_PROCESSED.to_vec();
        prefix.push(0u8);

        let mut events = Vec::new();
        for key in self.scan_index(&prefix)? {
            let event_id = Self::uuid_from_key_suffix(&key)?;
            let event = self.get_event(event_id)?;
            if let Some(name) = name {
                if event.name != name {
                    continue;
                }
            }
            events.push(event);
            if events.len() >= limit {
                break;
            }
        }
        Ok(events)
    }

    /// Flip an event to processed, moving its index entry
    ///
    /// Idempotent: marking an already-processed event is a no-op.
    pub fn mark_event_processed(&self, event_id: Uuid) -> Result<()> {
        let mut event = self.get_event(event_id)?;
        if event.processed {
            return Ok(());
        }
        event.processed = true;
        event.processed_at = Some(chrono::Utc::now());

        let mut staged = StagedWrite::new();
        staged.stage_event_processed(self, &event)?;
        self.commit(staged)
    }

    // Staged (atomic) writes

    /// Commit a staged write atomically
    pub fn commit(&self, staged: StagedWrite) -> Result<()> {
        self.db.write(staged.batch)?;
        Ok(())
    }

    // Index key helpers

    fn index_key_balance(user_id: Uuid, asset_id: Uuid) -> Vec<u8> {
        let mut key = IDX_BALANCE.to_vec();
        key.extend_from_slice(user_id.as_bytes());
        key.extend_from_slice(asset_id.as_bytes());
        key
    }

    fn index_key_user_txn(user_id: Uuid, transaction_id: Uuid) -> Vec<u8> {
        let mut key = IDX_USER_TXN.to_vec();
        key.extend_from_slice(user_id.as_bytes());
        key.extend_from_slice(transaction_id.as_bytes());
        key
    }

    fn index_key_order_provider(payment_provider_id: &str, order_id: Uuid) -> Vec<u8> {
        let mut key = IDX_ORDER_PROVIDER.to_vec();
        key.extend_from_slice(payment_provider_id.as_bytes());
        key.push(b'|');
        key.extend_from_slice(order_id.as_bytes());
        key
    }

    fn index_key_order_status(status: OrderStatus, order_id: Uuid) -> Vec<u8> {
        let mut key = IDX_ORDER_STATUS.to_vec();
        key.push(status.as_byte());
        key.extend_from_slice(order_id.as_bytes());
        key
    }

    fn index_key_event_processed(processed: bool, event_id: Uuid) -> Vec<u8> {
        let mut key = IDX_EVENT_PROCESSED.to_vec();
        key.push(processed as u8);
        key.extend_from_slice(event_id.as_bytes());
        key
    }

    /// Collect all index keys under a prefix
    fn scan_index(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, rocksdb::Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Trailing 16 bytes of an index key are always a UUID
    fn uuid_from_key_suffix(key: &[u8]) -> Result<Uuid> {
        if key.len() < 16 {
            return Err(Error::Storage("Index key too short".to_string()));
        }
        let bytes: [u8; 16] = key[key.len() - 16..]
            .try_into()
            .map_err(|_| Error::Storage("Malformed index key".to_string()))?;
        Ok(Uuid::from_bytes(bytes))
    }

    fn uuid_from_value(value: &[u8]) -> Result<Uuid> {
        let bytes: [u8; 16] = value
            .try_into()
            .map_err(|_| Error::Storage("Malformed index value".to_string()))?;
        Ok(Uuid::from_bytes(bytes))
    }
}

/// All-or-nothing multi-record write
///
/// Staging only serializes and queues; nothing is visible until
/// [`Storage::commit`] writes the underlying batch.
#[derive(Default)]
pub struct StagedWrite {
    batch: WriteBatch,
}

impl StagedWrite {
    /// Create empty staged write
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a balance document plus its (user, asset) index entry
    pub fn stage_balance(&mut self, storage: &Storage, balance: &Balance) -> Result<()> {
        let cf = storage.cf_handle(CF_BALANCES)?;
        let value = bincode::serialize(balance)?;
        self.batch.put_cf(cf, balance.id.as_bytes(), &value);

        let cf_indices = storage.cf_handle(CF_INDICES)?;
        let idx = Storage::index_key_balance(balance.user_id, balance.asset_id);
        self.batch.put_cf(cf_indices, &idx, balance.id.as_bytes());

        Ok(())
    }

    /// Stage a transaction plus its user index entry
    pub fn stage_transaction(&mut self, storage: &Storage, transaction: &Transaction) -> Result<()> {
        let cf = storage.cf_handle(CF_TRANSACTIONS)?;
        let value = bincode::serialize(transaction)?;
        self.batch.put_cf(cf, transaction.id.as_bytes(), &value);

        let cf_indices = storage.cf_handle(CF_INDICES)?;
        let idx = Storage::index_key_user_txn(transaction.user_id, transaction.id);
        self.batch.put_cf(cf_indices, &idx, &[]);

        Ok(())
    }

    /// Stage an order; moves the status index entry when the status changed
    pub fn stage_order(
        &mut self,
        storage: &Storage,
        order: &ExchangeOrder,
        old_status: Option<OrderStatus>,
    ) -> Result<()> {
        let cf = storage.cf_handle(CF_ORDERS)?;
        let value = bincode::serialize(order)?;
        self.batch.put_cf(cf, order.id.as_bytes(), &value);

        let cf_indices = storage.cf_handle(CF_INDICES)?;

        if let Some(old) = old_status {
            if old != order.status {
                let old_idx = Storage::index_key_order_status(old, order.id);
                self.batch.delete_cf(cf_indices, &old_idx);
            }
        } else {
            // New order: also index by payment provider
            let provider_idx =
                Storage::index_key_order_provider(&order.payment_provider_id, order.id);
            self.batch.put_cf(cf_indices, &provider_idx, &[]);
        }

        let status_idx = Storage::index_key_order_status(order.status, order.id);
        self.batch.put_cf(cf_indices, &status_idx, &[]);

        Ok(())
    }

    /// Stage an outbox event plus its unprocessed index entry
    pub fn stage_event(&mut self, storage: &Storage, event: &EventRecord) -> Result<()> {
        let cf = storage.cf_handle(CF_EVENTS)?;
        let value = bincode::serialize(event)?;
        self.batch.put_cf(cf, event.id.as_bytes(), &value);

        let cf_indices = storage.cf_handle(CF_INDICES)?;
        let idx = Storage::index_key_event_processed(event.processed, event.id);
        self.batch.put_cf(cf_indices, &idx, &[]);

        Ok(())
    }

    /// Stage the processed flip for an event (record + index move)
    pub fn stage_event_processed(&mut self, storage: &Storage, event: &EventRecord) -> Result<()> {
        let cf = storage.cf_handle(CF_EVENTS)?;
        let value = bincode::serialize(event)?;
        self.batch.put_cf(cf, event.id.as_bytes(), &value);

        let cf_indices = storage.cf_handle(CF_INDICES)?;
        let unprocessed_idx = Storage::index_key_event_processed(false, event.id);
        self.batch.delete_cf(cf_indices, &unprocessed_idx);
        let processed_idx = Storage::index_key_event_processed(true, event.id);
        self.batch.put_cf(cf_indices, &processed_idx, &[]);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ticker;
    use event_bus::DomainEvent;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp)
    }

    #[test]
    fn test_balance_roundtrip_with_index() {
        let (storage, _temp) = test_storage();

        let mut balance = Balance::new(Uuid::new_v4(), Uuid::new_v4(), Ticker::new("BTC"));
        balance.available = dec!(2.5);
        balance.total = dec!(2.5);

        let mut staged = StagedWrite::new();
        staged.stage_balance(&storage, &balance).unwrap();
        storage.commit(staged).unwrap();

        let loaded = storage.get_balance(balance.id).unwrap();
        assert_eq!(loaded.available, dec!(2.5));

        let found = storage
            .find_balance(balance.user_id, balance.asset_id)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, balance.id);

        assert!(storage
            .find_balance(Uuid::new_v4(), balance.asset_id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_order_status_index_moves() {
        let (storage, _temp) = test_storage();

        let mut order = ExchangeOrder::new(
            Uuid::new_v4(),
            "pi_42",
            Uuid::new_v4(),
            Uuid::new_v4(),
            Ticker::new("ETH"),
            dec!(50),
        );

        let mut staged = StagedWrite::new();
        staged.stage_order(&storage, &order, None).unwrap();
        storage.commit(staged).unwrap();

        assert_eq!(storage.orders_by_status(OrderStatus::Queued).unwrap().len(), 1);

        let old = order.status;
        order.status = OrderStatus::Pending;
        let mut staged = StagedWrite::new();
        staged.stage_order(&storage, &order, Some(old)).unwrap();
        storage.commit(staged).unwrap();

        assert!(storage.orders_by_status(OrderStatus::Queued).unwrap().is_empty());
        assert_eq!(
            storage.orders_by_status(OrderStatus::Pending).unwrap().len(),
            1
        );
        assert_eq!(
            storage.orders_by_payment_provider("pi_42").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_event_processed_flip_is_idempotent() {
        let (storage, _temp) = test_storage();

        let event = EventRecord::new(&DomainEvent::FundingRequested {
            amount: dec!(10),
            currency: "USDC".to_string(),
        })
        .unwrap();

        let mut staged = StagedWrite::new();
        staged.stage_event(&storage, &event).unwrap();
        storage.commit(staged).unwrap();

        assert_eq!(storage.unprocessed_events(None, 10).unwrap().len(), 1);

        storage.mark_event_processed(event.id).unwrap();
        storage.mark_event_processed(event.id).unwrap();

        assert!(storage.unprocessed_events(None, 10).unwrap().is_empty());
        assert!(storage.get_event(event.id).unwrap().processed);
    }

    #[test]
    fn test_idempotency_roundtrip() {
        let (storage, _temp) = test_storage();

        let record = IdempotencyRecord {
            key: "settle:pi_1".to_string(),
            result: "{\"ok\":true}".to_string(),
            created_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(24),
        };

        storage.put_idempotency(&record).unwrap();
        let loaded = storage.get_idempotency("settle:pi_1").unwrap().unwrap();
        assert_eq!(loaded.result, record.result);

        storage.delete_idempotency("settle:pi_1").unwrap();
        assert!(storage.get_idempotency("settle:pi_1").unwrap().is_none());
    }
}
