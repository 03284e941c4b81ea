//! Core types for the settlement ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for quantities and prices)
//! - Invariant checking before any persisted write

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Asset ticker symbol (e.g. "BTC", "ETH")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticker(String);

impl Ticker {
    /// Create new ticker
    pub fn new(ticker: impl Into<String>) -> Self {
        Self(ticker.into().to_uppercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-user per-asset balance
///
/// Created lazily on the first credit for a (user, asset) pair; mutated
/// only through signed deltas applied by the ledger store; never deleted,
/// only driven to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Unique balance ID
    pub id: Uuid,

    /// Owner
    pub user_id: Uuid,

    /// Asset
    pub asset_id: Uuid,

    /// Asset ticker (denormalized for display/symbol building)
    pub ticker: Ticker,

    /// Spendable quantity (>= 0)
    pub available: Decimal,

    /// Quantity locked by pending operations (>= 0)
    pub locked: Decimal,

    /// Derived: always available + locked
    pub total: Decimal,

    /// Last transaction that touched this balance
    pub last_transaction_id: Option<Uuid>,

    /// Number of transactions applied
    pub transaction_count: u64,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Create a zero balance for a (user, asset) pair
    pub fn new(user_id: Uuid, asset_id: Uuid, ticker: Ticker) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            asset_id,
            ticker,
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            total: Decimal::ZERO,
            last_transaction_id: None,
            transaction_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Apply a signed delta, recomputing `total`
    ///
    /// Fails with `InsufficientBalance` before any field is mutated if
    /// either resulting field would be negative.
    pub fn apply(
        &mut self,
        delta: &BalanceDelta,
        transaction_id: Option<Uuid>,
    ) -> crate::Result<()> {
        let available = self.available + delta.available_delta;
        let locked = self.locked + delta.locked_delta;

        if available < Decimal::ZERO {
            return Err(crate::Error::InsufficientBalance {
                ticker: self.ticker.to_string(),
                required: -delta.available_delta,
                available: self.available,
            });
        }
        if locked < Decimal::ZERO {
            return Err(crate::Error::InsufficientBalance {
                ticker: self.ticker.to_string(),
                required: -delta.locked_delta,
                available: self.locked,
            });
        }

        self.available = available;
        self.locked = locked;
        self.total = available + locked;
        if transaction_id.is_some() {
            self.last_transaction_id = transaction_id;
        }
        self.transaction_count += 1;
        self.updated_at = Utc::now();

        Ok(())
    }

    /// Verify non-negativity and the total derivation
    pub fn check_invariants(&self) -> crate::Result<()> {
        if self.available < Decimal::ZERO || self.locked < Decimal::ZERO {
            return Err(crate::Error::InvariantViolation(format!(
                "Negative balance field for {}: available={} locked={}",
                self.ticker, self.available, self.locked
            )));
        }
        if self.total != self.available + self.locked {
            return Err(crate::Error::InvariantViolation(format!(
                "total {} != available {} + locked {} for {}",
                self.total, self.available, self.locked, self.ticker
            )));
        }
        Ok(())
    }

    /// Point-in-time snapshot for audit trails
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            available: self.available,
            locked: self.locked,
        }
    }
}

/// Explicit typed partial update for a balance
///
/// Both deltas are signed; the ledger store rejects any delta that would
/// drive a field negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    /// Owner
    pub user_id: Uuid,

    /// Asset
    pub asset_id: Uuid,

    /// Asset ticker (used when materializing a new balance row)
    pub ticker: Ticker,

    /// Signed change to `available`
    pub available_delta: Decimal,

    /// Signed change to `locked`
    pub locked_delta: Decimal,
}

impl BalanceDelta {
    /// Credit `quantity` to the available field
    pub fn credit_available(
        user_id: Uuid,
        asset_id: Uuid,
        ticker: Ticker,
        quantity: Decimal,
    ) -> Self {
        Self {
            user_id,
            asset_id,
            ticker,
            available_delta: quantity,
            locked_delta: Decimal::ZERO,
        }
    }
}

/// Which balance field(s) a transaction entry touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BalanceType {
    /// Available field only
    Available = 1,
    /// Locked field only
    Locked = 2,
    /// Move quantity from available into locked
    LockFromAvailable = 3,
    /// Move quantity from locked back into available
    UnlockToAvailable = 4,
}

impl BalanceType {
    /// Translate a signed quantity into (available_delta, locked_delta)
    pub fn deltas(&self, quantity: Decimal) -> (Decimal, Decimal) {
        match self {
            BalanceType::Available => (quantity, Decimal::ZERO),
            BalanceType::Locked => (Decimal::ZERO, quantity),
            BalanceType::LockFromAvailable => (-quantity, quantity),
            BalanceType::UnlockToAvailable => (quantity, -quantity),
        }
    }
}

/// (available, locked) snapshot of a balance around an entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Available quantity
    pub available: Decimal,
    /// Locked quantity
    pub locked: Decimal,
}

/// A single leg of a double-entry transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntry {
    /// Owner of the affected balance
    pub user_id: Uuid,

    /// Asset of the affected balance
    pub asset_id: Uuid,

    /// Asset ticker
    pub ticker: Ticker,

    /// Signed quantity (From entries negative, To/Fee positive)
    pub quantity: Decimal,

    /// Field(s) of the balance this entry moves
    pub balance_type: BalanceType,

    /// Affected balance row, stamped at commit
    pub balance_id: Option<Uuid>,

    /// Balance before the entry was applied
    pub balance_before: Option<BalanceSnapshot>,

    /// Balance after the entry was applied
    pub balance_after: Option<BalanceSnapshot>,
}

impl TransactionEntry {
    /// Create an entry with no snapshots (stamped at commit)
    pub fn new(
        user_id: Uuid,
        asset_id: Uuid,
        ticker: Ticker,
        quantity: Decimal,
        balance_type: BalanceType,
    ) -> Self {
        Self {
            user_id,
            asset_id,
            ticker,
            quantity,
            balance_type,
            balance_id: None,
            balance_before: None,
            balance_after: None,
        }
    }
}

/// Business action a transaction records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionAction {
    /// Funds credited from an external source
    Deposit = 1,
    /// Asset purchase
    Buy = 2,
    /// Asset sale
    Sell = 3,
    /// Fee charge
    Fee = 4,
    /// Internal transfer
    Transfer = 5,
    /// Funds withdrawn to an external destination
    Withdrawal = 6,
    /// Reserve funds for a pending operation
    Lock = 7,
    /// Release previously locked funds
    Unlock = 8,
    /// Reversal of an earlier confirmed transaction
    Refund = 9,
}

/// Where a transaction originated (e.g. exchange + order id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSource {
    /// Originating system name
    pub name: String,

    /// External reference within that system
    pub external_id: String,
}

impl TransactionSource {
    /// Create new source
    pub fn new(name: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: external_id.into(),
        }
    }
}

/// Immutable double-entry transaction record
///
/// At most four legs: from, to, fee, rounding. Fee and rounding legs are
/// excluded from the per-asset balance check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID, immutable once confirmed
    pub id: Uuid,

    /// User this transaction belongs to
    pub user_id: Uuid,

    /// Business action
    pub action: TransactionAction,

    /// Originating system reference
    pub source: TransactionSource,

    /// Debit leg (negative quantity)
    pub from_balance: Option<TransactionEntry>,

    /// Credit leg (positive quantity)
    pub to_balance: Option<TransactionEntry>,

    /// Fee leg (positive quantity, excluded from balance check)
    pub fee: Option<TransactionEntry>,

    /// Rounding leg (signed as given, excluded from balance check)
    pub rounding: Option<TransactionEntry>,

    /// Whether this transaction has been committed to the ledger
    pub is_confirmed: bool,

    /// Commit timestamp
    pub confirmed_at: Option<DateTime<Utc>>,

    /// For refunds: the earlier confirmed transaction being reversed
    pub reversal_of_transaction_id: Option<Uuid>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Iterate over present legs
    pub fn entries(&self) -> impl Iterator<Item = &TransactionEntry> {
        self.from_balance
            .iter()
            .chain(self.to_balance.iter())
            .chain(self.fee.iter())
            .chain(self.rounding.iter())
    }

    /// Iterate mutably over present legs
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut TransactionEntry> {
        self.from_balance
            .iter_mut()
            .chain(self.to_balance.iter_mut())
            .chain(self.fee.iter_mut())
            .chain(self.rounding.iter_mut())
    }

    /// Structural validation
    ///
    /// At least one leg must be present; quantities are non-zero except
    /// for the rounding leg; for any asset carrying both a From and a To
    /// leg, the signed quantities must cancel exactly. Assets carrying a
    /// single leg are funded externally (deposits, buys settled against
    /// the platform reserve) and are exempt.
    pub fn validate(&self) -> crate::Result<()> {
        if self.from_balance.is_none()
            && self.to_balance.is_none()
            && self.fee.is_none()
            && self.rounding.is_none()
        {
            return Err(crate::Error::Validation(
                "Transaction requires at least one entry".to_string(),
            ));
        }

        for entry in self.entries() {
            if entry.user_id.is_nil() || entry.asset_id.is_nil() {
                return Err(crate::Error::Validation(
                    "Entry user and asset ids must be set".to_string(),
                ));
            }
        }

        if let Some(from) = &self.from_balance {
            if from.quantity.is_zero() {
                return Err(crate::Error::Validation(
                    "From entry quantity must be non-zero".to_string(),
                ));
            }
        }
        if let Some(to) = &self.to_balance {
            if to.quantity.is_zero() {
                return Err(crate::Error::Validation(
                    "To entry quantity must be non-zero".to_string(),
                ));
            }
        }
        if let Some(fee) = &self.fee {
            if fee.quantity.is_zero() {
                return Err(crate::Error::Validation(
                    "Fee entry quantity must be non-zero".to_string(),
                ));
            }
        }

        // Per-asset balance check over the from/to legs only
        if let (Some(from), Some(to)) = (&self.from_balance, &self.to_balance) {
            if from.asset_id == to.asset_id && from.quantity + to.quantity != Decimal::ZERO {
                return Err(crate::Error::InvariantViolation(format!(
                    "Entries for asset {} do not balance: {} + {}",
                    from.ticker, from.quantity, to.quantity
                )));
            }
        }

        Ok(())
    }
}

/// Exchange order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderStatus {
    /// Created, not yet submitted to the exchange
    Queued = 1,
    /// Submitted, awaiting a terminal outcome
    Pending = 2,
    /// Fully filled (terminal)
    Filled = 3,
    /// Partially filled; remainder chained to a successor (terminal)
    PartiallyFilled = 4,
    /// Failed; retried via a successor while under the cap (terminal)
    Failed = 5,
}

impl OrderStatus {
    /// Status byte used in secondary index keys
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Whether the reconciliation sweep still tracks this status
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Queued | OrderStatus::Pending)
    }
}

/// An order placed (or queued for placement) on the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    /// Unique order ID
    pub id: Uuid,

    /// Exchange-assigned order id, set once submitted
    pub placed_order_id: Option<String>,

    /// Retry chain: the order this one supersedes (never cyclic, ends at
    /// a first attempt with None)
    pub previous_order_id: Option<Uuid>,

    /// Owner
    pub user_id: Uuid,

    /// Payment provider reference shared by every order of one payment
    pub payment_provider_id: String,

    /// Subscription whose allocation plan produced this order
    pub subscription_id: Uuid,

    /// Asset being purchased
    pub asset_id: Uuid,

    /// Asset ticker
    pub ticker: Ticker,

    /// Quote-denominated amount requested
    pub quote_quantity: Decimal,

    /// Quote-denominated amount actually filled (cumulative)
    pub quote_quantity_filled: Decimal,

    /// Residual: quote_quantity - quote_quantity_filled
    pub quote_quantity_dust: Decimal,

    /// Base-denominated quantity filled (cumulative)
    pub quantity: Decimal,

    /// Execution price
    pub price: Decimal,

    /// Lifecycle status
    pub status: OrderStatus,

    /// Position in the retry chain (0 for a first attempt)
    pub retry_count: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl ExchangeOrder {
    /// Create a queued first-attempt order
    pub fn new(
        user_id: Uuid,
        payment_provider_id: impl Into<String>,
        subscription_id: Uuid,
        asset_id: Uuid,
        ticker: Ticker,
        quote_quantity: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            placed_order_id: None,
            previous_order_id: None,
            user_id,
            payment_provider_id: payment_provider_id.into(),
            subscription_id,
            asset_id,
            ticker,
            quote_quantity,
            quote_quantity_filled: Decimal::ZERO,
            quote_quantity_dust: quote_quantity,
            quantity: Decimal::ZERO,
            price: Decimal::ZERO,
            status: OrderStatus::Queued,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the queued successor that retries the unfilled remainder
    ///
    /// The successor id is derived from the parent id, so two sweeps
    /// spawning the same retry produce the same record and the second
    /// insert is rejected instead of doubling the remainder.
    pub fn successor(&self, remaining: Decimal) -> Self {
        let mut next = Self::new(
            self.user_id,
            self.payment_provider_id.clone(),
            self.subscription_id,
            self.asset_id,
            self.ticker.clone(),
            remaining,
        );
        next.id = Uuid::new_v5(&self.id, b"retry");
        next.previous_order_id = Some(self.id);
        next.retry_count = self.retry_count + 1;
        next
    }
}

/// Cached result of an idempotent operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Caller-chosen unique key
    pub key: String,

    /// JSON-serialized operation result
    pub result: String,

    /// When the result was stored
    pub created_at: DateTime<Utc>,

    /// TTL-driven expiry
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether the record is still live
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
