//! Domain event envelope for the outbox

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound payment notification payload
///
/// Emitted by the payment gateway once a payment has been validated;
/// triggers the settlement orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceived {
    /// Platform user the payment belongs to
    pub user_id: Uuid,

    /// Subscription whose allocation plan applies
    pub subscription_id: Uuid,

    /// Payment provider reference (idempotency anchor)
    pub payment_provider_id: String,

    /// Settlement currency code
    pub currency: String,

    /// Net amount after provider fees
    pub net_amount: Decimal,
}

/// Settlement domain events
///
/// Payloads are references (entity ids, amounts), never full entity
/// snapshots; consumers re-read current state from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEvent {
    /// A validated inbound payment is ready for settlement
    PaymentReceived(PaymentReceived),

    /// The platform reserve cannot cover a payment; operators must fund it
    FundingRequested {
        /// Amount required to cover the payment
        amount: Decimal,
        /// Currency of the shortfall
        currency: String,
    },

    /// A balance was mutated by a confirmed transaction
    BalanceChanged {
        /// Owner of the balance
        user_id: Uuid,
        /// Asset whose balance changed
        asset_id: Uuid,
    },
}

impl DomainEvent {
    /// Event name used for routing and outbox queries
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::PaymentReceived(_) => "payment.received",
            DomainEvent::FundingRequested { .. } => "funding.requested",
            DomainEvent::BalanceChanged { .. } => "balance.changed",
        }
    }
}

/// Persisted event record (outbox row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Event name (routing key)
    pub name: String,

    /// JSON-serialized [`DomainEvent`]
    pub payload: String,

    /// Whether a consumer has acknowledged this event
    pub processed: bool,

    /// When the event was acknowledged
    pub processed_at: Option<DateTime<Utc>>,

    /// When the event was created
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Create a new unprocessed record from a domain event
    pub fn new(event: &DomainEvent) -> crate::Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            name: event.name().to_string(),
            payload: serde_json::to_string(event)?,
            processed: false,
            processed_at: None,
            created_at: Utc::now(),
        })
    }

    /// Decode the payload back into a domain event
    pub fn decode(&self) -> crate::Result<DomainEvent> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_record_round_trip() {
        let event = DomainEvent::FundingRequested {
            amount: dec!(100),
            currency: "USD".to_string(),
        };

        let record = EventRecord::new(&event).unwrap();
        assert_eq!(record.name, "funding.requested");
        assert!(!record.processed);

        let decoded = record.decode().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_payment_received_name() {
        let event = DomainEvent::PaymentReceived(PaymentReceived {
            user_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            payment_provider_id: "pi_123".to_string(),
            currency: "USD".to_string(),
            net_amount: dec!(50),
        });

        assert_eq!(event.name(), "payment.received");
    }
}
