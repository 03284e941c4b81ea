//! Typed in-process event bus

use crate::{
    event::EventRecord,
    metrics::EVENT_PUBLISH_TOTAL,
    Result,
};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Default per-event channel capacity
const DEFAULT_CAPACITY: usize = 256;

/// Typed event bus interface
///
/// Publish/subscribe by event name, decoupled from any particular
/// in-process framework. Delivery is at-least-once: the outbox relay
/// republishes unacknowledged events, so consumers must be idempotent.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event record to all subscribers of its name
    async fn publish(&self, record: &EventRecord) -> Result<()>;

    /// Subscribe to events with the given name
    fn subscribe(&self, name: &str) -> broadcast::Receiver<EventRecord>;
}

/// In-process bus backed by per-name broadcast channels
pub struct InProcessBus {
    channels: DashMap<String, broadcast::Sender<EventRecord>>,
    capacity: usize,
}

impl InProcessBus {
    /// Create a bus with the default channel capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit per-channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, name: &str) -> broadcast::Sender<EventRecord> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, record: &EventRecord) -> Result<()> {
        let sender = self.sender(&record.name);

        // No live subscribers is fine: the record is already persisted in
        // the outbox and the relay will redeliver once a consumer attaches.
        match sender.send(record.clone()) {
            Ok(receivers) => {
                debug!(
                    event_id = %record.id,
                    name = %record.name,
                    receivers,
                    "Event published"
                );
                EVENT_PUBLISH_TOTAL
                    .with_label_values(&[&record.name, "success"])
                    .inc();
            }
            Err(_) => {
                debug!(
                    event_id = %record.id,
                    name = %record.name,
                    "Event published with no subscribers"
                );
                EVENT_PUBLISH_TOTAL
                    .with_label_values(&[&record.name, "no_subscribers"])
                    .inc();
            }
        }

        Ok(())
    }

    fn subscribe(&self, name: &str) -> broadcast::Receiver<EventRecord> {
        self.sender(name).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DomainEvent;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn funding_event() -> EventRecord {
        EventRecord::new(&DomainEvent::FundingRequested {
            amount: dec!(42),
            currency: "USD".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = InProcessBus::new();
        let mut rx = bus.subscribe("funding.requested");

        let record = funding_event();
        bus.publish(&record).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, record.id);
        assert_eq!(received.name, "funding.requested");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = InProcessBus::new();
        // Must not error: outbox relay covers redelivery
        bus.publish(&funding_event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribers_are_name_scoped() {
        let bus = InProcessBus::new();
        let mut other = bus.subscribe("balance.changed");

        bus.publish(&funding_event()).await.unwrap();

        let event = DomainEvent::BalanceChanged {
            user_id: Uuid::new_v4(),
            asset_id: Uuid::new_v4(),
        };
        let record = EventRecord::new(&event).unwrap();
        bus.publish(&record).await.unwrap();

        // Only the balance.changed record arrives on this channel
        let received = other.recv().await.unwrap();
        assert_eq!(received.id, record.id);
    }
}
