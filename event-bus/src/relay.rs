//! Outbox relay: recovery sweep for unacknowledged events
//!
//! Events are persisted transactionally with the state change that
//! produced them, then handed to the in-process bus. If the handler
//! crashes or the process restarts before acknowledging, the relay
//! re-publishes the event on its next sweep. Consumers acknowledge via
//! [`OutboxStore::mark_processed`].

use crate::{bus::EventBus, event::EventRecord, metrics::OUTBOX_REDELIVERY_TOTAL, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Persistence interface for the outbox (implemented by the ledger)
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Fetch unprocessed events, optionally filtered by name, oldest first
    async fn unprocessed(&self, name: Option<&str>, limit: usize) -> Result<Vec<EventRecord>>;

    /// Acknowledge an event after its handler succeeded
    async fn mark_processed(&self, event_id: Uuid) -> Result<()>;
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Sweep interval
    pub interval: Duration,

    /// Minimum event age before redelivery, so freshly published events
    /// are not double-delivered to handlers that are still running
    pub min_age: Duration,

    /// Max events re-published per sweep
    pub batch_limit: usize,

    /// Event names with no acknowledging consumer; the relay marks
    /// these processed itself once a re-publish succeeds, so they stop
    /// occupying the oldest-first batch forever
    pub ack_after_publish: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            min_age: Duration::from_secs(60),
            batch_limit: 100,
            ack_after_publish: Vec::new(),
        }
    }
}

/// Supervised background worker that redelivers unacknowledged events
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    config: RelayConfig,
    shutdown: watch::Receiver<bool>,
}

impl OutboxRelay {
    /// Create a new relay
    pub fn new(
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn EventBus>,
        config: RelayConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            shutdown,
        }
    }

    /// Run the sweep loop until shutdown is signalled
    pub async fn run(mut self) {
        info!(interval = ?self.config.interval, "Starting outbox relay");

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(n) => info!(redelivered = n, "Outbox sweep complete"),
                        Err(e) => warn!("Outbox sweep failed: {}", e),
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Outbox relay shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Re-publish unprocessed events older than `min_age`; returns the count
    pub async fn sweep(&self) -> Result<usize> {
        let records = self
            .store
            .unprocessed(None, self.config.batch_limit)
            .await?;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.min_age)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut redelivered = 0;
        for record in records {
            if record.created_at > cutoff {
                debug!(event_id = %record.id, "Skipping young event");
                continue;
            }

            self.bus.publish(&record).await?;
            OUTBOX_REDELIVERY_TOTAL
                .with_label_values(&[&record.name])
                .inc();
            redelivered += 1;

            if self.config.ack_after_publish.contains(&record.name) {
                self.store.mark_processed(record.id).await?;
            }
        }

        Ok(redelivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::DomainEvent, InProcessBus};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct MemoryStore {
        records: Mutex<Vec<EventRecord>>,
    }

    #[async_trait]
    impl OutboxStore for MemoryStore {
        async fn unprocessed(
            &self,
            _name: Option<&str>,
            limit: usize,
        ) -> Result<Vec<EventRecord>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|r| !r.processed)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn mark_processed(&self, event_id: Uuid) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            for record in records.iter_mut() {
                if record.id == event_id {
                    record.processed = true;
                    record.processed_at = Some(Utc::now());
                }
            }
            Ok(())
        }
    }

    fn aged_record() -> EventRecord {
        let mut record = EventRecord::new(&DomainEvent::FundingRequested {
            amount: dec!(10),
            currency: "USD".to_string(),
        })
        .unwrap();
        record.created_at = Utc::now() - chrono::Duration::seconds(300);
        record
    }

    #[tokio::test]
    async fn test_sweep_redelivers_old_unprocessed() {
        let store = Arc::new(MemoryStore {
            records: Mutex::new(vec![aged_record()]),
        });
        let bus = Arc::new(InProcessBus::new());
        let mut rx = bus.subscribe("funding.requested");

        let (_tx, shutdown) = watch::channel(false);
        let relay = OutboxRelay::new(store, bus, RelayConfig::default(), shutdown);

        let redelivered = relay.sweep().await.unwrap();
        assert_eq!(redelivered, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_sweep_skips_young_events() {
        let record = EventRecord::new(&DomainEvent::FundingRequested {
            amount: dec!(10),
            currency: "USD".to_string(),
        })
        .unwrap();

        let store = Arc::new(MemoryStore {
            records: Mutex::new(vec![record]),
        });
        let bus = Arc::new(InProcessBus::new());

        let (_tx, shutdown) = watch::channel(false);
        let relay = OutboxRelay::new(store, bus, RelayConfig::default(), shutdown);

        assert_eq!(relay.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consumerless_names_acked_after_republish() {
        let store = Arc::new(MemoryStore {
            records: Mutex::new(vec![aged_record()]),
        });
        let bus = Arc::new(InProcessBus::new());

        let config = RelayConfig {
            ack_after_publish: vec!["funding.requested".to_string()],
            ..RelayConfig::default()
        };
        let (_tx, shutdown) = watch::channel(false);
        let relay = OutboxRelay::new(store.clone(), bus, config, shutdown);

        assert_eq!(relay.sweep().await.unwrap(), 1);
        assert!(store.records.lock().unwrap()[0].processed);

        // Gone from the batch instead of redelivering every sweep
        assert_eq!(relay.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_processed() {
        let store = Arc::new(MemoryStore {
            records: Mutex::new(vec![aged_record()]),
        });
        let bus = Arc::new(InProcessBus::new());

        let id = store.records.lock().unwrap()[0].id;
        store.mark_processed(id).await.unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let relay = OutboxRelay::new(store, bus, RelayConfig::default(), shutdown);

        assert_eq!(relay.sweep().await.unwrap(), 0);
    }
}
