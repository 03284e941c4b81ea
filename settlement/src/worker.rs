//! Payment event worker
//!
//! Subscribes to `payment.received` on the in-process bus and feeds each
//! delivery to the orchestrator. Handler errors are logged and dropped;
//! the outbox relay redelivers anything that was not acknowledged.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::orchestrator::SettlementOrchestrator;
use event_bus::EventBus;

/// Name of the event stream this worker consumes
pub const PAYMENT_RECEIVED: &str = "payment.received";

/// Supervised worker consuming payment events
pub struct PaymentWorker {
    orchestrator: Arc<SettlementOrchestrator>,
    bus: Arc<dyn EventBus>,
    shutdown: watch::Receiver<bool>,
}

impl PaymentWorker {
    /// Create the worker
    pub fn new(
        orchestrator: Arc<SettlementOrchestrator>,
        bus: Arc<dyn EventBus>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            bus,
            shutdown,
        }
    }

    /// Consume events until shutdown is signalled
    pub async fn run(mut self) {
        let mut rx = self.bus.subscribe(PAYMENT_RECEIVED);
        info!("Payment worker started");

        loop {
            tokio::select! {
                delivery = rx.recv() => {
                    match delivery {
                        Ok(record) => {
                            if let Err(e) = self.orchestrator.handle_event(&record).await {
                                warn!(event_id = %record.id, "Payment handling failed: {}", e);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            // Relay covers anything dropped from the channel
                            warn!(missed, "Payment worker lagged behind the bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            warn!("Payment channel closed");
                            break;
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Payment worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
