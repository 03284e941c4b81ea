//! Prometheus metrics for the event bus

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

lazy_static! {
    /// Total events published to the in-process bus
    pub static ref EVENT_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "event_bus_publish_total",
        "Total events published",
        &["event", "status"]
    )
    .unwrap();

    /// Total events redelivered by the outbox relay
    pub static ref OUTBOX_REDELIVERY_TOTAL: CounterVec = register_counter_vec!(
        "event_bus_outbox_redelivery_total",
        "Total events redelivered by the outbox relay",
        &["event"]
    )
    .unwrap();
}
