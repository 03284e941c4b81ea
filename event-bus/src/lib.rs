//! Event Bus with transactional outbox support
//!
//! Provides in-process pub/sub messaging for settlement domain events:
//! - Typed event envelopes with serialized reference payloads
//! - Broadcast channels per event name
//! - Outbox relay for at-least-once redelivery after crashes
//! - Observability via Prometheus metrics
//!
//! Events are persisted by the ledger in the same atomic write as the
//! state change they announce (outbox pattern); this crate only defines
//! the envelope, the in-process bus, and the recovery sweep. Consumers
//! must be idempotent because redelivery is at-least-once.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod bus;
pub mod error;
pub mod event;
pub mod metrics;
pub mod relay;

pub use bus::{EventBus, InProcessBus};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventRecord, PaymentReceived};
pub use relay::{OutboxRelay, OutboxStore, RelayConfig};
