//! Settlement service binary
//!
//! Wires the ledger, event bus, orchestrator and background workers for a
//! single-node deployment. Runs against the in-memory venue until a real
//! exchange adapter is configured.

use std::sync::Arc;

use event_bus::{InProcessBus, OutboxRelay, RelayConfig};
use ledger_core::{Config, LedgerStore, StaticAssetCatalog};
use settlement::{
    MockExchange, PaymentWorker, ReconciliationLoop, SettlementConfig, SettlementOrchestrator,
    StaticAllocationProvider,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Strata settlement service");

    let ledger_config = Config::from_env()?;
    let settlement_config = SettlementConfig::from_env()?;

    let catalog = Arc::new(StaticAssetCatalog::new());
    catalog.insert(uuid::Uuid::new_v4(), settlement_config.reserve());

    let ledger = LedgerStore::open(&ledger_config, catalog)?;
    let bus = Arc::new(InProcessBus::new());
    let exchange = Arc::new(
        MockExchange::new().with_reserve(settlement_config.reserve(), rust_decimal::Decimal::ZERO),
    );
    let allocations = Arc::new(StaticAllocationProvider::new());

    let orchestrator = Arc::new(SettlementOrchestrator::new(
        ledger.clone(),
        exchange,
        allocations,
        bus.clone(),
        settlement_config,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Notifications have no acking consumer; the relay owns their ack
    let relay_config = RelayConfig {
        ack_after_publish: vec![
            "funding.requested".to_string(),
            "balance.changed".to_string(),
        ],
        ..RelayConfig::default()
    };
    let relay = OutboxRelay::new(
        Arc::new(ledger.clone()),
        bus.clone(),
        relay_config,
        shutdown_rx.clone(),
    );
    let worker = PaymentWorker::new(orchestrator.clone(), bus, shutdown_rx.clone());
    let reconciliation = ReconciliationLoop::new(orchestrator, shutdown_rx);

    let relay_task = tokio::spawn(relay.run());
    let worker_task = tokio::spawn(worker.run());
    let reconciliation_task = tokio::spawn(reconciliation.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down settlement service");

    shutdown_tx.send(true)?;
    let _ = tokio::join!(relay_task, worker_task, reconciliation_task);
    ledger.shutdown().await;

    Ok(())
}
