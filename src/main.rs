//! pointexd - point exchange daemon.

use pointex::config::{self, Config};
use pointex::exchange::Exchange;
use pointex::services::{spawn_backup_task, spawn_maintenance_task, spawn_reconcile_task};
use pointex::store::Store;
use pointex::{http, metrics, oracle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    info!(
        server = %config.server.name,
        backend = ?config.store.backend,
        oracle = ?config.oracle.provider,
        "Starting pointexd"
    );

    metrics::init();

    let store = Arc::new(Store::from_config(&config.store).await?);
    info!(backend = store.backend_name(), path = %config.store.path, "Store opened");

    let oracle = oracle::from_config(&config.oracle);
    let exchange = Arc::new(Exchange::new(config.clone(), Arc::clone(&store), oracle));
    let seeded = exchange.bootstrap().await?;
    info!(admins_seeded = seeded, "Exchange ready");

    // Log every emitted event.
    {
        let mut events = exchange.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => info!(kind = event.kind(), ?event, "event"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    spawn_reconcile_task(Arc::clone(&exchange), config.reconcile.clone());
    spawn_maintenance_task(Arc::clone(&exchange), config.channels.sweep_interval());
    spawn_backup_task(
        Arc::clone(&store),
        Duration::from_secs(config.store.backup_interval_secs),
    );
    info!("Background tasks started");

    // Metrics endpoint is optional.
    match config.server.metrics_port {
        Some(port) if port != 0 => {
            tokio::spawn(async move {
                http::run_http_server(port).await;
            });
        }
        _ => info!("Metrics endpoint disabled"),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, taking final snapshot");
    if let Err(e) = store.snapshot_all().await {
        error!(error = %e, "Final snapshot failed");
    }

    Ok(())
}
