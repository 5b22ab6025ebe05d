//! bdix-probe - BDIX server reachability checker
//!
//! Probes catalogs of BDIX (Bangladesh Internet Exchange) hosts with a
//! bounded worker pool and serves results and history over HTTP.

mod catalog;
mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::{ServerConfig, TransportKind};
use db::Store;
use probe::{HttpTransport, TcpTransport, Transport};
use scheduler::{BatchScheduler, HistoryPruner, Monitor};
use web::{AppState, Server};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("bdix_probe=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting bdix-probe on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    let servers = match &cfg.catalog_path {
        Some(path) => {
            let servers = catalog::load_catalog(path)?;
            tracing::info!("Loaded {} servers from {}", servers.len(), path);
            servers
        }
        None => catalog::default_catalog(),
    };

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let http = HttpTransport::new()?;
    let transport: Arc<dyn Transport> = match cfg.transport {
        TransportKind::Http => Arc::new(http.clone()),
        TransportKind::Tcp => Arc::new(TcpTransport),
    };
    tracing::info!(
        "Probing with {:?} transport, {:?} policy, {:?} timeout, {} in flight",
        cfg.transport,
        cfg.policy,
        cfg.timeout,
        cfg.concurrency_limit
    );
    let scheduler = BatchScheduler::new(transport, cfg.batch_options());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                return;
            }
            tracing::info!("Shutting down...");
            shutdown.cancel();
        });
    }

    HistoryPruner::new(store.clone(), cfg.history).start(shutdown.clone());

    if !cfg.monitor_interval.is_zero() {
        Monitor::new(
            scheduler.clone(),
            store.clone(),
            catalog::flatten(&servers),
            cfg.monitor_interval,
        )
        .start(shutdown.clone());
    }

    let state = AppState {
        store,
        scheduler,
        catalog: Arc::new(servers),
        http: http.client().clone(),
        shutdown,
    };

    // Start web server
    let server = Server::new(cfg, state);
    server.start().await?;

    Ok(())
}
