// price_monitor/src/main.rs
mod api;
mod config;
mod service;
mod spot_poller;
mod storage;
mod webhook;
mod ws_client;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::config::CONFIG;
use crate::service::MonitorService;
use crate::spot_poller::SpotPoller;
use crate::storage::SnapshotStore;
use crate::webhook::WebhookDispatcher;
use crate::ws_client::OptionStream;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = %env!("CARGO_PKG_VERSION"), "📈 Starting option price monitor...");
    info!("WebSocket: {}", CONFIG.ws_url);
    info!("Max tasks: {}", CONFIG.max_tasks);
    info!("Spot poll interval: {}s", CONFIG.spot_poll_interval_secs);

    let (price_tx, price_rx) = mpsc::channel(1024);
    let (subscriptions_tx, subscriptions_rx) = mpsc::unbounded_channel();
    let (spot_symbols_tx, spot_symbols_rx) = watch::channel(HashSet::new());
    let ws_connected = Arc::new(AtomicBool::new(false));
    let ws_stopped = Arc::new(AtomicBool::new(false));

    let snapshot = SnapshotStore::new(&CONFIG.data_dir)?;
    let service = Arc::new(MonitorService::new(
        snapshot,
        subscriptions_tx,
        spot_symbols_tx,
        WebhookDispatcher::new(CONFIG.webhook_timeout_secs),
        ws_connected.clone(),
        ws_stopped.clone(),
        CONFIG.max_tasks,
    ));

    service.persist_snapshot().await;

    let option_stream = OptionStream::new(
        price_tx.clone(),
        subscriptions_rx,
        ws_connected,
        ws_stopped,
    );
    tokio::spawn(option_stream.run());
    tokio::spawn(SpotPoller::new(price_tx, spot_symbols_rx).run());
    tokio::spawn(service.clone().run_price_loop(price_rx));
    tokio::spawn(
        service
            .clone()
            .run_expiry_sweep(CONFIG.expiry_sweep_interval_secs),
    );

    let app = api::router(service);
    let addr = format!("{}:{}", CONFIG.host, CONFIG.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Monitor API listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
