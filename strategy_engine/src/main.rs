// strategy_engine/src/main.rs
mod api;
mod bybit;
mod config;
mod executor;
mod monitor_client;
mod plan;
mod service;
mod storage;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::bybit::BybitClient;
use crate::config::CONFIG;
use crate::executor::ExecutionQueue;
use crate::monitor_client::MonitorClient;
use crate::service::StrategyService;
use crate::storage::Storage;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = %env!("CARGO_PKG_VERSION"), "🎯 Starting strategy engine...");

    let storage = Arc::new(Storage::new(&CONFIG.data_dir)?);
    let settings = storage.load_settings();

    let bybit = BybitClient::new(
        &CONFIG.bybit_base_url,
        &settings.api_key,
        &settings.api_secret,
        CONFIG.bybit_recv_window,
        CONFIG.request_timeout_secs,
    );
    let monitor = MonitorClient::new(&settings.price_monitor_base, CONFIG.request_timeout_secs);
    info!("Price monitor: {}", settings.price_monitor_base);
    info!("Webhook base: {}", settings.strategy_webhook_base);

    let (queue, queue_rx) = ExecutionQueue::new(CONFIG.executor_queue_capacity);
    let service = Arc::new(StrategyService::new(
        storage,
        monitor,
        bybit,
        queue,
        &settings.strategy_webhook_base,
    ));

    tokio::spawn(executor::run_worker(service.clone(), queue_rx));

    // Monitor tasks live only in the monitor process; rebuild them from the
    // persisted strategies on every start.
    let resync_service = service.clone();
    tokio::spawn(async move {
        if let Err(e) = resync_service.resync_all().await {
            tracing::error!("Startup monitor resync failed: {e:#}");
        }
    });

    let app = api::router(service);
    let addr = format!("{}:{}", CONFIG.host, CONFIG.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Strategy API listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
