// price_monitor/src/spot_poller.rs
use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use shared_models::PriceUpdate;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::CONFIG;

/// Periodically pulls last prices for the spot symbol set via REST and
/// delivers them through the same channel as the option stream. Parks while
/// the set is empty and wakes when it becomes non-empty again.
pub struct SpotPoller {
    client: reqwest::Client,
    price_tx: mpsc::Sender<PriceUpdate>,
    symbols_rx: watch::Receiver<HashSet<String>>,
}

impl SpotPoller {
    pub fn new(
        price_tx: mpsc::Sender<PriceUpdate>,
        symbols_rx: watch::Receiver<HashSet<String>>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CONFIG.request_timeout_secs))
            .build()
            .expect("failed to build spot poll http client");
        Self {
            client,
            price_tx,
            symbols_rx,
        }
    }

    pub async fn run(mut self) {
        let interval = Duration::from_secs_f64(CONFIG.spot_poll_interval_secs);
        let mut idle = true;

        loop {
            let symbols = self.symbols_rx.borrow().clone();

            if symbols.is_empty() {
                if !idle {
                    info!("Spot symbol set empty; poller idle");
                    idle = true;
                }
                if self.symbols_rx.changed().await.is_err() {
                    warn!("Spot symbol channel closed; poller exiting");
                    return;
                }
                continue;
            }
            if idle {
                info!("Polling {} spot symbols every {:?}", symbols.len(), interval);
                idle = false;
            }

            for symbol in &symbols {
                match self.fetch_last_price(symbol).await {
                    Ok(Some(price)) => {
                        let update = PriceUpdate {
                            symbol: symbol.clone(),
                            price,
                            timestamp: Utc::now(),
                        };
                        if self.price_tx.send(update).await.is_err() {
                            warn!("Price channel closed; poller exiting");
                            return;
                        }
                    }
                    Ok(None) => debug!(symbol = %symbol, "No last price in ticker response"),
                    // The worker keeps going through request errors.
                    Err(e) => warn!(symbol = %symbol, "Spot poll failed: {e:#}"),
                }
            }

            tokio::select! {
                _ = sleep(interval) => {}
                changed = self.symbols_rx.changed() => {
                    if changed.is_err() {
                        warn!("Spot symbol channel closed; poller exiting");
                        return;
                    }
                }
            }
        }
    }

    async fn fetch_last_price(&self, symbol: &str) -> anyhow::Result<Option<f64>> {
        let url = format!("{}/v5/market/tickers", CONFIG.rest_base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("category", "spot"), ("symbol", symbol)])
            .send()
            .await?;
        let body: Value = response.json().await?;

        let ret_code = body.get("retCode").and_then(Value::as_i64).unwrap_or(-1);
        if ret_code != 0 {
            let msg = body
                .get("retMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            error!(symbol, "Tickers request rejected: {msg}");
            return Ok(None);
        }

        let price = body
            .pointer("/result/list/0/lastPrice")
            .and_then(|last| {
                last.as_str()
                    .and_then(|s| s.parse::<f64>().ok())
                    .or_else(|| last.as_f64())
            });
        Ok(price)
    }
}
