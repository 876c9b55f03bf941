// price_monitor/src/ws_client.rs
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared_models::PriceUpdate;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::CONFIG;
use crate::service::WEBSOCKET_CONNECTED_GAUGE;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Long-lived subscriber to the venue's option ticker stream. Receives the
/// desired symbol set over a command channel, diff-applies subscriptions,
/// and pushes every observed mark price onto the service's price channel.
pub struct OptionStream {
    price_tx: mpsc::Sender<PriceUpdate>,
    symbols_rx: mpsc::UnboundedReceiver<HashSet<String>>,
    connected: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl OptionStream {
    pub fn new(
        price_tx: mpsc::Sender<PriceUpdate>,
        symbols_rx: mpsc::UnboundedReceiver<HashSet<String>>,
        connected: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
    ) -> Self {
        Self {
            price_tx,
            symbols_rx,
            connected,
            stopped,
        }
    }

    pub async fn run(mut self) {
        let mut desired: HashSet<String> = HashSet::new();
        let mut attempts: u32 = 0;

        loop {
            match connect_async(CONFIG.ws_url.as_str()).await {
                Ok((stream, _)) => {
                    info!("WebSocket connected: {}", CONFIG.ws_url);
                    self.connected.store(true, Ordering::SeqCst);
                    WEBSOCKET_CONNECTED_GAUGE.set(1.0);
                    attempts = 0;

                    let reason = self.drive(stream, &mut desired).await;

                    self.connected.store(false, Ordering::SeqCst);
                    WEBSOCKET_CONNECTED_GAUGE.set(0.0);
                    warn!("WebSocket disconnected: {reason}");
                }
                Err(e) => error!("WebSocket connect failed: {e}"),
            }

            attempts += 1;
            if attempts > CONFIG.max_reconnect_attempts {
                error!(
                    "Reconnect attempts exhausted ({}); option stream stopped",
                    CONFIG.max_reconnect_attempts
                );
                self.stopped.store(true, Ordering::SeqCst);
                return;
            }

            let wait = Duration::from_secs((1u64 << attempts.min(6)).min(60));
            info!(
                "Reconnecting in {}s (attempt {}/{})",
                wait.as_secs(),
                attempts,
                CONFIG.max_reconnect_attempts
            );

            // Keep absorbing subscription updates while backing off so the
            // freshest set is applied on reconnect.
            let deadline = sleep(wait);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    Some(set) = self.symbols_rx.recv() => desired = set,
                }
            }
        }
    }

    /// Runs one connection to completion; returns the disconnect reason.
    async fn drive(&mut self, stream: WsStream, desired: &mut HashSet<String>) -> String {
        let (mut write, mut read) = stream.split();
        let mut subscribed: HashSet<String> = HashSet::new();

        if !desired.is_empty() {
            if let Err(e) = send_op(&mut write, "subscribe", desired.iter()).await {
                return format!("initial subscribe failed: {e}");
            }
            subscribed = desired.clone();
            info!("Subscribed to {} option tickers", subscribed.len());
        }

        let mut ping = interval(Duration::from_secs(CONFIG.ws_ping_interval_secs));
        ping.tick().await;
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                Some(set) = self.symbols_rx.recv() => {
                    let to_remove: Vec<String> = subscribed.difference(&set).cloned().collect();
                    let to_add: Vec<String> = set.difference(&subscribed).cloned().collect();
                    if !to_remove.is_empty() {
                        if let Err(e) = send_op(&mut write, "unsubscribe", to_remove.iter()).await {
                            return format!("unsubscribe failed: {e}");
                        }
                    }
                    if !to_add.is_empty() {
                        if let Err(e) = send_op(&mut write, "subscribe", to_add.iter()).await {
                            return format!("subscribe failed: {e}");
                        }
                    }
                    if !to_remove.is_empty() || !to_add.is_empty() {
                        info!("Subscription set now {} option tickers", set.len());
                    }
                    *desired = set.clone();
                    subscribed = set;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        handle_text(&self.price_tx, &text, &mut write).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => last_seen = Instant::now(),
                    Some(Ok(Message::Close(_))) => return "server closed the connection".into(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return format!("read error: {e}"),
                    None => return "stream ended".into(),
                },
                _ = ping.tick() => {
                    let silence = Duration::from_secs(
                        CONFIG.ws_ping_interval_secs + CONFIG.ws_pong_timeout_secs,
                    );
                    if last_seen.elapsed() > silence {
                        return "pong timeout".into();
                    }
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        return format!("ping failed: {e}");
                    }
                }
            }
        }
    }
}

async fn handle_text(price_tx: &mpsc::Sender<PriceUpdate>, text: &str, write: &mut WsSink) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Malformed frame: {e}");
            return;
        }
    };

    match value.get("op").and_then(Value::as_str) {
        Some("ping") => {
            let _ = write.send(Message::Text(json!({"op": "pong"}).to_string())).await;
            return;
        }
        Some("subscribe") | Some("unsubscribe") => {
            debug!(
                "Subscription ack: success={}",
                value.get("success").and_then(serde_json::Value::as_bool).unwrap_or(false)
            );
            return;
        }
        _ => {}
    }

    let topic = match value.get("topic").and_then(Value::as_str) {
        Some(topic) if topic.starts_with("tickers.") => topic,
        _ => return,
    };
    let symbol = topic.trim_start_matches("tickers.").to_string();

    let price = value
        .get("data")
        .and_then(|data| data.get("markPrice"))
        .and_then(|mark| {
            mark.as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .or_else(|| mark.as_f64())
        });

    if let Some(price) = price {
        let update = PriceUpdate {
            symbol,
            price,
            timestamp: Utc::now(),
        };
        // Channel errors mean the consumer is gone; the read loop must
        // survive regardless.
        if let Err(e) = price_tx.send(update).await {
            error!("Price channel closed: {e}");
        }
    }
}

async fn send_op<'a, I>(
    write: &mut WsSink,
    op: &str,
    symbols: I,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    I: Iterator<Item = &'a String>,
{
    let args: Vec<String> = symbols.map(|s| format!("tickers.{s}")).collect();
    let frame = json!({"op": op, "args": args});
    write.send(Message::Text(frame.to_string())).await
}
