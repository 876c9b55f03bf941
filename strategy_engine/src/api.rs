// strategy_engine/src/api.rs
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use shared_models::WebhookPayload;
use tracing::error;

use crate::service::{StrategyRequest, StrategyService, WebhookOutcome};

pub fn router(service: Arc<StrategyService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/strategies", get(list_strategies).post(create_strategy))
        .route(
            "/api/strategies/webhook",
            post(webhook_handler),
        )
        .route("/api/strategies/trades", get(trade_logs))
        .route(
            "/api/strategies/:strategy_id",
            put(update_strategy).delete(delete_strategy),
        )
        .route("/api/strategies/:strategy_id/pause", post(pause_strategy))
        .route("/api/strategies/:strategy_id/resume", post(resume_strategy))
        .route("/api/strategies/:strategy_id/stop", post(stop_strategy))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/watchlist", get(get_watchlist))
        .route("/api/account", get(account_balance))
        .route("/api/price/:symbol", get(option_price))
        .route("/api/orders/cancel", post(cancel_order))
        .with_state(service)
}

async fn health(State(service): State<Arc<StrategyService>>) -> Json<Value> {
    let strategies = service.list_strategies().unwrap_or_default();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "strategies": strategies.len(),
    }))
}

async fn metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

async fn list_strategies(
    State(service): State<Arc<StrategyService>>,
) -> (StatusCode, Json<Value>) {
    match service.list_strategies() {
        Ok(strategies) => (
            StatusCode::OK,
            Json(json!({"success": true, "strategies": strategies})),
        ),
        Err(e) => internal_error(e),
    }
}

async fn create_strategy(
    State(service): State<Arc<StrategyService>>,
    Json(request): Json<StrategyRequest>,
) -> (StatusCode, Json<Value>) {
    if let Err(message) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": message})),
        );
    }
    match service.create_strategy(request).await {
        Ok(strategy) => (
            StatusCode::OK,
            Json(json!({"success": true, "strategy": strategy})),
        ),
        Err(e) => internal_error(e),
    }
}

async fn update_strategy(
    State(service): State<Arc<StrategyService>>,
    Path(strategy_id): Path<String>,
    Json(request): Json<StrategyRequest>,
) -> (StatusCode, Json<Value>) {
    if let Err(message) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": message})),
        );
    }
    match service.update_strategy(&strategy_id, request).await {
        Ok(Some(strategy)) => (
            StatusCode::OK,
            Json(json!({"success": true, "strategy": strategy})),
        ),
        Ok(None) => strategy_not_found(),
        Err(e) => internal_error(e),
    }
}

async fn delete_strategy(
    State(service): State<Arc<StrategyService>>,
    Path(strategy_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match service.delete_strategy(&strategy_id).await {
        Ok(true) => (StatusCode::OK, Json(json!({"success": true}))),
        Ok(false) => strategy_not_found(),
        Err(e) => internal_error(e),
    }
}

async fn pause_strategy(
    State(service): State<Arc<StrategyService>>,
    Path(strategy_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match service.pause_strategy(&strategy_id).await {
        Ok(Some(strategy)) => (
            StatusCode::OK,
            Json(json!({"success": true, "strategy": strategy})),
        ),
        Ok(None) => strategy_not_found(),
        Err(e) => internal_error(e),
    }
}

async fn resume_strategy(
    State(service): State<Arc<StrategyService>>,
    Path(strategy_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match service.resume_strategy(&strategy_id).await {
        Ok(Some(strategy)) => (
            StatusCode::OK,
            Json(json!({"success": true, "strategy": strategy})),
        ),
        Ok(None) => strategy_not_found(),
        Err(e) => internal_error(e),
    }
}

async fn stop_strategy(
    State(service): State<Arc<StrategyService>>,
    Path(strategy_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match service.stop_strategy(&strategy_id).await {
        Ok(Some(strategy)) => (
            StatusCode::OK,
            Json(json!({"success": true, "strategy": strategy})),
        ),
        Ok(None) => strategy_not_found(),
        Err(e) => internal_error(e),
    }
}

async fn webhook_handler(
    State(service): State<Arc<StrategyService>>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, Json<Value>) {
    match service.handle_webhook(&payload) {
        Ok(WebhookOutcome::Enqueued) => (StatusCode::OK, Json(json!({"success": true}))),
        // Redeliveries for finished levels are acknowledged, not retried.
        Ok(WebhookOutcome::Ignored(reason)) => (
            StatusCode::OK,
            Json(json!({"success": true, "message": reason})),
        ),
        Ok(WebhookOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "strategy or level not found"})),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"success": false, "message": e.to_string()})),
        ),
    }
}

#[derive(Deserialize)]
struct TradesQuery {
    limit: Option<usize>,
}

async fn trade_logs(
    State(service): State<Arc<StrategyService>>,
    Query(query): Query<TradesQuery>,
) -> (StatusCode, Json<Value>) {
    match service.storage().load_trades(query.limit) {
        Ok(trades) => (
            StatusCode::OK,
            Json(json!({"success": true, "trades": trades})),
        ),
        Err(e) => internal_error(e),
    }
}

async fn get_settings(State(service): State<Arc<StrategyService>>) -> Json<Value> {
    let settings = service.storage().load_settings();
    Json(json!({"success": true, "settings": settings}))
}

async fn update_settings(
    State(service): State<Arc<StrategyService>>,
    Json(patch): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match service.storage().update_settings(&patch) {
        Ok(settings) => (
            StatusCode::OK,
            Json(json!({"success": true, "settings": settings})),
        ),
        Err(e) => internal_error(e),
    }
}

async fn get_watchlist(State(service): State<Arc<StrategyService>>) -> Json<Value> {
    let items = service.storage().load_watchlist();
    Json(json!({"success": true, "watchlist": items}))
}

async fn account_balance(State(service): State<Arc<StrategyService>>) -> (StatusCode, Json<Value>) {
    match service.account_balance().await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({"success": true, "account": result})),
        ),
        Err(e) => internal_error(e),
    }
}

async fn option_price(
    State(service): State<Arc<StrategyService>>,
    Path(symbol): Path<String>,
) -> (StatusCode, Json<Value>) {
    match service.option_price(&symbol).await {
        Ok(Some(price)) => (
            StatusCode::OK,
            Json(json!({"success": true, "price": price})),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "no ticker for symbol"})),
        ),
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
struct CancelOrderRequest {
    symbol: String,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    order_link_id: Option<String>,
}

async fn cancel_order(
    State(service): State<Arc<StrategyService>>,
    Json(request): Json<CancelOrderRequest>,
) -> (StatusCode, Json<Value>) {
    if request.order_id.is_none() && request.order_link_id.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "order_id or order_link_id is required"})),
        );
    }
    match service
        .cancel_order(
            &request.symbol,
            request.order_id.as_deref(),
            request.order_link_id.as_deref(),
        )
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({"success": outcome.success, "message": outcome.message})),
        ),
        Err(e) => internal_error(e),
    }
}

fn strategy_not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"success": false, "message": "strategy not found"})),
    )
}

fn internal_error(e: anyhow::Error) -> (StatusCode, Json<Value>) {
    error!("Request failed: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "message": e.to_string()})),
    )
}
