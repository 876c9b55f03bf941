// price_monitor/src/api.rs
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use shared_models::{
    parse_option_symbol, ApiResponse, InstrumentType, MonitorTask, MonitorType, TaskStatus,
    BTC_SPOT_SYMBOL,
};
use tracing::info;
use url::Url;

use crate::service::{MonitorError, MonitorService};

pub fn router(service: Arc<MonitorService>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/monitor/create", post(create_task))
        .route("/api/monitor/tasks", get(list_tasks))
        .route("/api/monitor/:task_id", get(get_task).delete(delete_task))
        .with_state(service)
}

fn default_timeout_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize)]
pub struct CreateMonitorTaskRequest {
    pub task_id: String,
    pub option_symbol: String,
    pub target_price: f64,
    pub webhook_url: String,
    #[serde(default = "default_timeout_hours")]
    pub timeout_hours: i64,
    pub strategy_id: String,
    pub level_id: String,
    pub monitor_type: MonitorType,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub monitor_instrument: InstrumentType,
    #[serde(default)]
    pub monitor_symbol: Option<String>,
}

async fn root() -> Json<ApiResponse> {
    Json(ApiResponse::ok(
        "Option price monitor running",
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "create_task": "POST /api/monitor/create",
                "get_task": "GET /api/monitor/{task_id}",
                "delete_task": "DELETE /api/monitor/{task_id}",
                "list_tasks": "GET /api/monitor/tasks",
            }
        }),
    ))
}

async fn health(State(service): State<Arc<MonitorService>>) -> Json<Value> {
    let connected = service.websocket_connected();
    let stopped = service.websocket_stopped();
    let healthy = connected && !stopped;
    Json(json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "timestamp": Utc::now().to_rfc3339(),
        "websocket_connected": connected,
        "websocket_stopped": stopped,
        "active_tasks": service.active_count().await,
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

async fn create_task(
    State(service): State<Arc<MonitorService>>,
    Json(req): Json<CreateMonitorTaskRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let option_info = match parse_option_symbol(&req.option_symbol) {
        Ok(info) => info,
        Err(e) => return bad_request(e.to_string()),
    };
    if req.target_price <= 0.0 {
        return bad_request("target_price must be greater than 0");
    }
    match Url::parse(&req.webhook_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        _ => return bad_request("webhook_url must be a valid http:// or https:// URL"),
    }
    if !(1..=168).contains(&req.timeout_hours) {
        return bad_request("timeout_hours must be between 1 and 168");
    }

    let monitor_symbol = match req.monitor_instrument {
        InstrumentType::Spot => match req.monitor_symbol.as_deref() {
            Some(symbol) if symbol.to_uppercase() == BTC_SPOT_SYMBOL => BTC_SPOT_SYMBOL.to_string(),
            Some(other) => {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(ApiResponse::error(format!(
                        "only {BTC_SPOT_SYMBOL} spot monitoring is supported, got {other}"
                    ))),
                )
            }
            None => {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(ApiResponse::error(
                        "monitor_symbol is required for spot monitoring",
                    )),
                )
            }
        },
        InstrumentType::Option => req
            .monitor_symbol
            .map(|symbol| symbol.to_uppercase())
            .unwrap_or_else(|| option_info.symbol.clone()),
    };

    let now = Utc::now();
    let expires_at = now + Duration::hours(req.timeout_hours);
    let task = MonitorTask {
        task_id: req.task_id.clone(),
        option_info,
        monitor_symbol: monitor_symbol.clone(),
        monitor_instrument: req.monitor_instrument,
        target_price: req.target_price,
        webhook_url: req.webhook_url,
        created_at: now,
        expires_at,
        current_price: None,
        previous_price: None,
        status: TaskStatus::Active,
        triggered_at: None,
        strategy_id: Some(req.strategy_id),
        level_id: Some(req.level_id),
        monitor_type: Some(req.monitor_type),
        metadata: req.metadata,
    };

    match service.add_task(task).await {
        Ok(()) => {
            info!(task_id = %req.task_id, "Created monitor task");
            (
                StatusCode::OK,
                Json(ApiResponse::ok(
                    "Monitor task created",
                    json!({
                        "task_id": req.task_id,
                        "option_symbol": req.option_symbol,
                        "monitor_symbol": monitor_symbol,
                        "monitor_instrument": req.monitor_instrument,
                        "target_price": req.target_price,
                        "expires_at": expires_at.to_rfc3339(),
                    }),
                )),
            )
        }
        Err(e @ MonitorError::DuplicateTask(_)) => bad_request(e.to_string()),
        Err(e @ MonitorError::CapacityReached(_)) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn get_task(
    State(service): State<Arc<MonitorService>>,
    Path(task_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    // Prefer the disk snapshot so reads never contend with the hot path.
    let snapshot = service.load_snapshot();
    if let Some(task) = snapshot.find(&task_id) {
        let mut data = serde_json::to_value(task).unwrap_or_default();
        if let Some(object) = data.as_object_mut() {
            object.insert(
                "snapshot_updated_at".into(),
                serde_json::to_value(snapshot.updated_at).unwrap_or(Value::Null),
            );
        }
        return (StatusCode::OK, Json(ApiResponse::ok("Task found", data)));
    }

    match service.get_task(&task_id).await {
        Some(task) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                "Task found",
                serde_json::to_value(&task).unwrap_or_default(),
            )),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("task '{task_id}' not found"))),
        ),
    }
}

async fn delete_task(
    State(service): State<Arc<MonitorService>>,
    Path(task_id): Path<String>,
) -> Json<ApiResponse> {
    let removed = service.remove_task(&task_id).await;
    let message = if removed {
        "Monitor task deleted"
    } else {
        "Monitor task already absent"
    };
    Json(ApiResponse::ok(message, json!({ "task_id": task_id })))
}

async fn list_tasks(State(service): State<Arc<MonitorService>>) -> Json<ApiResponse> {
    let snapshot = service.load_snapshot();
    let mut message = format!("{} active monitor tasks", snapshot.tasks.len());
    if let Some(updated_at) = snapshot.updated_at {
        message.push_str(&format!(", last updated {}", updated_at.to_rfc3339()));
    }
    Json(ApiResponse::ok(
        message,
        json!({
            "tasks": snapshot.tasks,
            "updated_at": snapshot.updated_at,
        }),
    ))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiResponse>) {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message)))
}
