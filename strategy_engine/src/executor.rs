// strategy_engine/src/executor.rs
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge};
use shared_models::MonitorType;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info};

use crate::config::CONFIG;
use crate::service::StrategyService;

lazy_static! {
    pub static ref WEBHOOKS_RECEIVED_TOTAL: Counter = register_counter!(
        "engine_webhooks_received_total",
        "Total number of monitor webhooks accepted for execution."
    )
    .unwrap();
    pub static ref EXECUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "engine_executions_total",
        "Total number of level executions processed, by result.",
        &["result"]
    )
    .unwrap();
    pub static ref ORDERS_PLACED_TOTAL: CounterVec = register_counter_vec!(
        "engine_orders_placed_total",
        "Total number of venue orders attempted, by side.",
        &["side"]
    )
    .unwrap();
    pub static ref LINKED_TRIGGERS_TOTAL: Counter = register_counter!(
        "engine_linked_triggers_total",
        "Total number of level_close levels released by a parent event."
    )
    .unwrap();
    pub static ref QUEUE_DEPTH_GAUGE: Gauge = register_gauge!(
        "engine_executor_queue_depth",
        "Number of execution tasks waiting in the queue."
    )
    .unwrap();
}

/// Prices carried from the trigger into the execution record.
#[derive(Clone, Debug, Default)]
pub struct TriggerContext {
    pub target_price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub trigger_direction: String,
}

/// One unit of work for the level executor. Carries ids, not level state:
/// the worker reloads the level so queued tasks never act on stale copies.
#[derive(Clone, Debug)]
pub struct ExecutionTask {
    pub strategy_id: String,
    pub level_id: String,
    pub monitor_type: MonitorType,
    pub trigger: TriggerContext,
}

/// Bounded FIFO feeding the single worker. Producers never block: when the
/// queue is full the task is rejected and logged, and the caller surfaces
/// the overload to the operator.
#[derive(Clone)]
pub struct ExecutionQueue {
    tx: mpsc::Sender<ExecutionTask>,
}

impl ExecutionQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExecutionTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, task: ExecutionTask) -> bool {
        let label = format!(
            "{}/{}/{}",
            task.strategy_id, task.level_id, task.monitor_type
        );
        match self.tx.try_send(task) {
            Ok(()) => {
                QUEUE_DEPTH_GAUGE.inc();
                info!("Enqueued level execution task: {label}");
                true
            }
            Err(TrySendError::Full(_)) => {
                error!("Executor queue full; rejecting task {label}");
                false
            }
            Err(TrySendError::Closed(_)) => {
                error!("Executor queue closed; dropping task {label}");
                false
            }
        }
    }
}

/// The single worker: at most one venue order in flight process-wide, with a
/// fixed pause between consecutive tasks to respect venue throttles.
pub async fn run_worker(service: Arc<StrategyService>, mut rx: mpsc::Receiver<ExecutionTask>) {
    info!("Level executor started");
    while let Some(task) = rx.recv().await {
        QUEUE_DEPTH_GAUGE.dec();
        info!(
            strategy = %task.strategy_id,
            level = %task.level_id,
            monitor = %task.monitor_type,
            "Processing level execution"
        );
        if let Err(e) = service.execute_task(&task).await {
            error!(
                strategy = %task.strategy_id,
                level = %task.level_id,
                "Execution task failed: {e:#}"
            );
        }
        tokio::time::sleep(Duration::from_secs(CONFIG.executor_spacing_secs)).await;
    }
    info!("Level executor stopped");
}
