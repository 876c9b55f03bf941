// price_monitor/src/service.rs
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge,
};
use shared_models::{
    InstrumentType, MonitorTask, PriceUpdate, TaskStatus, TriggerDirection, WebhookPayload,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::storage::{Snapshot, SnapshotStore};
use crate::webhook::WebhookDispatcher;

lazy_static! {
    pub static ref PRICE_UPDATES_TOTAL: Counter = register_counter!(
        "monitor_price_updates_total",
        "Total number of price updates consumed by the monitor service."
    )
    .unwrap();
    pub static ref TRIGGERS_TOTAL: CounterVec = register_counter_vec!(
        "monitor_triggers_total",
        "Total number of monitor tasks triggered, by crossing direction.",
        &["direction"]
    )
    .unwrap();
    pub static ref TASKS_EXPIRED_TOTAL: Counter = register_counter!(
        "monitor_tasks_expired_total",
        "Total number of monitor tasks expired by the sweep."
    )
    .unwrap();
    pub static ref WEBHOOKS_DELIVERED_TOTAL: Counter = register_counter!(
        "monitor_webhooks_delivered_total",
        "Total number of webhook notifications acknowledged with a 2xx."
    )
    .unwrap();
    pub static ref WEBHOOKS_FAILED_TOTAL: Counter = register_counter!(
        "monitor_webhooks_failed_total",
        "Total number of webhook notifications that failed or timed out."
    )
    .unwrap();
    pub static ref ACTIVE_TASKS_GAUGE: Gauge = register_gauge!(
        "monitor_active_tasks",
        "Number of currently active monitor tasks."
    )
    .unwrap();
    pub static ref WEBSOCKET_CONNECTED_GAUGE: Gauge = register_gauge!(
        "monitor_websocket_connected",
        "Whether the option ticker stream is currently connected."
    )
    .unwrap();
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("task id '{0}' already exists")]
    DuplicateTask(String),
    #[error("active task limit of {0} reached")]
    CapacityReached(usize),
}

/// Directional crossing between two consecutive observations. Equality with
/// the target counts in the direction of travel; a flat tape never crosses.
pub fn detect_cross(last: f64, target: f64, price: f64) -> Option<TriggerDirection> {
    if last < target && target <= price {
        Some(TriggerDirection::UpCross)
    } else if last > target && target >= price {
        Some(TriggerDirection::DownCross)
    } else {
        None
    }
}

/// A task that just crossed its target, captured before the webhook send.
#[derive(Clone, Debug)]
pub struct TriggeredTask {
    pub task: MonitorTask,
    pub previous_price: f64,
    pub triggered_price: f64,
    pub direction: TriggerDirection,
}

pub(crate) struct MonitorState {
    /// Every task the service has seen, terminal tasks included; the active
    /// subset is selected by status.
    tasks: HashMap<String, MonitorTask>,
    option_symbols: HashSet<String>,
    spot_symbols: HashSet<String>,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            option_symbols: HashSet::new(),
            spot_symbols: HashSet::new(),
        }
    }

    fn active_count(&self) -> usize {
        self.tasks.values().filter(|task| task.is_active()).count()
    }

    fn active_tasks(&self) -> Vec<MonitorTask> {
        self.tasks
            .values()
            .filter(|task| task.is_active())
            .cloned()
            .collect()
    }

    /// Recompute the monitored symbol sets from the active tasks. Returns
    /// whether either set changed.
    fn recompute_symbols(&mut self) -> bool {
        let mut options = HashSet::new();
        let mut spots = HashSet::new();
        for task in self.tasks.values().filter(|task| task.is_active()) {
            match task.monitor_instrument {
                InstrumentType::Option => options.insert(task.monitor_symbol.clone()),
                InstrumentType::Spot => spots.insert(task.monitor_symbol.clone()),
            };
        }
        let changed = options != self.option_symbols || spots != self.spot_symbols;
        self.option_symbols = options;
        self.spot_symbols = spots;
        changed
    }

    /// Run cross detection for one price update. Status transitions happen
    /// here, atomically with the scan; no I/O is performed.
    fn apply_price(&mut self, update: &PriceUpdate) -> Vec<TriggeredTask> {
        let mut triggered = Vec::new();
        for task in self.tasks.values_mut() {
            if !task.is_active() || task.monitor_symbol != update.symbol {
                continue;
            }
            match task.current_price {
                // First observation: no direction established yet, even if
                // the price lands exactly on target.
                None => task.current_price = Some(update.price),
                Some(last) => {
                    task.previous_price = Some(last);
                    task.current_price = Some(update.price);
                    if let Some(direction) = detect_cross(last, task.target_price, update.price) {
                        task.status = TaskStatus::Triggered;
                        task.triggered_at = Some(update.timestamp);
                        triggered.push(TriggeredTask {
                            task: task.clone(),
                            previous_price: last,
                            triggered_price: update.price,
                            direction,
                        });
                    }
                }
            }
        }
        triggered
    }

    fn expire_due(&mut self, now: chrono::DateTime<Utc>) -> usize {
        let mut expired = 0;
        for task in self.tasks.values_mut() {
            if task.is_active() && task.is_expired_at(now) {
                task.status = TaskStatus::Expired;
                expired += 1;
                info!(task_id = %task.task_id, "Monitor task expired");
            }
        }
        expired
    }
}

pub struct MonitorService {
    state: Mutex<MonitorState>,
    snapshot: SnapshotStore,
    subscriptions_tx: mpsc::UnboundedSender<HashSet<String>>,
    spot_symbols_tx: watch::Sender<HashSet<String>>,
    webhook: WebhookDispatcher,
    ws_connected: Arc<AtomicBool>,
    ws_stopped: Arc<AtomicBool>,
    max_tasks: usize,
}

impl MonitorService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        snapshot: SnapshotStore,
        subscriptions_tx: mpsc::UnboundedSender<HashSet<String>>,
        spot_symbols_tx: watch::Sender<HashSet<String>>,
        webhook: WebhookDispatcher,
        ws_connected: Arc<AtomicBool>,
        ws_stopped: Arc<AtomicBool>,
        max_tasks: usize,
    ) -> Self {
        Self {
            state: Mutex::new(MonitorState::new()),
            snapshot,
            subscriptions_tx,
            spot_symbols_tx,
            webhook,
            ws_connected,
            ws_stopped,
            max_tasks,
        }
    }

    pub fn load_snapshot(&self) -> Snapshot {
        self.snapshot.load()
    }

    /// Write the current active set, so the listing endpoint has a fresh
    /// file even before the first mutation.
    pub async fn persist_snapshot(&self) {
        let state = self.state.lock().await;
        if let Err(e) = self.snapshot.write(&state.active_tasks()) {
            error!("Failed to persist active task snapshot: {e:#}");
        }
    }

    pub fn websocket_connected(&self) -> bool {
        self.ws_connected.load(Ordering::SeqCst)
    }

    pub fn websocket_stopped(&self) -> bool {
        self.ws_stopped.load(Ordering::SeqCst)
    }

    pub async fn add_task(&self, task: MonitorTask) -> Result<(), MonitorError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.task_id) {
            return Err(MonitorError::DuplicateTask(task.task_id));
        }
        if state.active_count() >= self.max_tasks {
            return Err(MonitorError::CapacityReached(self.max_tasks));
        }
        info!(
            task_id = %task.task_id,
            symbol = %task.monitor_symbol,
            instrument = %task.monitor_instrument,
            target = task.target_price,
            "Added monitor task"
        );
        state.tasks.insert(task.task_id.clone(), task);
        self.after_mutation(&mut state);
        Ok(())
    }

    /// Idempotent: removing an unknown task is a no-op.
    pub async fn remove_task(&self, task_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.tasks.remove(task_id).is_some();
        if removed {
            info!(task_id = %task_id, "Removed monitor task");
            self.after_mutation(&mut state);
        }
        removed
    }

    pub async fn get_task(&self, task_id: &str) -> Option<MonitorTask> {
        self.state.lock().await.tasks.get(task_id).cloned()
    }

    pub async fn active_tasks(&self) -> Vec<MonitorTask> {
        self.state.lock().await.active_tasks()
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active_count()
    }

    /// Consume one price update: cross detection and the status CAS happen
    /// under the lock; webhook delivery happens afterwards, detached.
    pub async fn on_price(&self, update: PriceUpdate) {
        PRICE_UPDATES_TOTAL.inc();
        let triggered = {
            let mut state = self.state.lock().await;
            let triggered = state.apply_price(&update);
            if !triggered.is_empty() {
                self.after_mutation(&mut state);
            }
            triggered
        };

        for hit in triggered {
            let direction = hit.direction.to_string();
            TRIGGERS_TOTAL.with_label_values(&[&direction]).inc();
            info!(
                task_id = %hit.task.task_id,
                target = hit.task.target_price,
                price = hit.triggered_price,
                direction = %direction,
                "Monitor task triggered"
            );
            let dispatcher = self.webhook.clone();
            let url = hit.task.webhook_url.clone();
            let payload = webhook_payload(&hit);
            tokio::spawn(async move {
                dispatcher.dispatch(&url, &payload).await;
            });
        }
    }

    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let expired = state.expire_due(now);
        if expired > 0 {
            TASKS_EXPIRED_TOTAL.inc_by(expired as f64);
        }
        // Refresh the snapshot on every sweep so observed prices on disk
        // never go stale by more than one interval.
        self.after_mutation(&mut state);
        expired
    }

    pub async fn run_price_loop(self: Arc<Self>, mut rx: mpsc::Receiver<PriceUpdate>) {
        info!("Price consumer started");
        while let Some(update) = rx.recv().await {
            debug!(symbol = %update.symbol, price = update.price, "Price update");
            self.on_price(update).await;
        }
        warn!("Price channel closed; consumer exiting");
    }

    pub async fn run_expiry_sweep(self: Arc<Self>, sweep_interval_secs: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval_secs));
        interval.tick().await;
        loop {
            interval.tick().await;
            let expired = self.sweep_expired().await;
            if expired > 0 {
                info!("Cleaned up {} expired tasks", expired);
            }
        }
    }

    /// Recompute monitored sets, refresh the snapshot file and push the new
    /// subscription sets to the feeds. The snapshot write is local file I/O
    /// and stays inside the lock so images land on disk in order.
    fn after_mutation(&self, state: &mut MonitorState) {
        let changed = state.recompute_symbols();
        ACTIVE_TASKS_GAUGE.set(state.active_count() as f64);
        if let Err(e) = self.snapshot.write(&state.active_tasks()) {
            error!("Failed to persist active task snapshot: {e:#}");
        }
        if changed {
            let _ = self.subscriptions_tx.send(state.option_symbols.clone());
            self.spot_symbols_tx.send_replace(state.spot_symbols.clone());
        }
    }
}

fn webhook_payload(hit: &TriggeredTask) -> WebhookPayload {
    let task = &hit.task;
    WebhookPayload {
        task_id: task.task_id.clone(),
        option_symbol: task.option_info.symbol.clone(),
        monitor_symbol: task.monitor_symbol.clone(),
        monitor_instrument: task.monitor_instrument,
        target_price: task.target_price,
        triggered_price: hit.triggered_price,
        previous_price: hit.previous_price,
        trigger_direction: hit.direction,
        triggered_at: task
            .triggered_at
            .unwrap_or_else(Utc::now)
            .to_rfc3339(),
        strategy_id: task.strategy_id.clone(),
        level_id: task.level_id.clone(),
        monitor_type: task.monitor_type,
        metadata: task.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use shared_models::{MonitorType, OptionInfo, OptionKind};

    fn temp_store() -> SnapshotStore {
        let dir = std::env::temp_dir().join(format!("monitor-service-{}", uuid::Uuid::new_v4()));
        SnapshotStore::new(&dir.to_string_lossy()).unwrap()
    }

    fn task(id: &str, symbol: &str, target: f64) -> MonitorTask {
        let now = Utc::now();
        MonitorTask {
            task_id: id.into(),
            option_info: OptionInfo {
                symbol: symbol.into(),
                base_coin: "BTC".into(),
                strike_price: 100000.0,
                expiry_date: "27DEC25".into(),
                option_type: OptionKind::Call,
            },
            monitor_symbol: symbol.into(),
            monitor_instrument: InstrumentType::Option,
            target_price: target,
            webhook_url: "http://127.0.0.1:1/webhook".into(),
            created_at: now,
            expires_at: now + ChronoDuration::hours(24),
            current_price: None,
            previous_price: None,
            status: TaskStatus::Active,
            triggered_at: None,
            strategy_id: Some("s-1".into()),
            level_id: Some("l-1".into()),
            monitor_type: Some(MonitorType::Entry),
            metadata: serde_json::json!({}),
        }
    }

    fn update(symbol: &str, price: f64) -> PriceUpdate {
        PriceUpdate {
            symbol: symbol.into(),
            price,
            timestamp: Utc::now(),
        }
    }

    fn service() -> MonitorService {
        let (subs_tx, _subs_rx) = mpsc::unbounded_channel();
        let (spot_tx, _spot_rx) = watch::channel(HashSet::new());
        MonitorService::new(
            temp_store(),
            subs_tx,
            spot_tx,
            WebhookDispatcher::new(1),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
            3,
        )
    }

    #[test]
    fn cross_detection_directions() {
        assert_eq!(detect_cross(99.0, 100.0, 100.0), Some(TriggerDirection::UpCross));
        assert_eq!(detect_cross(99.0, 100.0, 101.0), Some(TriggerDirection::UpCross));
        assert_eq!(detect_cross(101.0, 100.0, 100.0), Some(TriggerDirection::DownCross));
        assert_eq!(detect_cross(101.0, 100.0, 99.5), Some(TriggerDirection::DownCross));
        // No established direction on a flat tape or away from the target.
        assert_eq!(detect_cross(100.0, 100.0, 100.0), None);
        assert_eq!(detect_cross(98.0, 100.0, 99.0), None);
        assert_eq!(detect_cross(102.0, 100.0, 101.0), None);
    }

    #[test]
    fn up_cross_triggers_once_with_previous_price() {
        let mut state = MonitorState::new();
        state.tasks.insert("t".into(), task("t", "BTC-27DEC25-100000-C-USDT", 100.0));

        assert!(state.apply_price(&update("BTC-27DEC25-100000-C-USDT", 95.0)).is_empty());
        assert!(state.apply_price(&update("BTC-27DEC25-100000-C-USDT", 99.0)).is_empty());

        let hits = state.apply_price(&update("BTC-27DEC25-100000-C-USDT", 100.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].direction, TriggerDirection::UpCross);
        assert_eq!(hits[0].triggered_price, 100.0);
        assert_eq!(hits[0].previous_price, 99.0);
        assert_eq!(hits[0].task.status, TaskStatus::Triggered);
        assert!(hits[0].task.triggered_at.is_some());

        // Task left the active set: a fourth price produces nothing.
        assert!(state.apply_price(&update("BTC-27DEC25-100000-C-USDT", 101.0)).is_empty());
    }

    #[test]
    fn flat_tape_at_target_never_triggers() {
        let mut state = MonitorState::new();
        state.tasks.insert("t".into(), task("t", "SYM", 100.0));
        for _ in 0..3 {
            assert!(state.apply_price(&update("SYM", 100.0)).is_empty());
        }
        assert_eq!(state.tasks["t"].status, TaskStatus::Active);
    }

    #[test]
    fn crossing_on_second_observation_triggers() {
        let mut state = MonitorState::new();
        state.tasks.insert("t".into(), task("t", "BTCUSDT", 65000.0));
        assert!(state.apply_price(&update("BTCUSDT", 64990.0)).is_empty());
        let hits = state.apply_price(&update("BTCUSDT", 65005.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].direction, TriggerDirection::UpCross);
        assert_eq!(hits[0].previous_price, 64990.0);
    }

    #[test]
    fn other_symbols_are_ignored() {
        let mut state = MonitorState::new();
        state.tasks.insert("t".into(), task("t", "SYM-A", 100.0));
        assert!(state.apply_price(&update("SYM-B", 50.0)).is_empty());
        assert!(state.apply_price(&update("SYM-B", 150.0)).is_empty());
        assert_eq!(state.tasks["t"].current_price, None);
    }

    #[test]
    fn symbol_sets_follow_active_tasks() {
        let mut state = MonitorState::new();
        let mut spot = task("s", "BTCUSDT", 65000.0);
        spot.monitor_instrument = InstrumentType::Spot;
        state.tasks.insert("o".into(), task("o", "SYM-A", 1.0));
        state.tasks.insert("s".into(), spot);

        assert!(state.recompute_symbols());
        assert!(state.option_symbols.contains("SYM-A"));
        assert!(state.spot_symbols.contains("BTCUSDT"));

        state.tasks.get_mut("o").unwrap().status = TaskStatus::Cancelled;
        assert!(state.recompute_symbols());
        assert!(state.option_symbols.is_empty());
    }

    #[tokio::test]
    async fn duplicate_task_rejected() {
        let svc = service();
        svc.add_task(task("dup", "SYM", 1.0)).await.unwrap();
        let err = svc.add_task(task("dup", "SYM", 2.0)).await.unwrap_err();
        assert!(matches!(err, MonitorError::DuplicateTask(_)));
    }

    #[tokio::test]
    async fn capacity_limit_enforced() {
        let svc = service();
        for i in 0..3 {
            svc.add_task(task(&format!("t{i}"), "SYM", 1.0)).await.unwrap();
        }
        let err = svc.add_task(task("t3", "SYM", 1.0)).await.unwrap_err();
        assert!(matches!(err, MonitorError::CapacityReached(3)));

        // Removing one frees a slot again.
        assert!(svc.remove_task("t0").await);
        svc.add_task(task("t3", "SYM", 1.0)).await.unwrap();
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let svc = service();
        svc.add_task(task("t", "SYM", 1.0)).await.unwrap();
        assert!(svc.remove_task("t").await);
        assert!(!svc.remove_task("t").await);
        assert!(!svc.remove_task("never-existed").await);
    }

    #[tokio::test]
    async fn expiry_sweep_transitions_due_tasks() {
        let svc = service();
        let mut due = task("due", "SYM", 1.0);
        due.expires_at = Utc::now() - ChronoDuration::hours(1);
        svc.add_task(due).await.unwrap();
        svc.add_task(task("fresh", "SYM", 1.0)).await.unwrap();

        assert_eq!(svc.sweep_expired().await, 1);
        assert_eq!(svc.get_task("due").await.unwrap().status, TaskStatus::Expired);
        assert_eq!(svc.get_task("fresh").await.unwrap().status, TaskStatus::Active);
        assert_eq!(svc.active_count().await, 1);

        // A task cannot leave expired.
        assert_eq!(svc.sweep_expired().await, 0);
    }

    #[tokio::test]
    async fn snapshot_reflects_active_subset() {
        let svc = service();
        svc.add_task(task("a", "SYM", 1.0)).await.unwrap();
        svc.add_task(task("b", "SYM", 2.0)).await.unwrap();
        svc.remove_task("a").await;

        let snapshot = svc.load_snapshot();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].task_id, "b");
    }
}
