// strategy_engine/src/service.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Deserialize;
use shared_models::{
    canonical_option_symbol, parse_option_symbol, LevelExecutionRecord, LevelStatus, MonitorType,
    OrderSide, OrderType, StrategyLevel, StrategyStatus, TradeRecord, TradingStrategy,
    TriggerType, WebhookPayload,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bybit::{interpret_order_response, BybitClient, OrderOutcome};
use crate::config::CONFIG;
use crate::executor::{
    ExecutionQueue, ExecutionTask, TriggerContext, EXECUTIONS_TOTAL, LINKED_TRIGGERS_TOTAL,
    ORDERS_PLACED_TOTAL, WEBHOOKS_RECEIVED_TOTAL,
};
use crate::monitor_client::MonitorClient;
use crate::plan::{build_monitor_specs, closing_monitors};
use crate::storage::Storage;

/// Incoming level definition for create/update requests.
#[derive(Debug, Deserialize)]
pub struct LevelInput {
    #[serde(default)]
    pub level_id: Option<String>,
    pub option_symbol: String,
    pub side: OrderSide,
    pub quantity: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_price: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub trigger_level_id: Option<String>,
    #[serde(default)]
    pub trigger_level_event: Option<MonitorType>,
}

impl LevelInput {
    pub fn validate(&self) -> Result<(), String> {
        parse_option_symbol(&self.option_symbol).map_err(|e| e.to_string())?;
        if matches!(self.trigger_type, TriggerType::Conditional | TriggerType::BtcPrice)
            && self.trigger_price.is_none()
        {
            return Err("conditional and btc_price levels require trigger_price".into());
        }
        if self.order_type == OrderType::Limit && self.limit_price.is_none() {
            return Err("limit orders require limit_price".into());
        }
        for (name, value) in [
            ("trigger_price", self.trigger_price),
            ("take_profit", self.take_profit),
            ("stop_loss", self.stop_loss),
            ("limit_price", self.limit_price),
        ] {
            if let Some(value) = value {
                if value <= 0.0 {
                    return Err(format!("{name} must be greater than 0"));
                }
            }
        }
        Ok(())
    }

    fn into_level(self) -> StrategyLevel {
        StrategyLevel {
            level_id: self
                .level_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            option_symbol: self.option_symbol,
            side: self.side,
            quantity: self.quantity,
            trigger_type: self.trigger_type,
            trigger_price: self.trigger_price,
            take_profit: self.take_profit,
            stop_loss: self.stop_loss,
            order_type: self.order_type,
            limit_price: self.limit_price,
            status: LevelStatus::Pending,
            trigger_level_id: self.trigger_level_id,
            trigger_level_event: self.trigger_level_event,
            monitor_task_ids: BTreeMap::new(),
            executions: Vec::new(),
            last_update: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StrategyRequest {
    #[serde(default)]
    pub strategy_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<StrategyStatus>,
    #[serde(default)]
    pub levels: Vec<LevelInput>,
}

impl StrategyRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        for level in &self.levels {
            level.validate()?;
        }
        Ok(())
    }
}

/// How a webhook delivery was resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Enqueued,
    Ignored(&'static str),
    NotFound,
}

/// Orchestrates strategy persistence, monitor synchronization and level
/// execution. Handlers share one instance behind an `Arc`.
pub struct StrategyService {
    storage: Arc<Storage>,
    monitor: MonitorClient,
    bybit: BybitClient,
    queue: ExecutionQueue,
    webhook_url: String,
}

impl StrategyService {
    pub fn new(
        storage: Arc<Storage>,
        monitor: MonitorClient,
        bybit: BybitClient,
        queue: ExecutionQueue,
        webhook_base: &str,
    ) -> Self {
        Self {
            storage,
            monitor,
            bybit,
            queue,
            webhook_url: format!(
                "{}/api/strategies/webhook",
                webhook_base.trim_end_matches('/')
            ),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // -- strategy CRUD ---------------------------------------------------

    pub fn list_strategies(&self) -> Result<Vec<TradingStrategy>> {
        self.storage.load_strategies()
    }

    pub fn get_strategy(&self, strategy_id: &str) -> Result<Option<TradingStrategy>> {
        self.storage.get_strategy(strategy_id)
    }

    pub async fn create_strategy(&self, request: StrategyRequest) -> Result<TradingStrategy> {
        let now = Utc::now();
        let mut strategy = TradingStrategy {
            strategy_id: request
                .strategy_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: request.name,
            description: request.description,
            status: request.status.unwrap_or(StrategyStatus::Running),
            levels: request.levels.into_iter().map(LevelInput::into_level).collect(),
            created_at: now,
            updated_at: now,
        };
        self.storage.upsert_strategy(&strategy)?;
        info!(
            strategy_id = %strategy.strategy_id,
            levels = strategy.levels.len(),
            "Created strategy"
        );
        self.sync_monitors(&mut strategy).await?;
        Ok(strategy)
    }

    pub async fn update_strategy(
        &self,
        strategy_id: &str,
        request: StrategyRequest,
    ) -> Result<Option<TradingStrategy>> {
        let Some(mut strategy) = self.storage.get_strategy(strategy_id)? else {
            return Ok(None);
        };

        strategy.name = request.name;
        strategy.description = request.description;
        if let Some(status) = request.status {
            strategy.status = status;
        }

        // Surviving levels keep their execution history and live monitors;
        // removed levels get their monitors cancelled.
        let mut existing: BTreeMap<String, StrategyLevel> = strategy
            .levels
            .drain(..)
            .map(|level| (level.level_id.clone(), level))
            .collect();
        let mut levels = Vec::new();
        for input in request.levels {
            let incoming_id = input.level_id.clone();
            let mut level = input.into_level();
            if let Some(previous) = incoming_id.and_then(|id| existing.remove(&id)) {
                level.monitor_task_ids = previous.monitor_task_ids;
                level.executions = previous.executions;
                level.status = previous.status;
            }
            levels.push(level);
        }
        for (_, mut removed) in existing {
            self.cancel_level_monitors(&mut removed).await;
        }
        strategy.levels = levels;
        strategy.updated_at = Utc::now();

        self.storage.upsert_strategy(&strategy)?;
        self.sync_monitors(&mut strategy).await?;
        Ok(Some(strategy))
    }

    pub async fn delete_strategy(&self, strategy_id: &str) -> Result<bool> {
        let Some(mut strategy) = self.storage.get_strategy(strategy_id)? else {
            return Ok(false);
        };
        for level in &mut strategy.levels {
            self.cancel_level_monitors(level).await;
        }
        let removed = self.storage.delete_strategy(strategy_id)?;
        info!(strategy_id = %strategy_id, "Deleted strategy");
        Ok(removed)
    }

    // -- lifecycle -------------------------------------------------------

    pub async fn pause_strategy(&self, strategy_id: &str) -> Result<Option<TradingStrategy>> {
        let Some(mut strategy) = self.storage.get_strategy(strategy_id)? else {
            return Ok(None);
        };
        strategy.status = StrategyStatus::Paused;
        for level in &mut strategy.levels {
            self.cancel_level_monitors(level).await;
            if level.status == LevelStatus::Monitoring {
                level.status = LevelStatus::Pending;
            }
        }
        strategy.updated_at = Utc::now();
        self.storage.upsert_strategy(&strategy)?;
        info!(strategy_id = %strategy_id, "Paused strategy");
        Ok(Some(strategy))
    }

    pub async fn resume_strategy(&self, strategy_id: &str) -> Result<Option<TradingStrategy>> {
        let Some(mut strategy) = self.storage.get_strategy(strategy_id)? else {
            return Ok(None);
        };
        strategy.status = StrategyStatus::Running;
        strategy.updated_at = Utc::now();
        self.storage.upsert_strategy(&strategy)?;
        self.sync_monitors(&mut strategy).await?;
        info!(strategy_id = %strategy_id, "Resumed strategy");
        Ok(Some(strategy))
    }

    pub async fn stop_strategy(&self, strategy_id: &str) -> Result<Option<TradingStrategy>> {
        let Some(mut strategy) = self.storage.get_strategy(strategy_id)? else {
            return Ok(None);
        };
        strategy.status = StrategyStatus::Stopped;
        for level in &mut strategy.levels {
            self.cancel_level_monitors(level).await;
            if !level.is_terminal() {
                level.status = LevelStatus::Cancelled;
            }
        }
        strategy.updated_at = Utc::now();
        self.storage.upsert_strategy(&strategy)?;
        info!(strategy_id = %strategy_id, "Stopped strategy");
        Ok(Some(strategy))
    }

    // -- monitor synchronization -----------------------------------------

    /// Re-issue monitor creation for every running strategy. Monitor tasks
    /// are not recovered from disk across restarts; strategy state is the
    /// source of truth.
    pub async fn resync_all(&self) -> Result<()> {
        for mut strategy in self.storage.load_strategies()? {
            if strategy.status == StrategyStatus::Running {
                self.sync_monitors(&mut strategy).await?;
            }
        }
        Ok(())
    }

    /// Reconcile monitor tasks with the strategy definition. Levels with
    /// live tasks get them cancelled and recreated so stale targets never
    /// survive an update; task ids are deterministic, so a double sync
    /// converges to the same set.
    pub async fn sync_monitors(&self, strategy: &mut TradingStrategy) -> Result<()> {
        if strategy.status != StrategyStatus::Running {
            info!(
                strategy_id = %strategy.strategy_id,
                status = %strategy.status,
                "Strategy not running, skip monitor sync"
            );
            return Ok(());
        }

        let strategy_id = strategy.strategy_id.clone();
        for level in &mut strategy.levels {
            if level.is_terminal() {
                continue;
            }

            let entry_executed = level.entry_executed();
            let plan = build_monitor_specs(level, entry_executed);

            if level.trigger_type == TriggerType::BtcPrice
                && plan.status == Some(LevelStatus::Pending)
            {
                warn!(
                    level_id = %level.level_id,
                    option_symbol = %level.option_symbol,
                    "btc_price trigger on a non-BTC option symbol; level left pending"
                );
            }
            if let Some(status) = plan.status {
                level.status = status;
            }
            if plan.enqueue_entry {
                self.queue.enqueue(ExecutionTask {
                    strategy_id: strategy_id.clone(),
                    level_id: level.level_id.clone(),
                    monitor_type: MonitorType::Entry,
                    trigger: TriggerContext {
                        target_price: level.limit_price,
                        trigger_price: level.limit_price,
                        trigger_direction: "immediate".into(),
                    },
                });
            }

            if !plan.specs.is_empty() {
                if !level.monitor_task_ids.is_empty() {
                    self.cancel_level_monitors(level).await;
                }
                match self
                    .monitor
                    .sync_level_tasks(
                        &strategy_id,
                        &level.level_id,
                        &canonical_option_symbol(&level.option_symbol),
                        &plan.specs,
                        &self.webhook_url,
                        CONFIG.monitor_task_timeout_hours,
                    )
                    .await
                {
                    Ok(task_ids) => level.monitor_task_ids = task_ids,
                    Err(e) => error!(
                        level_id = %level.level_id,
                        "Failed to sync monitor tasks: {e:#}"
                    ),
                }
            }
            level.last_update = Utc::now();
        }

        strategy.updated_at = Utc::now();
        self.storage.upsert_strategy(strategy)?;
        Ok(())
    }

    async fn cancel_level_monitors(&self, level: &mut StrategyLevel) {
        for task_id in level.monitor_task_ids.values() {
            if let Err(e) = self.monitor.delete_task(task_id).await {
                error!(task_id = %task_id, "Failed to delete monitor task: {e:#}");
            }
        }
        level.monitor_task_ids.clear();
    }

    async fn ensure_post_entry_monitors(&self, strategy_id: &str, level: &mut StrategyLevel) {
        let specs = closing_monitors(level);
        if specs.is_empty() {
            return;
        }
        match self
            .monitor
            .sync_level_tasks(
                strategy_id,
                &level.level_id,
                &canonical_option_symbol(&level.option_symbol),
                &specs,
                &self.webhook_url,
                CONFIG.monitor_task_timeout_hours,
            )
            .await
        {
            Ok(task_ids) => level.monitor_task_ids.extend(task_ids),
            Err(e) => error!(
                level_id = %level.level_id,
                "Failed to create post-entry monitors: {e:#}"
            ),
        }
    }

    // -- webhook ingestion -----------------------------------------------

    /// Resolve a monitor webhook to a strategy level and enqueue execution.
    /// Terminal levels and non-running strategies ignore the event, which
    /// makes redelivery harmless.
    pub fn handle_webhook(&self, payload: &WebhookPayload) -> Result<WebhookOutcome> {
        let (Some(strategy_id), Some(level_id), Some(monitor_type)) = (
            payload.strategy_id.as_deref(),
            payload.level_id.as_deref(),
            payload.monitor_type,
        ) else {
            warn!(task_id = %payload.task_id, "Webhook without strategy attribution");
            return Ok(WebhookOutcome::NotFound);
        };

        let Some(strategy) = self.storage.get_strategy(strategy_id)? else {
            error!("Webhook strategy not found: {strategy_id}");
            return Ok(WebhookOutcome::NotFound);
        };
        let Some(level) = strategy.level(level_id) else {
            error!("Webhook level not found: {strategy_id}/{level_id}");
            return Ok(WebhookOutcome::NotFound);
        };

        WEBHOOKS_RECEIVED_TOTAL.inc();

        if strategy.status != StrategyStatus::Running {
            info!(strategy_id, "Strategy not running, ignore webhook");
            return Ok(WebhookOutcome::Ignored("strategy not running"));
        }
        if level.is_terminal() {
            info!(level_id, "Level already finished, ignore webhook");
            return Ok(WebhookOutcome::Ignored("level already finished"));
        }

        let task = ExecutionTask {
            strategy_id: strategy_id.to_string(),
            level_id: level_id.to_string(),
            monitor_type,
            trigger: TriggerContext {
                target_price: Some(payload.target_price),
                trigger_price: Some(payload.triggered_price),
                trigger_direction: payload.trigger_direction.to_string(),
            },
        };
        if !self.queue.enqueue(task) {
            bail!("executor queue full");
        }
        Ok(WebhookOutcome::Enqueued)
    }

    // -- manual venue queries --------------------------------------------

    /// Mark/bid/ask snapshot for one option contract.
    pub async fn option_price(&self, symbol: &str) -> Result<Option<serde_json::Value>> {
        let canonical = canonical_option_symbol(symbol);
        let response = self.bybit.get_tickers("option", &canonical).await?;
        if response.ret_code != 0 {
            bail!("venue error: {}", response.ret_msg);
        }
        let Some(ticker) = response.result.pointer("/list/0") else {
            return Ok(None);
        };
        let field = |name: &str| {
            ticker
                .get(name)
                .and_then(serde_json::Value::as_str)
                .and_then(|raw| raw.parse::<f64>().ok())
        };
        Ok(Some(serde_json::json!({
            "symbol": canonical,
            "mark_price": field("markPrice"),
            "bid_price": field("bid1Price"),
            "ask_price": field("ask1Price"),
        })))
    }

    pub async fn account_balance(&self) -> Result<serde_json::Value> {
        let response = self.bybit.get_wallet_balance().await?;
        if response.ret_code != 0 {
            bail!("venue error: {}", response.ret_msg);
        }
        Ok(response.result)
    }

    /// Manual cancel for an order placed by the executor.
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<&str>,
        order_link_id: Option<&str>,
    ) -> Result<OrderOutcome> {
        let canonical = canonical_option_symbol(symbol);
        let response = self
            .bybit
            .cancel_order(&canonical, order_id, order_link_id)
            .await?;
        if response.ret_code != 0 {
            return Ok(OrderOutcome::failure(response.ret_msg));
        }
        Ok(OrderOutcome {
            success: true,
            message: "order cancelled".into(),
            order_id: order_id.map(str::to_string),
            order_link_id: order_link_id.map(str::to_string),
        })
    }

    // -- execution -------------------------------------------------------

    /// Runs one queued task against the venue and applies the resulting
    /// level transition. Invoked only from the single executor worker.
    pub async fn execute_task(&self, task: &ExecutionTask) -> Result<()> {
        let Some(strategy) = self.storage.get_strategy(&task.strategy_id)? else {
            warn!(strategy_id = %task.strategy_id, "Strategy gone; dropping task");
            return Ok(());
        };
        let Some(mut level) = strategy.level(&task.level_id).cloned() else {
            warn!(level_id = %task.level_id, "Level gone; dropping task");
            return Ok(());
        };

        if level.is_terminal() {
            info!(level_id = %level.level_id, "Level already terminal; skipping execution");
            return Ok(());
        }
        // A redelivered entry webhook must not double the position.
        if task.monitor_type == MonitorType::Entry && level.entry_executed() {
            info!(level_id = %level.level_id, "Entry already executed; skipping duplicate");
            return Ok(());
        }

        level.status = LevelStatus::Executing;
        self.storage.update_level(&task.strategy_id, &level)?;

        // Entries trade the configured side; TP/SL close the position.
        let side = if task.monitor_type == MonitorType::Entry {
            level.side
        } else {
            level.side.opposite()
        };
        let symbol = canonical_option_symbol(&level.option_symbol);
        let order_price = match level.order_type {
            OrderType::Limit => level.limit_price.map(|price| price.to_string()),
            OrderType::Market => None,
        };

        ORDERS_PLACED_TOTAL.with_label_values(&[side.as_venue()]).inc();
        let outcome = match self
            .bybit
            .place_order(&symbol, side, level.order_type, &level.quantity, order_price.as_deref())
            .await
        {
            Ok(response) => interpret_order_response(&response),
            Err(e) => {
                error!(symbol = %symbol, "Order request failed: {e:#}");
                OrderOutcome::failure(e.to_string())
            }
        };
        EXECUTIONS_TOTAL
            .with_label_values(&[if outcome.success { "success" } else { "failed" }])
            .inc();

        let mut linked_event = None;
        if task.monitor_type == MonitorType::Entry {
            if outcome.success {
                level.monitor_task_ids.remove(&MonitorType::Entry);
                if level.take_profit.is_some() || level.stop_loss.is_some() {
                    level.status = LevelStatus::Monitoring;
                    self.ensure_post_entry_monitors(&task.strategy_id, &mut level).await;
                } else {
                    level.status = LevelStatus::Completed;
                    self.cancel_level_monitors(&mut level).await;
                }
            } else {
                level.status = LevelStatus::Failed;
            }
        } else if outcome.success {
            level.status = LevelStatus::Completed;
            self.cancel_level_monitors(&mut level).await;
            linked_event = Some(task.monitor_type);
        } else {
            level.status = LevelStatus::Failed;
        }

        let record = LevelExecutionRecord {
            execution_id: Uuid::new_v4().to_string(),
            monitor_type: task.monitor_type,
            triggered_price: task.trigger.trigger_price,
            target_price: task.trigger.target_price,
            trigger_direction: task.trigger.trigger_direction.clone(),
            side,
            quantity: level.quantity.clone(),
            order_type: level.order_type,
            order_price,
            success: outcome.success,
            message: outcome.message.clone(),
            order_id: outcome.order_id.clone(),
            order_link_id: outcome.order_link_id.clone(),
            created_at: Utc::now(),
        };
        level.last_update = record.created_at;
        level.executions.push(record.clone());
        self.storage.update_level(&task.strategy_id, &level)?;

        self.storage.append_trade(&TradeRecord {
            strategy_id: task.strategy_id.clone(),
            level_id: level.level_id.clone(),
            monitor_type: task.monitor_type,
            option_symbol: level.option_symbol.clone(),
            side,
            quantity: level.quantity.clone(),
            order_type: level.order_type,
            trigger_price: task.trigger.trigger_price,
            target_price: task.trigger.target_price,
            success: outcome.success,
            message: outcome.message,
            order_id: record.order_id,
            order_link_id: record.order_link_id,
            created_at: record.created_at,
        })?;

        // Chained levels join the queue only after the parent's completion
        // has been written.
        if let Some(event) = linked_event {
            self.trigger_linked_levels(&task.strategy_id, &task.level_id, event)?;
        }
        Ok(())
    }

    /// Release `level_close` levels whose parent fired the matching event.
    fn trigger_linked_levels(
        &self,
        strategy_id: &str,
        completed_level_id: &str,
        event: MonitorType,
    ) -> Result<()> {
        let Some(mut strategy) = self.storage.get_strategy(strategy_id)? else {
            return Ok(());
        };

        let mut to_enqueue = Vec::new();
        for level in &mut strategy.levels {
            if level.trigger_type != TriggerType::LevelClose {
                continue;
            }
            if level.trigger_level_id.as_deref() != Some(completed_level_id) {
                continue;
            }
            if let Some(required) = level.trigger_level_event {
                if required != event {
                    continue;
                }
            }
            if matches!(
                level.status,
                LevelStatus::Completed
                    | LevelStatus::Failed
                    | LevelStatus::Cancelled
                    | LevelStatus::Executing
                    | LevelStatus::Monitoring
            ) {
                continue;
            }

            level.status = LevelStatus::Monitoring;
            level.last_update = Utc::now();
            LINKED_TRIGGERS_TOTAL.inc();
            info!(
                level_id = %level.level_id,
                parent = %completed_level_id,
                event = %event,
                "Linked level released"
            );
            to_enqueue.push(ExecutionTask {
                strategy_id: strategy_id.to_string(),
                level_id: level.level_id.clone(),
                monitor_type: MonitorType::Entry,
                trigger: TriggerContext {
                    target_price: level.limit_price,
                    trigger_price: level.limit_price,
                    trigger_direction: event.to_string().to_lowercase(),
                },
            });
        }

        if !to_enqueue.is_empty() {
            self.storage.upsert_strategy(&strategy)?;
            for task in to_enqueue {
                self.queue.enqueue(task);
            }
        }
        Ok(())
    }
}
