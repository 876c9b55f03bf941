// shared-models/src/strategy.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::MonitorType;

/// Lifecycle status for a trading strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    #[default]
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyStatus::Running => write!(f, "running"),
            StrategyStatus::Paused => write!(f, "paused"),
            StrategyStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Execution status for an individual level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelStatus {
    #[default]
    Pending,
    /// Waiting for a linked level to fire its trigger event.
    Waiting,
    Monitoring,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl LevelStatus {
    /// Terminal states cannot be left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LevelStatus::Completed | LevelStatus::Failed | LevelStatus::Cancelled
        )
    }
}

impl std::fmt::Display for LevelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelStatus::Pending => write!(f, "pending"),
            LevelStatus::Waiting => write!(f, "waiting"),
            LevelStatus::Monitoring => write!(f, "monitoring"),
            LevelStatus::Executing => write!(f, "executing"),
            LevelStatus::Completed => write!(f, "completed"),
            LevelStatus::Failed => write!(f, "failed"),
            LevelStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a level's entry is initiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Enqueue the entry order as soon as the strategy activates.
    Immediate,
    /// Entry monitor on the option symbol itself at `trigger_price`.
    Conditional,
    /// Entry monitor on the base-coin spot symbol at `trigger_price`.
    BtcPrice,
    /// No entry order; go straight to TP/SL monitoring of an open position.
    ExistingPosition,
    /// Entry fires when another level completes a designated monitor event.
    LevelClose,
}

/// Order side as the strategy author writes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Venue wire casing.
    pub fn as_venue(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Venue order type; serialized with venue casing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

impl OrderType {
    pub fn as_venue(&self) -> &'static str {
        match self {
            OrderType::Market => "Market",
            OrderType::Limit => "Limit",
        }
    }
}

fn default_now() -> DateTime<Utc> {
    Utc::now()
}

/// Execution log entry for one handled webhook / order attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelExecutionRecord {
    pub execution_id: String,
    pub monitor_type: MonitorType,
    pub triggered_price: Option<f64>,
    pub target_price: Option<f64>,
    #[serde(default)]
    pub trigger_direction: String,
    pub side: OrderSide,
    pub quantity: String,
    pub order_type: OrderType,
    pub order_price: Option<String>,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_link_id: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

/// One actionable level inside a trading strategy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyLevel {
    pub level_id: String,
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
    pub status: LevelStatus,
    #[serde(default)]
    pub trigger_level_id: Option<String>,
    /// TP or SL of the linked level; `None` means either event triggers.
    #[serde(default)]
    pub trigger_level_event: Option<MonitorType>,
    /// At most one live monitor task per monitor type.
    #[serde(default)]
    pub monitor_task_ids: BTreeMap<MonitorType, String>,
    /// Append-only, chronological.
    #[serde(default)]
    pub executions: Vec<LevelExecutionRecord>,
    #[serde(default = "default_now")]
    pub last_update: DateTime<Utc>,
}

impl StrategyLevel {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a successful entry order has ever been recorded.
    pub fn entry_executed(&self) -> bool {
        self.executions
            .iter()
            .any(|record| record.monitor_type == MonitorType::Entry && record.success)
    }
}

/// Full strategy definition. Owning entity for its levels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradingStrategy {
    pub strategy_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: StrategyStatus,
    #[serde(default)]
    pub levels: Vec<StrategyLevel>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_now")]
    pub updated_at: DateTime<Utc>,
}

impl TradingStrategy {
    pub fn level(&self, level_id: &str) -> Option<&StrategyLevel> {
        self.levels.iter().find(|level| level.level_id == level_id)
    }

    pub fn level_mut(&mut self, level_id: &str) -> Option<&mut StrategyLevel> {
        self.levels
            .iter_mut()
            .find(|level| level.level_id == level_id)
    }
}

/// Immutable trade-log entry, one per execution attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeRecord {
    pub strategy_id: String,
    pub level_id: String,
    pub monitor_type: MonitorType,
    pub option_symbol: String,
    pub side: OrderSide,
    pub quantity: String,
    pub order_type: OrderType,
    pub trigger_price: Option<f64>,
    pub target_price: Option<f64>,
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_link_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_level() -> StrategyLevel {
        StrategyLevel {
            level_id: "l-1".into(),
            option_symbol: "BTC-27DEC25-100000-C".into(),
            side: OrderSide::Buy,
            quantity: "0.1".into(),
            trigger_type: TriggerType::Conditional,
            trigger_price: Some(50.0),
            take_profit: Some(80.0),
            stop_loss: Some(40.0),
            order_type: OrderType::Market,
            limit_price: None,
            status: LevelStatus::Pending,
            trigger_level_id: None,
            trigger_level_event: None,
            monitor_task_ids: BTreeMap::new(),
            executions: Vec::new(),
            last_update: Utc::now(),
        }
    }

    #[test]
    fn strategy_roundtrip_is_identity() {
        let mut level = sample_level();
        level
            .monitor_task_ids
            .insert(MonitorType::Entry, "strategy-s-1-l-1-ENTRY".into());
        level.executions.push(LevelExecutionRecord {
            execution_id: "e-1".into(),
            monitor_type: MonitorType::Entry,
            triggered_price: Some(50.2),
            target_price: Some(50.0),
            trigger_direction: "up_cross".into(),
            side: OrderSide::Buy,
            quantity: "0.1".into(),
            order_type: OrderType::Market,
            order_price: None,
            success: true,
            message: "ok".into(),
            order_id: Some("oid".into()),
            order_link_id: Some("olid".into()),
            created_at: Utc::now(),
        });
        let strategy = TradingStrategy {
            strategy_id: "s-1".into(),
            name: "ladder".into(),
            description: "test".into(),
            status: StrategyStatus::Running,
            levels: vec![level],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&strategy).unwrap();
        let back: TradingStrategy = serde_json::from_str(&json).unwrap();
        let rejson = serde_json::to_string(&back).unwrap();
        assert_eq!(json, rejson);
        assert_eq!(back.levels[0].monitor_task_ids.len(), 1);
        assert!(back.levels[0].entry_executed());
    }

    #[test]
    fn trigger_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&TriggerType::BtcPrice).unwrap(),
            "\"btc_price\""
        );
        assert_eq!(
            serde_json::to_string(&TriggerType::LevelClose).unwrap(),
            "\"level_close\""
        );
        assert!(serde_json::from_str::<TriggerType>("\"on_expiry\"").is_err());
    }

    #[test]
    fn level_defaults_on_decode() {
        let level: StrategyLevel = serde_json::from_str(
            r#"{
                "level_id": "l-9",
                "option_symbol": "ETH-27DEC25-4000-P",
                "side": "sell",
                "quantity": "1",
                "trigger_type": "immediate"
            }"#,
        )
        .unwrap();
        assert_eq!(level.status, LevelStatus::Pending);
        assert_eq!(level.order_type, OrderType::Market);
        assert!(level.monitor_task_ids.is_empty());
        assert!(level.executions.is_empty());
        assert!(!level.entry_executed());
    }

    #[test]
    fn terminal_statuses() {
        assert!(LevelStatus::Completed.is_terminal());
        assert!(LevelStatus::Failed.is_terminal());
        assert!(LevelStatus::Cancelled.is_terminal());
        assert!(!LevelStatus::Waiting.is_terminal());
        assert!(!LevelStatus::Executing.is_terminal());
    }

    #[test]
    fn side_mapping() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
        assert_eq!(OrderSide::Buy.as_venue(), "Buy");
    }
}
