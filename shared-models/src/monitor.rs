// shared-models/src/monitor.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which market feed a monitor task watches. Spot triggers still describe
/// the parent option contract via `option_info`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    #[default]
    Option,
    Spot,
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentType::Option => write!(f, "option"),
            InstrumentType::Spot => write!(f, "spot"),
        }
    }
}

/// Lifecycle of a monitor task. Transitions are monotone: a task leaves
/// `Active` exactly once and never returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Active,
    Triggered,
    Expired,
    Cancelled,
}

impl TaskStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Active)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Active => write!(f, "active"),
            TaskStatus::Triggered => write!(f, "triggered"),
            TaskStatus::Expired => write!(f, "expired"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Role a monitor plays for its level.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorType {
    Entry,
    TakeProfit,
    StopLoss,
}

impl MonitorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorType::Entry => "ENTRY",
            MonitorType::TakeProfit => "TAKE_PROFIT",
            MonitorType::StopLoss => "STOP_LOSS",
        }
    }
}

impl std::fmt::Display for MonitorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of travel through the target price.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDirection {
    UpCross,
    DownCross,
}

impl std::fmt::Display for TriggerDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerDirection::UpCross => write!(f, "up_cross"),
            TriggerDirection::DownCross => write!(f, "down_cross"),
        }
    }
}

/// Call or put leg of an option contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

/// Parsed description of an option contract, e.g. `BTC-27DEC25-100000-C`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionInfo {
    pub symbol: String,
    pub base_coin: String,
    pub strike_price: f64,
    pub expiry_date: String,
    pub option_type: OptionKind,
}

/// One (symbol, target price) watch with a webhook sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorTask {
    pub task_id: String,
    pub option_info: OptionInfo,
    pub monitor_symbol: String,
    #[serde(default)]
    pub monitor_instrument: InstrumentType,
    pub target_price: f64,
    pub webhook_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub previous_price: Option<f64>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub level_id: Option<String>,
    #[serde(default)]
    pub monitor_type: Option<MonitorType>,
    #[serde(default)]
    pub metadata: Value,
}

impl MonitorTask {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// A single observed price, delivered by the streaming subscriber or the
/// spot poller onto the monitor service's channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Body POSTed to `webhook_url` when a task triggers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub task_id: String,
    pub option_symbol: String,
    pub monitor_symbol: String,
    pub monitor_instrument: InstrumentType,
    pub target_price: f64,
    pub triggered_price: f64,
    pub previous_price: f64,
    pub trigger_direction: TriggerDirection,
    pub triggered_at: String,
    #[serde(default)]
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub level_id: Option<String>,
    #[serde(default)]
    pub monitor_type: Option<MonitorType>,
    #[serde(default)]
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_task() -> MonitorTask {
        let now = Utc::now();
        MonitorTask {
            task_id: "t-1".into(),
            option_info: OptionInfo {
                symbol: "BTC-27DEC25-100000-C-USDT".into(),
                base_coin: "BTC".into(),
                strike_price: 100000.0,
                expiry_date: "27DEC25".into(),
                option_type: OptionKind::Call,
            },
            monitor_symbol: "BTC-27DEC25-100000-C-USDT".into(),
            monitor_instrument: InstrumentType::Option,
            target_price: 100.0,
            webhook_url: "http://localhost:8080/api/strategies/webhook".into(),
            created_at: now,
            expires_at: now + Duration::hours(24),
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

    #[test]
    fn monitor_task_roundtrip() {
        let task = sample_task();
        let json = serde_json::to_string(&task).unwrap();
        let back: MonitorTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, task.task_id);
        assert_eq!(back.status, task.status);
        assert_eq!(back.monitor_instrument, task.monitor_instrument);
        assert_eq!(back.monitor_type, task.monitor_type);
        assert_eq!(back.expires_at, task.expires_at);
    }

    #[test]
    fn monitor_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&MonitorType::TakeProfit).unwrap(),
            "\"TAKE_PROFIT\""
        );
        let parsed: MonitorType = serde_json::from_str("\"STOP_LOSS\"").unwrap();
        assert_eq!(parsed, MonitorType::StopLoss);
    }

    #[test]
    fn unknown_enum_variant_rejected() {
        assert!(serde_json::from_str::<TaskStatus>("\"paused\"").is_err());
        assert!(serde_json::from_str::<MonitorType>("\"TRAILING_STOP\"").is_err());
        assert!(serde_json::from_str::<TriggerDirection>("\"sideways\"").is_err());
    }

    #[test]
    fn expiry_check_uses_deadline() {
        let task = sample_task();
        assert!(!task.is_expired_at(Utc::now()));
        assert!(task.is_expired_at(Utc::now() + Duration::hours(25)));
    }
}
