// strategy_engine/src/storage.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_models::{StrategyLevel, TradeRecord, TradingStrategy};

use crate::config::CONFIG;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StrategiesFile {
    #[serde(default)]
    strategies: Vec<TradingStrategy>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TradesFile {
    #[serde(default)]
    trades: Vec<TradeRecord>,
}

/// Persistent application settings, kept beside the strategy documents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_true")]
    pub is_testnet: bool,
    #[serde(default = "default_monitor_base")]
    pub price_monitor_base: String,
    #[serde(default = "default_webhook_base")]
    pub strategy_webhook_base: String,
}

fn default_true() -> bool {
    true
}

fn default_monitor_base() -> String {
    "http://localhost:8888".to_string()
}

fn default_webhook_base() -> String {
    "http://localhost:8080".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: CONFIG.bybit_api_key.clone(),
            api_secret: CONFIG.bybit_api_secret.clone(),
            is_testnet: true,
            price_monitor_base: CONFIG.price_monitor_base.clone(),
            strategy_webhook_base: CONFIG.webhook_base.clone(),
        }
    }
}

/// JSON document store. One lock per file; writes replace the document via a
/// temp file and atomic rename; reads fully re-parse.
pub struct Storage {
    strategies_path: PathBuf,
    trades_path: PathBuf,
    settings_path: PathBuf,
    watchlist_path: PathBuf,
    strategies_lock: Mutex<()>,
    trades_lock: Mutex<()>,
    settings_lock: Mutex<()>,
    watchlist_lock: Mutex<()>,
}

impl Storage {
    pub fn new(data_dir: &str) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {data_dir}"))?;
        let dir = PathBuf::from(data_dir);
        Ok(Self {
            strategies_path: dir.join("strategies.json"),
            trades_path: dir.join("trades.json"),
            settings_path: dir.join("settings.json"),
            watchlist_path: dir.join("watchlist.json"),
            strategies_lock: Mutex::new(()),
            trades_lock: Mutex::new(()),
            settings_lock: Mutex::new(()),
            watchlist_lock: Mutex::new(()),
        })
    }

    // -- strategies ------------------------------------------------------
    //
    // Read-modify-write cycles hold the file lock for their whole duration
    // so concurrent request handlers cannot lose each other's updates.

    fn read_strategies(&self) -> Result<Vec<TradingStrategy>> {
        let file: StrategiesFile = read_document(&self.strategies_path)?;
        Ok(file.strategies)
    }

    fn write_strategies(&self, strategies: &[TradingStrategy]) -> Result<()> {
        write_document(
            &self.strategies_path,
            &StrategiesFile {
                strategies: strategies.to_vec(),
            },
        )
    }

    pub fn load_strategies(&self) -> Result<Vec<TradingStrategy>> {
        let _guard = self.strategies_lock.lock().expect("strategies lock poisoned");
        self.read_strategies()
    }

    pub fn get_strategy(&self, strategy_id: &str) -> Result<Option<TradingStrategy>> {
        Ok(self
            .load_strategies()?
            .into_iter()
            .find(|strategy| strategy.strategy_id == strategy_id))
    }

    pub fn upsert_strategy(&self, strategy: &TradingStrategy) -> Result<()> {
        let _guard = self.strategies_lock.lock().expect("strategies lock poisoned");
        let mut strategies = self.read_strategies()?;
        match strategies
            .iter_mut()
            .find(|existing| existing.strategy_id == strategy.strategy_id)
        {
            Some(existing) => *existing = strategy.clone(),
            None => strategies.push(strategy.clone()),
        }
        self.write_strategies(&strategies)
    }

    pub fn delete_strategy(&self, strategy_id: &str) -> Result<bool> {
        let _guard = self.strategies_lock.lock().expect("strategies lock poisoned");
        let mut strategies = self.read_strategies()?;
        let before = strategies.len();
        strategies.retain(|strategy| strategy.strategy_id != strategy_id);
        let removed = strategies.len() != before;
        if removed {
            self.write_strategies(&strategies)?;
        }
        Ok(removed)
    }

    pub fn update_level(&self, strategy_id: &str, level: &StrategyLevel) -> Result<bool> {
        let _guard = self.strategies_lock.lock().expect("strategies lock poisoned");
        let mut strategies = self.read_strategies()?;
        let Some(strategy) = strategies
            .iter_mut()
            .find(|strategy| strategy.strategy_id == strategy_id)
        else {
            return Ok(false);
        };
        match strategy
            .levels
            .iter_mut()
            .find(|existing| existing.level_id == level.level_id)
        {
            Some(existing) => *existing = level.clone(),
            None => strategy.levels.push(level.clone()),
        }
        self.write_strategies(&strategies)?;
        Ok(true)
    }

    // -- trade log -------------------------------------------------------

    pub fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        let _guard = self.trades_lock.lock().expect("trades lock poisoned");
        let mut file: TradesFile = read_document(&self.trades_path)?;
        file.trades.push(record.clone());
        write_document(&self.trades_path, &file)
    }

    pub fn load_trades(&self, limit: Option<usize>) -> Result<Vec<TradeRecord>> {
        let _guard = self.trades_lock.lock().expect("trades lock poisoned");
        let file: TradesFile = read_document(&self.trades_path)?;
        let mut trades = file.trades;
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            trades.truncate(limit);
        }
        Ok(trades)
    }

    // -- settings --------------------------------------------------------

    pub fn load_settings(&self) -> AppSettings {
        let _guard = self.settings_lock.lock().expect("settings lock poisoned");
        if !self.settings_path.exists() {
            return AppSettings::default();
        }
        fs::read_to_string(&self.settings_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        let _guard = self.settings_lock.lock().expect("settings lock poisoned");
        write_document(&self.settings_path, settings)
    }

    /// Merge a JSON patch into the current settings and persist the result.
    pub fn update_settings(&self, patch: &Value) -> Result<AppSettings> {
        let mut current = serde_json::to_value(self.load_settings())?;
        if let (Some(target), Some(source)) = (current.as_object_mut(), patch.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        let settings: AppSettings = serde_json::from_value(current)?;
        self.save_settings(&settings)?;
        Ok(settings)
    }

    // -- watchlist -------------------------------------------------------

    pub fn load_watchlist(&self) -> Vec<Value> {
        let _guard = self.watchlist_lock.lock().expect("watchlist lock poisoned");
        if !self.watchlist_path.exists() {
            return Vec::new();
        }
        fs::read_to_string(&self.watchlist_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

fn read_document<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(document)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)
        .with_context(|| format!("Failed to write temp file {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use shared_models::{
        LevelStatus, MonitorType, OrderSide, OrderType, StrategyStatus, TriggerType,
    };

    fn storage() -> Storage {
        let dir = std::env::temp_dir().join(format!("engine-storage-{}", uuid::Uuid::new_v4()));
        Storage::new(&dir.to_string_lossy()).unwrap()
    }

    fn level(id: &str) -> StrategyLevel {
        StrategyLevel {
            level_id: id.into(),
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
            monitor_task_ids: Default::default(),
            executions: Vec::new(),
            last_update: Utc::now(),
        }
    }

    fn strategy(id: &str) -> TradingStrategy {
        TradingStrategy {
            strategy_id: id.into(),
            name: "ladder".into(),
            description: String::new(),
            status: StrategyStatus::Running,
            levels: vec![level("l-1")],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn trade(strategy_id: &str, created_at: chrono::DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            strategy_id: strategy_id.into(),
            level_id: "l-1".into(),
            monitor_type: MonitorType::Entry,
            option_symbol: "BTC-27DEC25-100000-C-USDT".into(),
            side: OrderSide::Buy,
            quantity: "0.1".into(),
            order_type: OrderType::Market,
            trigger_price: Some(50.0),
            target_price: Some(50.0),
            success: true,
            message: "ok".into(),
            order_id: None,
            order_link_id: None,
            created_at,
        }
    }

    #[test]
    fn strategies_upsert_and_delete() {
        let store = storage();
        assert!(store.load_strategies().unwrap().is_empty());

        store.upsert_strategy(&strategy("s-1")).unwrap();
        store.upsert_strategy(&strategy("s-2")).unwrap();
        assert_eq!(store.load_strategies().unwrap().len(), 2);

        let mut updated = strategy("s-1");
        updated.name = "renamed".into();
        store.upsert_strategy(&updated).unwrap();
        let loaded = store.get_strategy("s-1").unwrap().unwrap();
        assert_eq!(loaded.name, "renamed");
        assert_eq!(store.load_strategies().unwrap().len(), 2);

        assert!(store.delete_strategy("s-1").unwrap());
        assert!(!store.delete_strategy("s-1").unwrap());
        assert!(store.get_strategy("s-1").unwrap().is_none());
    }

    #[test]
    fn update_level_replaces_in_place() {
        let store = storage();
        store.upsert_strategy(&strategy("s-1")).unwrap();

        let mut changed = level("l-1");
        changed.status = LevelStatus::Monitoring;
        assert!(store.update_level("s-1", &changed).unwrap());

        let loaded = store.get_strategy("s-1").unwrap().unwrap();
        assert_eq!(loaded.levels.len(), 1);
        assert_eq!(loaded.levels[0].status, LevelStatus::Monitoring);

        assert!(!store.update_level("missing", &changed).unwrap());
    }

    #[test]
    fn trades_are_sorted_descending_with_limit() {
        let store = storage();
        let base = Utc::now();
        store.append_trade(&trade("old", base - Duration::hours(2))).unwrap();
        store.append_trade(&trade("new", base)).unwrap();
        store.append_trade(&trade("mid", base - Duration::hours(1))).unwrap();

        let all = store.load_trades(None).unwrap();
        let ids: Vec<&str> = all.iter().map(|t| t.strategy_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let limited = store.load_trades(Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].strategy_id, "new");
    }

    #[test]
    fn settings_merge_preserves_unpatched_fields() {
        let store = storage();
        let initial = store.load_settings();
        assert!(initial.is_testnet);

        let updated = store
            .update_settings(&serde_json::json!({"api_key": "k", "is_testnet": false}))
            .unwrap();
        assert_eq!(updated.api_key, "k");
        assert!(!updated.is_testnet);
        assert_eq!(updated.price_monitor_base, initial.price_monitor_base);

        // Reload from disk, not memory.
        let reloaded = store.load_settings();
        assert_eq!(reloaded.api_key, "k");
    }

    #[test]
    fn watchlist_defaults_to_empty() {
        let store = storage();
        assert!(store.load_watchlist().is_empty());
    }
}
