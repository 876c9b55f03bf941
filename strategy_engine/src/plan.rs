// strategy_engine/src/plan.rs
use serde_json::{json, Value};
use shared_models::{spot_symbol_for, InstrumentType, LevelStatus, MonitorType, StrategyLevel, TriggerType};

/// One monitor task to be created for a level.
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorSpec {
    pub monitor_type: MonitorType,
    pub target_price: f64,
    pub instrument: InstrumentType,
    pub monitor_symbol: Option<String>,
    pub metadata: Value,
}

impl MonitorSpec {
    fn option(monitor_type: MonitorType, target_price: f64) -> Self {
        Self {
            monitor_type,
            target_price,
            instrument: InstrumentType::Option,
            monitor_symbol: None,
            metadata: json!({}),
        }
    }
}

/// Outcome of planning one level's monitors.
#[derive(Clone, Debug, Default)]
pub struct MonitorPlan {
    pub specs: Vec<MonitorSpec>,
    /// Status the level should move to, when the trigger type dictates one.
    pub status: Option<LevelStatus>,
    /// Immediate entries bypass monitoring and go straight to the executor.
    pub enqueue_entry: bool,
}

/// Pure mapping from a level and its entry history to the monitor tasks it
/// needs. The caller reconciles the result against any live tasks.
pub fn build_monitor_specs(level: &StrategyLevel, entry_executed: bool) -> MonitorPlan {
    let mut plan = MonitorPlan::default();

    match level.trigger_type {
        TriggerType::Conditional => {
            if let Some(trigger_price) = level.trigger_price {
                if !entry_executed {
                    plan.specs.push(MonitorSpec {
                        monitor_type: MonitorType::Entry,
                        target_price: trigger_price,
                        instrument: InstrumentType::Option,
                        monitor_symbol: None,
                        metadata: json!({
                            "side": level.side,
                            "quantity": level.quantity,
                        }),
                    });
                    plan.status = Some(LevelStatus::Monitoring);
                }
            }
        }
        TriggerType::BtcPrice => {
            if let Some(trigger_price) = level.trigger_price {
                if !entry_executed {
                    match spot_symbol_for(&level.option_symbol) {
                        Some(spot_symbol) => {
                            plan.specs.push(MonitorSpec {
                                monitor_type: MonitorType::Entry,
                                target_price: trigger_price,
                                instrument: InstrumentType::Spot,
                                monitor_symbol: Some(spot_symbol.to_string()),
                                metadata: json!({
                                    "side": level.side,
                                    "quantity": level.quantity,
                                    "trigger_basis": "btc_spot",
                                }),
                            });
                            plan.status = Some(LevelStatus::Monitoring);
                        }
                        // A spot trigger on a non-BTC option cannot be armed.
                        None => plan.status = Some(LevelStatus::Pending),
                    }
                }
            }
        }
        TriggerType::Immediate => {
            if !entry_executed {
                plan.status = Some(LevelStatus::Monitoring);
                plan.enqueue_entry = true;
            }
        }
        TriggerType::ExistingPosition => {
            plan.status = Some(LevelStatus::Monitoring);
        }
        TriggerType::LevelClose => {
            if level.trigger_level_id.is_none() {
                plan.status = Some(LevelStatus::Pending);
            } else if !entry_executed {
                plan.status = Some(LevelStatus::Waiting);
            } else {
                plan.specs.extend(closing_monitors(level));
            }
            return plan;
        }
    }

    // Closing monitors accompany every trigger type except level_close,
    // which only arms them after its entry fires.
    if let Some(take_profit) = level.take_profit {
        plan.specs
            .push(MonitorSpec::option(MonitorType::TakeProfit, take_profit));
    }
    if let Some(stop_loss) = level.stop_loss {
        plan.specs
            .push(MonitorSpec::option(MonitorType::StopLoss, stop_loss));
    }

    plan
}

/// TP/SL specs for monitors not already alive on the level. Used after a
/// successful entry and by `level_close` planning.
pub fn closing_monitors(level: &StrategyLevel) -> Vec<MonitorSpec> {
    let mut specs = Vec::new();
    if let Some(take_profit) = level.take_profit {
        if !level.monitor_task_ids.contains_key(&MonitorType::TakeProfit) {
            specs.push(MonitorSpec::option(MonitorType::TakeProfit, take_profit));
        }
    }
    if let Some(stop_loss) = level.stop_loss {
        if !level.monitor_task_ids.contains_key(&MonitorType::StopLoss) {
            specs.push(MonitorSpec::option(MonitorType::StopLoss, stop_loss));
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared_models::{OrderSide, OrderType};

    fn level(trigger_type: TriggerType) -> StrategyLevel {
        StrategyLevel {
            level_id: "l-1".into(),
            option_symbol: "BTC-27DEC25-100000-C".into(),
            side: OrderSide::Buy,
            quantity: "0.1".into(),
            trigger_type,
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

    fn types(plan: &MonitorPlan) -> Vec<MonitorType> {
        plan.specs.iter().map(|spec| spec.monitor_type).collect()
    }

    #[test]
    fn conditional_without_entry_arms_all_three() {
        let plan = build_monitor_specs(&level(TriggerType::Conditional), false);
        assert_eq!(
            types(&plan),
            vec![MonitorType::Entry, MonitorType::TakeProfit, MonitorType::StopLoss]
        );
        assert_eq!(plan.status, Some(LevelStatus::Monitoring));
        assert!(!plan.enqueue_entry);
        assert_eq!(plan.specs[0].target_price, 50.0);
    }

    #[test]
    fn conditional_after_entry_keeps_only_closers() {
        let plan = build_monitor_specs(&level(TriggerType::Conditional), true);
        assert_eq!(types(&plan), vec![MonitorType::TakeProfit, MonitorType::StopLoss]);
        assert_eq!(plan.status, None);
    }

    #[test]
    fn conditional_without_trigger_price_arms_no_entry() {
        let mut lvl = level(TriggerType::Conditional);
        lvl.trigger_price = None;
        let plan = build_monitor_specs(&lvl, false);
        assert_eq!(types(&plan), vec![MonitorType::TakeProfit, MonitorType::StopLoss]);
    }

    #[test]
    fn btc_price_uses_spot_monitor() {
        let mut lvl = level(TriggerType::BtcPrice);
        lvl.trigger_price = Some(65000.0);
        let plan = build_monitor_specs(&lvl, false);
        assert_eq!(plan.specs[0].monitor_type, MonitorType::Entry);
        assert_eq!(plan.specs[0].instrument, InstrumentType::Spot);
        assert_eq!(plan.specs[0].monitor_symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(plan.specs[0].target_price, 65000.0);
        assert_eq!(plan.status, Some(LevelStatus::Monitoring));
    }

    #[test]
    fn btc_price_on_non_btc_option_stays_pending() {
        let mut lvl = level(TriggerType::BtcPrice);
        lvl.option_symbol = "ETH-27DEC25-4000-C".into();
        let plan = build_monitor_specs(&lvl, false);
        assert_eq!(plan.status, Some(LevelStatus::Pending));
        assert!(plan.specs.iter().all(|s| s.monitor_type != MonitorType::Entry));
    }

    #[test]
    fn immediate_enqueues_directly() {
        let plan = build_monitor_specs(&level(TriggerType::Immediate), false);
        assert!(plan.enqueue_entry);
        assert_eq!(plan.status, Some(LevelStatus::Monitoring));
        assert_eq!(types(&plan), vec![MonitorType::TakeProfit, MonitorType::StopLoss]);

        let done = build_monitor_specs(&level(TriggerType::Immediate), true);
        assert!(!done.enqueue_entry);
    }

    #[test]
    fn existing_position_skips_entry() {
        let plan = build_monitor_specs(&level(TriggerType::ExistingPosition), false);
        assert_eq!(plan.status, Some(LevelStatus::Monitoring));
        assert_eq!(types(&plan), vec![MonitorType::TakeProfit, MonitorType::StopLoss]);
    }

    #[test]
    fn level_close_waits_until_parent_fires() {
        let mut lvl = level(TriggerType::LevelClose);
        lvl.trigger_level_id = Some("l-parent".into());

        let waiting = build_monitor_specs(&lvl, false);
        assert_eq!(waiting.status, Some(LevelStatus::Waiting));
        assert!(waiting.specs.is_empty());

        let armed = build_monitor_specs(&lvl, true);
        assert_eq!(armed.status, None);
        assert_eq!(types(&armed), vec![MonitorType::TakeProfit, MonitorType::StopLoss]);
    }

    #[test]
    fn level_close_without_parent_is_pending() {
        let plan = build_monitor_specs(&level(TriggerType::LevelClose), false);
        assert_eq!(plan.status, Some(LevelStatus::Pending));
        assert!(plan.specs.is_empty());
    }

    #[test]
    fn closing_monitors_skip_already_live_tasks() {
        let mut lvl = level(TriggerType::Conditional);
        lvl.monitor_task_ids
            .insert(MonitorType::TakeProfit, "strategy-s-l-1-TAKE_PROFIT".into());
        let specs = closing_monitors(&lvl);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].monitor_type, MonitorType::StopLoss);
    }

    #[test]
    fn planning_is_idempotent() {
        let lvl = level(TriggerType::Conditional);
        let first = build_monitor_specs(&lvl, false);
        let second = build_monitor_specs(&lvl, false);
        assert_eq!(first.specs, second.specs);
        assert_eq!(first.status, second.status);
    }
}
