// shared-models/src/lib.rs
//! Domain types shared by the price monitor and the strategy engine.

pub mod api;
pub mod monitor;
pub mod strategy;
pub mod symbol;

pub use api::ApiResponse;
pub use monitor::{
    InstrumentType, MonitorTask, MonitorType, OptionInfo, OptionKind, PriceUpdate, TaskStatus,
    TriggerDirection, WebhookPayload,
};
pub use strategy::{
    LevelExecutionRecord, LevelStatus, OrderSide, OrderType, StrategyLevel, StrategyStatus,
    TradeRecord, TradingStrategy, TriggerType,
};
pub use symbol::{
    canonical_option_symbol, parse_option_symbol, spot_symbol_for, SymbolError, BTC_SPOT_SYMBOL,
};
