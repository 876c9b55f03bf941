// strategy_engine/src/config.rs
use lazy_static::lazy_static;
use std::env;

const REST_URL_TESTNET: &str = "https://api-testnet.bybit.com";
const REST_URL_MAINNET: &str = "https://api.bybit.com";

pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub bybit_base_url: String,
    pub bybit_api_key: String,
    pub bybit_api_secret: String,
    pub bybit_recv_window: u64,
    pub request_timeout_secs: u64,
    pub price_monitor_base: String,
    pub webhook_base: String,
    pub executor_spacing_secs: u64,
    pub executor_queue_capacity: usize,
    pub monitor_task_timeout_hours: i64,
}

impl Config {
    fn load() -> Self {
        let testnet = env::var("BYBIT_TESTNET")
            .unwrap_or_else(|_| "true".to_string())
            .to_lowercase()
            == "true";

        Self {
            host: env::var("ENGINE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("ENGINE_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("ENGINE_PORT must be a valid port"),
            data_dir: env::var("ENGINE_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            bybit_base_url: env::var("BYBIT_REST_URL").unwrap_or_else(|_| {
                if testnet {
                    REST_URL_TESTNET
                } else {
                    REST_URL_MAINNET
                }
                .to_string()
            }),
            bybit_api_key: env::var("BYBIT_API_KEY").unwrap_or_default(),
            bybit_api_secret: env::var("BYBIT_API_SECRET").unwrap_or_default(),
            bybit_recv_window: 5000,
            request_timeout_secs: 10,
            price_monitor_base: env::var("PRICE_MONITOR_BASE")
                .unwrap_or_else(|_| "http://localhost:8888".to_string()),
            webhook_base: env::var("STRATEGY_WEBHOOK_BASE")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            // Venue throttles reject bursts; keep at least 2s between orders.
            executor_spacing_secs: env::var("EXECUTOR_SPACING_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<u64>()
                .expect("EXECUTOR_SPACING_SECS must be a valid number")
                .max(2),
            executor_queue_capacity: env::var("EXECUTOR_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .expect("EXECUTOR_QUEUE_CAPACITY must be a valid number"),
            monitor_task_timeout_hours: 168,
        }
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::load();
}
