// price_monitor/src/config.rs
use lazy_static::lazy_static;
use std::env;

const WS_URL_TESTNET: &str = "wss://stream-testnet.bybit.com/v5/public/option";
const WS_URL_MAINNET: &str = "wss://stream.bybit.com/v5/public/option";
const REST_URL_TESTNET: &str = "https://api-testnet.bybit.com";
const REST_URL_MAINNET: &str = "https://api.bybit.com";

pub struct Config {
    pub host: String,
    pub port: u16,
    pub ws_url: String,
    pub rest_base_url: String,
    pub max_tasks: usize,
    pub spot_poll_interval_secs: f64,
    pub request_timeout_secs: u64,
    pub webhook_timeout_secs: u64,
    pub expiry_sweep_interval_secs: u64,
    pub ws_ping_interval_secs: u64,
    pub ws_pong_timeout_secs: u64,
    pub max_reconnect_attempts: u32,
    pub data_dir: String,
}

impl Config {
    fn load() -> Self {
        let testnet = env::var("BYBIT_TESTNET")
            .unwrap_or_else(|_| "true".to_string())
            .to_lowercase()
            == "true";

        Self {
            host: env::var("MONITOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("MONITOR_PORT")
                .unwrap_or_else(|_| "8888".to_string())
                .parse()
                .expect("MONITOR_PORT must be a valid port"),
            ws_url: env::var("BYBIT_OPTION_WS_URL").unwrap_or_else(|_| {
                if testnet { WS_URL_TESTNET } else { WS_URL_MAINNET }.to_string()
            }),
            rest_base_url: env::var("BYBIT_REST_URL").unwrap_or_else(|_| {
                if testnet {
                    REST_URL_TESTNET
                } else {
                    REST_URL_MAINNET
                }
                .to_string()
            }),
            max_tasks: env::var("MAX_MONITOR_TASKS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .expect("MAX_MONITOR_TASKS must be a valid number"),
            // Spot symbols are polled, not streamed; anything below 500ms
            // would hammer the public tickers endpoint.
            spot_poll_interval_secs: env::var("SPOT_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<f64>()
                .expect("SPOT_POLL_INTERVAL_SECS must be a valid number")
                .max(0.5),
            request_timeout_secs: 10,
            webhook_timeout_secs: 30,
            expiry_sweep_interval_secs: 300,
            ws_ping_interval_secs: 20,
            ws_pong_timeout_secs: 10,
            max_reconnect_attempts: 10,
            data_dir: env::var("MONITOR_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        }
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::load();
}
