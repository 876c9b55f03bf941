// strategy_engine/src/bybit.rs
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use shared_models::{OrderSide, OrderType};
use tracing::{error, warn};

type HmacSha256 = Hmac<Sha256>;

/// Bybit V5 response envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct VenueResponse {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: Value,
}

/// Outcome of an order attempt as the executor records it.
#[derive(Clone, Debug)]
pub struct OrderOutcome {
    pub success: bool,
    pub message: String,
    pub order_id: Option<String>,
    pub order_link_id: Option<String>,
}

impl OrderOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            order_id: None,
            order_link_id: None,
        }
    }
}

/// A venue response is a successful order iff the call was accepted and the
/// order did not come back dead on arrival.
pub fn interpret_order_response(response: &VenueResponse) -> OrderOutcome {
    if response.ret_code != 0 {
        let message = if response.ret_msg.is_empty() {
            format!("venue error retCode={}", response.ret_code)
        } else {
            response.ret_msg.clone()
        };
        return OrderOutcome::failure(message);
    }

    let order_status = response
        .result
        .get("orderStatus")
        .and_then(Value::as_str)
        .unwrap_or("");
    if matches!(
        order_status.to_lowercase().as_str(),
        "cancelled" | "rejected"
    ) {
        return OrderOutcome::failure(format!("order {order_status}"));
    }

    OrderOutcome {
        success: true,
        message: if response.ret_msg.is_empty() {
            "OK".to_string()
        } else {
            response.ret_msg.clone()
        },
        order_id: response
            .result
            .get("orderId")
            .and_then(Value::as_str)
            .map(str::to_string),
        order_link_id: response
            .result
            .get("orderLinkId")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Signed REST client for the venue. Order placement is only ever invoked by
/// the level executor; the public market endpoints are safe to share.
pub struct BybitClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window: String,
}

impl BybitClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        recv_window: u64,
        timeout_secs: u64,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build venue http client");
        let api_key = api_key.into();
        if api_key.is_empty() {
            warn!("Venue API key not set; only public endpoints will work");
        }
        Self {
            http,
            base_url: base_url.into(),
            api_key,
            api_secret: api_secret.into(),
            recv_window: recv_window.to_string(),
        }
    }

    /// V5 signature: HMAC-SHA256 over `timestamp + api_key + recv_window +
    /// payload`, hex encoded.
    fn sign(&self, timestamp: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(timestamp.as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(self.recv_window.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_post(&self, endpoint: &str, body: Value) -> Result<VenueResponse> {
        let url = format!("{}{endpoint}", self.base_url);
        let payload = body.to_string();
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, &payload);

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-TIMESTAMP", timestamp)
            .header("X-BAPI-RECV-WINDOW", &self.recv_window)
            .body(payload)
            .send()
            .await
            .with_context(|| format!("POST {endpoint} failed"))?;

        let venue: VenueResponse = response
            .json()
            .await
            .with_context(|| format!("POST {endpoint} returned invalid JSON"))?;
        if venue.ret_code != 0 {
            error!(endpoint, ret_code = venue.ret_code, "Venue error: {}", venue.ret_msg);
        }
        Ok(venue)
    }

    async fn signed_get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<VenueResponse> {
        let url = format!("{}{endpoint}", self.base_url);
        let query: Vec<String> = params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let query = query.join("&");
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, &query);

        let response = self
            .http
            .get(&url)
            .query(params)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-TIMESTAMP", timestamp)
            .header("X-BAPI-RECV-WINDOW", &self.recv_window)
            .send()
            .await
            .with_context(|| format!("GET {endpoint} failed"))?;

        response
            .json()
            .await
            .with_context(|| format!("GET {endpoint} returned invalid JSON"))
    }

    async fn public_get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<VenueResponse> {
        let url = format!("{}{endpoint}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {endpoint} failed"))?;
        response
            .json()
            .await
            .with_context(|| format!("GET {endpoint} returned invalid JSON"))
    }

    pub async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        qty: &str,
        price: Option<&str>,
    ) -> Result<VenueResponse> {
        let order_link_id = format!("option_{}", Utc::now().timestamp_millis());
        let mut body = json!({
            "category": "option",
            "symbol": symbol,
            "side": side.as_venue(),
            "orderType": order_type.as_venue(),
            "qty": qty,
            "orderLinkId": order_link_id,
        });
        if order_type == OrderType::Limit {
            body["timeInForce"] = json!("GTC");
            if let Some(price) = price {
                body["price"] = json!(price);
            }
        }
        self.signed_post("/v5/order/create", body).await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<&str>,
        order_link_id: Option<&str>,
    ) -> Result<VenueResponse> {
        let mut body = json!({
            "category": "option",
            "symbol": symbol,
        });
        if let Some(order_id) = order_id {
            body["orderId"] = json!(order_id);
        } else if let Some(order_link_id) = order_link_id {
            body["orderLinkId"] = json!(order_link_id);
        }
        self.signed_post("/v5/order/cancel", body).await
    }

    pub async fn get_tickers(&self, category: &str, symbol: &str) -> Result<VenueResponse> {
        self.public_get(
            "/v5/market/tickers",
            &[("category", category.to_string()), ("symbol", symbol.to_string())],
        )
        .await
    }

    pub async fn get_wallet_balance(&self) -> Result<VenueResponse> {
        self.signed_get(
            "/v5/account/wallet-balance",
            &[("accountType", "UNIFIED".to_string())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BybitClient {
        BybitClient::new("https://api-testnet.bybit.com", "key", "secret", 5000, 10)
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let c = client();
        let a = c.sign("1700000000000", "{\"category\":\"option\"}");
        let b = c.sign("1700000000000", "{\"category\":\"option\"}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));

        // Any payload or timestamp change must change the signature.
        assert_ne!(a, c.sign("1700000000001", "{\"category\":\"option\"}"));
        assert_ne!(a, c.sign("1700000000000", "{\"category\":\"spot\"}"));
    }

    #[test]
    fn rejected_ret_code_is_failure() {
        let response = VenueResponse {
            ret_code: 10001,
            ret_msg: "params error".into(),
            result: json!({}),
        };
        let outcome = interpret_order_response(&response);
        assert!(!outcome.success);
        assert_eq!(outcome.message, "params error");
    }

    #[test]
    fn dead_on_arrival_order_is_failure() {
        for status in ["Cancelled", "Rejected", "cancelled"] {
            let response = VenueResponse {
                ret_code: 0,
                ret_msg: "OK".into(),
                result: json!({"orderId": "1", "orderStatus": status}),
            };
            let outcome = interpret_order_response(&response);
            assert!(!outcome.success, "status {status} should fail");
        }
    }

    #[test]
    fn accepted_order_is_success_with_ids() {
        let response = VenueResponse {
            ret_code: 0,
            ret_msg: "OK".into(),
            result: json!({
                "orderId": "abc",
                "orderLinkId": "option_1700000000000",
                "orderStatus": "New"
            }),
        };
        let outcome = interpret_order_response(&response);
        assert!(outcome.success);
        assert_eq!(outcome.order_id.as_deref(), Some("abc"));
        assert_eq!(outcome.order_link_id.as_deref(), Some("option_1700000000000"));
    }

    #[test]
    fn missing_order_status_still_succeeds() {
        let response = VenueResponse {
            ret_code: 0,
            ret_msg: String::new(),
            result: json!({"orderId": "abc"}),
        };
        let outcome = interpret_order_response(&response);
        assert!(outcome.success);
        assert_eq!(outcome.message, "OK");
    }
}
