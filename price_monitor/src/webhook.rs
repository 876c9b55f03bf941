// price_monitor/src/webhook.rs
use std::time::Duration;

use shared_models::WebhookPayload;
use tracing::{error, info, warn};

use crate::service::{WEBHOOKS_DELIVERED_TOTAL, WEBHOOKS_FAILED_TOTAL};

/// Posts trigger notifications to the strategy engine. Delivery is
/// at-most-once: failures and timeouts are logged and never retried; the
/// strategy layer owns idempotence.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build webhook http client");
        Self { client }
    }

    pub async fn dispatch(&self, url: &str, payload: &WebhookPayload) {
        match self.client.post(url).json(payload).send().await {
            Ok(response) if response.status().is_success() => {
                WEBHOOKS_DELIVERED_TOTAL.inc();
                info!(task_id = %payload.task_id, url, "Webhook delivered");
            }
            Ok(response) => {
                WEBHOOKS_FAILED_TOTAL.inc();
                warn!(
                    task_id = %payload.task_id,
                    status = %response.status(),
                    url,
                    "Webhook rejected"
                );
            }
            Err(e) => {
                WEBHOOKS_FAILED_TOTAL.inc();
                error!(task_id = %payload.task_id, url, "Webhook send failed: {e}");
            }
        }
    }
}
