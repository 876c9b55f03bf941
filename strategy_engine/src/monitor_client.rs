// strategy_engine/src/monitor_client.rs
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use shared_models::{InstrumentType, MonitorType};
use tracing::{error, info};

use crate::plan::MonitorSpec;

/// HTTP client for the price monitor service.
pub struct MonitorClient {
    http: reqwest::Client,
    base_url: String,
}

impl MonitorClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build monitor http client");
        let base_url = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Deterministic task id so re-running a sync replaces rather than
    /// accumulates monitors.
    pub fn task_id(strategy_id: &str, level_id: &str, monitor_type: MonitorType) -> String {
        format!("strategy-{strategy_id}-{level_id}-{monitor_type}")
    }

    pub async fn create_task(&self, payload: &serde_json::Value) -> Result<()> {
        let url = format!("{}/api/monitor/create", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .context("monitor create request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to create monitor task: {status} {body}");
            bail!("monitor create rejected with {status}");
        }
        Ok(())
    }

    /// Idempotent: the monitor treats deletion of an unknown task as a no-op.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let url = format!("{}/api/monitor/{task_id}", self.base_url);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .context("monitor delete request failed")?;
        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = response.text().await.unwrap_or_default();
            error!("Failed to delete monitor task {task_id}: {status} {body}");
            bail!("monitor delete rejected with {status}");
        }
        Ok(())
    }

    /// Create one monitor task per spec for a level and return the
    /// monitor-type → task-id mapping.
    pub async fn sync_level_tasks(
        &self,
        strategy_id: &str,
        level_id: &str,
        option_symbol: &str,
        specs: &[MonitorSpec],
        webhook_url: &str,
        timeout_hours: i64,
    ) -> Result<BTreeMap<MonitorType, String>> {
        let mut task_ids = BTreeMap::new();
        for spec in specs {
            let task_id = Self::task_id(strategy_id, level_id, spec.monitor_type);
            let mut payload = json!({
                "task_id": task_id,
                "strategy_id": strategy_id,
                "level_id": level_id,
                "monitor_type": spec.monitor_type,
                "option_symbol": option_symbol,
                "target_price": spec.target_price,
                "webhook_url": webhook_url,
                "metadata": spec.metadata,
                "timeout_hours": timeout_hours,
            });
            if spec.instrument == InstrumentType::Spot {
                payload["monitor_instrument"] = json!(InstrumentType::Spot);
                payload["monitor_symbol"] = json!(spec.monitor_symbol);
            }
            self.create_task(&payload).await?;
            info!(
                task_id = %task_id,
                target = spec.target_price,
                "Created monitor task"
            );
            task_ids.insert(spec.monitor_type, task_id);
        }
        Ok(task_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_deterministic() {
        assert_eq!(
            MonitorClient::task_id("s-1", "l-1", MonitorType::Entry),
            "strategy-s-1-l-1-ENTRY"
        );
        assert_eq!(
            MonitorClient::task_id("s-1", "l-1", MonitorType::TakeProfit),
            "strategy-s-1-l-1-TAKE_PROFIT"
        );
        assert_eq!(
            MonitorClient::task_id("s-1", "l-1", MonitorType::StopLoss),
            "strategy-s-1-l-1-STOP_LOSS"
        );
    }
}
