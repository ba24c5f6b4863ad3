use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use camhive_schema::CaptureRecord;

use crate::datalake::Notifier;

/// Writes alerts to the log and nothing else.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_alert(&self, record: &CaptureRecord) -> Result<()> {
        tracing::warn!(
            device_id = %record.device_id,
            record_id = %record.record_id,
            score = record.classification.score,
            reason = record.classification.reason_text(),
            "alert raised"
        );
        Ok(())
    }
}

/// POSTs `{"event": "alert", "record": ...}` to a configured URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_alert(&self, record: &CaptureRecord) -> Result<()> {
        let body = serde_json::json!({
            "event": "alert",
            "record": record,
        });

        let resp = match self.client.post(&self.url).json(&body).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(anyhow!("alert webhook timed out")),
            Err(e) => return Err(anyhow!("alert webhook request failed: {e}")),
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("alert webhook error ({status}): {text}"));
        }

        tracing::debug!(record_id = %record.record_id, "alert webhook delivered");
        Ok(())
    }
}
