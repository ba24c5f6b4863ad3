use anyhow::Result;
use async_trait::async_trait;
use camhive_schema::{CaptureRecord, Classification};
use chrono::{DateTime, Utc};

/// Everything the datalake needs to persist one accepted capture.
#[derive(Debug, Clone)]
pub struct NewCapture {
    pub record_id: String,
    pub device_id: String,
    pub trigger_label: String,
    pub trigger_id: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    /// `None` when streak pruning dropped the image bytes.
    pub image: Option<Vec<u8>>,
    pub thumbnail: Option<Vec<u8>>,
    pub metadata: serde_json::Value,
    pub classification: Classification,
}

#[async_trait]
pub trait Datalake: Send + Sync {
    async fn store_capture(&self, capture: NewCapture) -> Result<CaptureRecord>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_alert(&self, record: &CaptureRecord) -> Result<()>;
}
