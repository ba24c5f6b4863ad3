use std::str::FromStr;

use anyhow::anyhow;
use camhive_schema::TriggerKind;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    Sent,
    Failed,
    Executed,
}

impl TriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerStatus::Sent => "sent",
            TriggerStatus::Failed => "failed",
            TriggerStatus::Executed => "executed",
        }
    }
}

impl FromStr for TriggerStatus {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "sent" => Ok(TriggerStatus::Sent),
            "failed" => Ok(TriggerStatus::Failed),
            "executed" => Ok(TriggerStatus::Executed),
            other => Err(anyhow!("unknown trigger status: {other}")),
        }
    }
}

/// One capture instruction sent (or attempted) to a device.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRecord {
    pub trigger_id: String,
    pub device_id: String,
    pub kind: TriggerKind,
    pub status: TriggerStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub capture_id: Option<String>,
    pub error: Option<String>,
}

impl TriggerRecord {
    /// `{sched|manual}_{device}_{unix millis}_{4 hex}`. The suffix keeps two
    /// triggers for one device in the same millisecond apart.
    pub fn sent(device_id: &str, kind: TriggerKind, at: DateTime<Utc>) -> Self {
        let suffix: u16 = rand::thread_rng().gen();
        Self {
            trigger_id: format!(
                "{}_{}_{}_{:04x}",
                kind.id_prefix(),
                device_id,
                at.timestamp_millis(),
                suffix
            ),
            device_id: device_id.to_string(),
            kind,
            status: TriggerStatus::Sent,
            created_at: at,
            executed_at: None,
            capture_id: None,
            error: None,
        }
    }
}
