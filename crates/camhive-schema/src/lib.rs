use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved device key used when an upload carries no device id.
pub const UNKNOWN_DEVICE: &str = "unknown-device";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationState {
    Normal,
    Alert,
    Uncertain,
}

impl ClassificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationState::Normal => "normal",
            ClassificationState::Alert => "alert",
            ClassificationState::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for ClassificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationState {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "normal" => Ok(ClassificationState::Normal),
            "alert" => Ok(ClassificationState::Alert),
            "uncertain" => Ok(ClassificationState::Uncertain),
            other => Err(anyhow!("unknown classification state: {other:?}")),
        }
    }
}

/// Clamp a model score into `[0, 1]`. NaN collapses to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// A single verdict about one image. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub state: ClassificationState,
    pub score: f64,
    #[serde(default)]
    pub reason: Option<String>,
    /// Raw per-model verdicts, kept for audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_details: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Classification {
    pub fn new(state: ClassificationState, score: f64, reason: Option<String>) -> Self {
        Self {
            state,
            score: clamp_score(score),
            reason: reason.filter(|r| !r.trim().is_empty()),
            agent_details: None,
        }
    }

    pub fn with_agent_details(
        mut self,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.agent_details = Some(details);
        self
    }

    /// Reason text, or "" when the model gave none.
    pub fn reason_text(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Active,
    Inactive,
    Disabled,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
            DeviceStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "active" => Ok(DeviceStatus::Active),
            "inactive" => Ok(DeviceStatus::Inactive),
            "disabled" => Ok(DeviceStatus::Disabled),
            other => Err(anyhow!("unknown device status: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interval_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    #[serde(default)]
    pub trigger: TriggerConfig,
}

/// Read-only view of a registered capture device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub config: DeviceConfig,
}

/// A persisted capture. Created once per accepted capture and never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub record_id: String,
    pub device_id: String,
    pub trigger_label: String,
    #[serde(default)]
    pub trigger_id: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub image_stored: bool,
    pub thumbnail_stored: bool,
    pub classification: Classification,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
        }
    }

    /// Prefix used when minting trigger ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "sched",
            TriggerKind::Manual => "manual",
        }
    }
}

/// Commands pushed to a device over its command stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DeviceCommand {
    Capture {
        #[serde(rename = "triggerId")]
        trigger_id: String,
        #[serde(rename = "type")]
        kind: TriggerKind,
    },
    UpdateConfig {
        config: serde_json::Value,
    },
}

/// Control frames on the device command stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceStreamEvent {
    Connected {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    Ping,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEventKind {
    NewCapture,
    CaptureUpdated,
}

/// Capture lifecycle event fanned out to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    pub event: CaptureEventKind,
    pub capture_id: String,
    pub device_id: String,
    pub state: ClassificationState,
    pub score: f64,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn state_parse_trims_and_lowercases() {
        assert_eq!(
            " ALERT\n".parse::<ClassificationState>().unwrap(),
            ClassificationState::Alert
        );
        assert!("abnormal".parse::<ClassificationState>().is_err());
    }

    #[test]
    fn classification_clamps_score_and_drops_blank_reason() {
        let c = Classification::new(ClassificationState::Normal, 1.7, Some("  ".into()));
        assert_eq!(c.score, 1.0);
        assert!(c.reason.is_none());
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
    }

    #[test]
    fn capture_command_wire_format() {
        let cmd = DeviceCommand::Capture {
            trigger_id: "sched_cam1_1".into(),
            kind: TriggerKind::Scheduled,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"cmd": "capture", "triggerId": "sched_cam1_1", "type": "scheduled"})
        );
    }

    #[test]
    fn stream_events_wire_format() {
        assert_eq!(
            serde_json::to_value(DeviceStreamEvent::Ping).unwrap(),
            serde_json::json!({"event": "ping"})
        );
        assert_eq!(
            serde_json::to_value(DeviceStreamEvent::Connected {
                device_id: "cam1".into()
            })
            .unwrap(),
            serde_json::json!({"event": "connected", "deviceId": "cam1"})
        );
    }

    #[test]
    fn capture_event_wire_format() {
        let event = CaptureEvent {
            event: CaptureEventKind::NewCapture,
            capture_id: "r1".into(),
            device_id: "cam1".into(),
            state: ClassificationState::Alert,
            score: 0.9,
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "new_capture");
        assert_eq!(json["captureId"], "r1");
        assert_eq!(json["deviceId"], "cam1");
        assert_eq!(json["state"], "alert");
        assert_eq!(json["capturedAt"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn device_config_defaults_to_disabled_trigger() {
        let device: Device = serde_json::from_value(serde_json::json!({
            "deviceId": "cam1",
            "tenantId": "t1",
            "name": "Front door"
        }))
        .unwrap();
        assert_eq!(device.status, DeviceStatus::Active);
        assert!(!device.config.trigger.enabled);
        assert_eq!(device.config.trigger.interval_seconds, 0);
    }
}
