//! Seams between the scheduler and the outside world.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use camhive_bus::CommandHub;
use camhive_schema::{Device, DeviceCommand, TriggerKind};
use chrono::{DateTime, Utc};

use crate::state::TriggerRecord;

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Devices whose status is `active`.
    async fn active_devices(&self) -> Result<Vec<Device>>;

    async fn get_device(&self, device_id: &str) -> Result<Option<Device>>;

    async fn last_capture_at(&self, device_id: &str) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn insert_trigger(&self, record: &TriggerRecord) -> Result<()>;

    async fn mark_failed(&self, trigger_id: &str, error: &str) -> Result<()>;

    /// Returns false when the trigger id is unknown.
    async fn mark_executed(
        &self,
        trigger_id: &str,
        capture_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get_trigger(&self, trigger_id: &str) -> Result<Option<TriggerRecord>>;

    async fn last_trigger_at(
        &self,
        device_id: &str,
        kind: TriggerKind,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// Where capture commands go. Returns the number of live receivers.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, device_id: &str, command: DeviceCommand) -> Result<usize>;
}

#[async_trait]
impl CommandSink for CommandHub {
    async fn send(&self, device_id: &str, command: DeviceCommand) -> Result<usize> {
        if self.is_closing() {
            return Err(anyhow!("command hub is shutting down"));
        }
        Ok(self.publish(device_id, command).await)
    }
}
