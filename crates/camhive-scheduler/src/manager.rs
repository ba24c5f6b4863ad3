use std::sync::{Arc, Mutex};

use anyhow::Result;
use camhive_schema::{Device, DeviceCommand, TriggerKind};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::state::{TriggerRecord, TriggerStatus};
use crate::store::{CommandSink, DeviceDirectory, TriggerStore};

const DEFAULT_TICK: Duration = Duration::from_secs(1);
const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

struct SchedulerInner {
    devices: Arc<dyn DeviceDirectory>,
    triggers: Arc<dyn TriggerStore>,
    commands: Arc<dyn CommandSink>,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Tells devices when to capture.
///
/// One instance per deployment: nothing here coordinates across processes.
pub struct TriggerScheduler {
    inner: Arc<SchedulerInner>,
    tick: Duration,
    error_backoff: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl TriggerScheduler {
    pub fn new(
        devices: Arc<dyn DeviceDirectory>,
        triggers: Arc<dyn TriggerStore>,
        commands: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                devices,
                triggers,
                commands,
            }),
            tick: DEFAULT_TICK,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            running: Mutex::new(None),
        }
    }

    /// Override the tick period and the pause after a failed tick.
    pub fn with_timing(mut self, tick: Duration, error_backoff: Duration) -> Self {
        self.tick = tick;
        self.error_backoff = error_backoff;
        self
    }

    /// Spawn the background loop. Returns false if it is already running.
    pub fn start(&self) -> bool {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if running.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.inner.clone(),
            self.tick,
            self.error_backoff,
            cancel.clone(),
        ));
        *running = Some(RunningLoop { cancel, handle });
        true
    }

    /// Cancel the loop and wait for it to finish.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(RunningLoop { cancel, handle }) = running else {
            return;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::warn!("trigger scheduler task ended abnormally: {e}");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Operator "capture now": fires regardless of the device's interval.
    pub async fn trigger_manual_capture(&self, device_id: &str) -> Result<TriggerRecord> {
        self.inner
            .fire(device_id, TriggerKind::Manual, Utc::now())
            .await
    }

    /// Link an uploaded capture to the trigger that asked for it.
    /// Unknown ids are logged and ignored.
    pub async fn mark_trigger_executed(&self, trigger_id: &str, capture_id: &str) -> Result<bool> {
        let updated = self
            .inner
            .triggers
            .mark_executed(trigger_id, capture_id, Utc::now())
            .await?;
        if updated {
            tracing::debug!(trigger_id, capture_id, "trigger executed");
        } else {
            tracing::info!(trigger_id, "capture references unknown trigger, ignoring");
        }
        Ok(updated)
    }

    /// Run a single scheduling pass at `now`. Returns how many triggers fired.
    pub async fn check_and_trigger(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.check_and_trigger(now).await
    }
}

impl Drop for TriggerScheduler {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(running) = running {
            running.cancel.cancel();
        }
    }
}

async fn run_loop(
    inner: Arc<SchedulerInner>,
    tick: Duration,
    error_backoff: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("trigger scheduler started");
    loop {
        let wait = match inner.check_and_trigger(Utc::now()).await {
            Ok(fired) => {
                if fired > 0 {
                    tracing::debug!(fired, "scheduled triggers sent");
                }
                tick
            }
            Err(e) => {
                tracing::error!("trigger scheduler tick failed: {e:#}");
                error_backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    tracing::info!("trigger scheduler stopped");
}

impl SchedulerInner {
    async fn check_and_trigger(&self, now: DateTime<Utc>) -> Result<usize> {
        let devices = self.devices.active_devices().await?;
        let mut fired = 0;

        for device in devices {
            match self.fire_if_due(&device, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        device_id = %device.device_id,
                        "scheduled trigger check failed: {e:#}"
                    );
                }
            }
        }

        Ok(fired)
    }

    async fn fire_if_due(&self, device: &Device, now: DateTime<Utc>) -> Result<bool> {
        let trigger = &device.config.trigger;
        if !trigger.enabled || trigger.interval_seconds <= 0 {
            return Ok(false);
        }

        let last_capture = self.devices.last_capture_at(&device.device_id).await?;
        let last_trigger = self
            .triggers
            .last_trigger_at(&device.device_id, TriggerKind::Scheduled)
            .await?;

        // Never captured and never triggered: due immediately.
        let due = match last_capture.max(last_trigger) {
            None => true,
            Some(last) => {
                (now - last).num_milliseconds() >= trigger.interval_seconds.saturating_mul(1000)
            }
        };
        if !due {
            return Ok(false);
        }

        self.fire(&device.device_id, TriggerKind::Scheduled, now).await?;
        Ok(true)
    }

    async fn fire(
        &self,
        device_id: &str,
        kind: TriggerKind,
        now: DateTime<Utc>,
    ) -> Result<TriggerRecord> {
        let mut record = TriggerRecord::sent(device_id, kind, now);
        self.triggers.insert_trigger(&record).await?;

        let command = DeviceCommand::Capture {
            trigger_id: record.trigger_id.clone(),
            kind,
        };
        match self.commands.send(device_id, command).await {
            Ok(delivered) => {
                tracing::info!(
                    device_id,
                    trigger_id = %record.trigger_id,
                    kind = kind.as_str(),
                    delivered,
                    "capture command published"
                );
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::warn!(
                    device_id,
                    trigger_id = %record.trigger_id,
                    "capture command publish failed: {message}"
                );
                self.triggers
                    .mark_failed(&record.trigger_id, &message)
                    .await?;
                record.status = TriggerStatus::Failed;
                record.error = Some(message);
            }
        }

        Ok(record)
    }
}
