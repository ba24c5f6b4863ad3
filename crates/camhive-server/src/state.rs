use std::sync::Arc;
use std::time::Duration;

use camhive_bus::{CaptureHub, CommandHub};
use camhive_core::InferenceService;
use camhive_scheduler::{DeviceDirectory, TriggerScheduler};
use tokio_util::sync::CancellationToken;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub inference: Arc<InferenceService>,
    pub scheduler: Arc<TriggerScheduler>,
    /// Device registry, used to resolve tenants and reject unknown devices.
    pub devices: Arc<dyn DeviceDirectory>,
    pub commands: CommandHub,
    pub captures: CaptureHub,
    /// How long a stream waits for a message before sending a ping.
    pub stream_poll: Duration,
    pub shutdown: CancellationToken,
}
