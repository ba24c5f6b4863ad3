//! Device-bound command fan-out, keyed by device id.

use camhive_schema::DeviceCommand;

use crate::hub::{Hub, Subscription};

pub type CommandSubscription = Subscription<String, DeviceCommand>;

/// Delivers capture/config commands to device command streams. A device may
/// hold several streams at once (reconnect overlap); each receives every command.
#[derive(Clone)]
pub struct CommandHub {
    hub: Hub<String, DeviceCommand>,
}

impl CommandHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Hub::new(capacity),
        }
    }

    pub fn subscribe(&self, device_id: &str) -> CommandSubscription {
        self.hub.subscribe(device_id.to_string())
    }

    pub fn unsubscribe(&self, device_id: &str, subscription: &CommandSubscription) -> bool {
        self.hub.unsubscribe(&device_id.to_string(), subscription)
    }

    pub async fn publish(&self, device_id: &str, command: DeviceCommand) -> usize {
        let delivered = self.hub.publish(&device_id.to_string(), command).await;
        if delivered == 0 {
            tracing::debug!(device_id = %device_id, "no command stream connected");
        }
        delivered
    }

    pub fn close(&self) {
        self.hub.close();
    }

    pub fn is_closing(&self) -> bool {
        self.hub.is_closing()
    }

    pub fn subscriber_count(&self, device_id: &str) -> usize {
        self.hub.subscriber_count(&device_id.to_string())
    }

    pub fn total_subscribers(&self) -> usize {
        self.hub.total_subscribers()
    }
}

impl Default for CommandHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use camhive_schema::TriggerKind;

    use super::*;
    use crate::hub::Delivery;

    fn capture(trigger_id: &str) -> DeviceCommand {
        DeviceCommand::Capture {
            trigger_id: trigger_id.to_string(),
            kind: TriggerKind::Manual,
        }
    }

    #[tokio::test]
    async fn overlapping_streams_both_receive() {
        let hub = CommandHub::default();
        let mut old = hub.subscribe("cam1");
        let mut new = hub.subscribe("cam1");

        assert_eq!(hub.publish("cam1", capture("manual_cam1_1")).await, 2);

        let wait = Duration::from_millis(100);
        assert_eq!(old.recv_timeout(wait).await, Delivery::Message(capture("manual_cam1_1")));
        assert_eq!(new.recv_timeout(wait).await, Delivery::Message(capture("manual_cam1_1")));
    }

    #[tokio::test]
    async fn commands_do_not_cross_devices() {
        let hub = CommandHub::default();
        let mut cam2 = hub.subscribe("cam2");

        assert_eq!(hub.publish("cam1", capture("t")).await, 0);
        assert_eq!(cam2.recv_timeout(Duration::from_millis(50)).await, Delivery::Timeout);
    }

    #[tokio::test]
    async fn unsubscribe_after_reconnect_keeps_other_stream() {
        let hub = CommandHub::default();
        let old = hub.subscribe("cam1");
        let mut new = hub.subscribe("cam1");

        assert!(hub.unsubscribe("cam1", &old));
        assert_eq!(hub.subscriber_count("cam1"), 1);
        assert_eq!(hub.publish("cam1", capture("t2")).await, 1);
        assert_eq!(
            new.recv_timeout(Duration::from_millis(100)).await,
            Delivery::Message(capture("t2"))
        );
    }
}
