//! Operator-bound capture event fan-out, keyed by (tenant, device) with a
//! tenant-wide wildcard.

use camhive_schema::CaptureEvent;

use crate::hub::{Hub, Subscription};

/// Device id reserved for tenant-wide subscriptions.
pub const ALL_DEVICES: &str = "__all__";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureKey {
    pub tenant_id: String,
    pub device_id: String,
}

impl CaptureKey {
    pub fn device(tenant_id: &str, device_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
        }
    }

    pub fn tenant(tenant_id: &str) -> Self {
        Self::device(tenant_id, ALL_DEVICES)
    }

    pub fn is_wildcard(&self) -> bool {
        self.device_id == ALL_DEVICES
    }
}

pub type CaptureSubscription = Subscription<CaptureKey, CaptureEvent>;

#[derive(Clone)]
pub struct CaptureHub {
    hub: Hub<CaptureKey, CaptureEvent>,
}

impl CaptureHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Hub::new(capacity),
        }
    }

    /// Subscribe to one device, or to every device of the tenant when
    /// `device_id` is `None`.
    pub fn subscribe(&self, tenant_id: &str, device_id: Option<&str>) -> CaptureSubscription {
        let key = match device_id {
            Some(device_id) => CaptureKey::device(tenant_id, device_id),
            None => CaptureKey::tenant(tenant_id),
        };
        self.hub.subscribe(key)
    }

    pub fn unsubscribe(&self, subscription: &CaptureSubscription) -> bool {
        self.hub.unsubscribe(subscription.key(), subscription)
    }

    /// Deliver to the device's subscribers and the tenant wildcard in one call.
    pub async fn publish(&self, tenant_id: &str, device_id: &str, event: CaptureEvent) -> usize {
        let device_key = CaptureKey::device(tenant_id, device_id);
        if device_key.is_wildcard() {
            return self.hub.publish(&device_key, event).await;
        }
        let keys = [device_key, CaptureKey::tenant(tenant_id)];
        self.hub.publish_to(&keys, event).await
    }

    pub fn close(&self) {
        self.hub.close();
    }

    pub fn is_closing(&self) -> bool {
        self.hub.is_closing()
    }

    pub fn total_subscribers(&self) -> usize {
        self.hub.total_subscribers()
    }

    pub fn key_count(&self) -> usize {
        self.hub.key_count()
    }
}

impl Default for CaptureHub {
    fn default() -> Self {
        Self::new(256)
    }
}
