//! Per-device locking so captures from one device are processed one at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct DeviceLockManager {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl DeviceLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, device: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `device`. Released when the guard drops.
    pub async fn acquire(&self, device: &str) -> DeviceLockGuard {
        let slot = self.slot(device);
        DeviceLockGuard {
            _guard: slot.lock_owned().await,
        }
    }

    pub fn try_acquire(&self, device: &str) -> Option<DeviceLockGuard> {
        let slot = self.slot(device);
        slot.try_lock_owned()
            .ok()
            .map(|guard| DeviceLockGuard { _guard: guard })
    }

    /// Drop lock slots that nobody holds or waits on.
    pub fn cleanup_unused(&self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct DeviceLockGuard {
    _guard: OwnedMutexGuard<()>,
}
