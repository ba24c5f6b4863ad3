use std::collections::HashMap;

use camhive_schema::ClassificationState;
use chrono::{DateTime, Duration, Utc};

/// Per-device alert throttle.
#[derive(Debug)]
pub struct AlertCooldown {
    window: Duration,
    last_alert: HashMap<String, DateTime<Utc>>,
}

impl AlertCooldown {
    /// `cooldown_seconds == 0` disables throttling.
    pub fn new(cooldown_seconds: u64) -> Self {
        let seconds = i64::try_from(cooldown_seconds).unwrap_or(i64::MAX);
        Self {
            window: Duration::try_seconds(seconds).unwrap_or(Duration::MAX),
            last_alert: HashMap::new(),
        }
    }

    /// Feed one outcome and return whether the notifier should fire.
    ///
    /// Only alerts that produced a new record can notify. A normal verdict
    /// clears the device's timer so the next alert goes out immediately.
    pub fn observe(
        &mut self,
        device: &str,
        state: ClassificationState,
        created: bool,
        now: DateTime<Utc>,
    ) -> bool {
        match state {
            ClassificationState::Normal => {
                self.last_alert.remove(device);
                false
            }
            ClassificationState::Uncertain => false,
            ClassificationState::Alert if !created => false,
            ClassificationState::Alert => {
                if self.window.is_zero() {
                    return true;
                }
                match self.last_alert.get(device) {
                    Some(last) if now - *last < self.window => false,
                    _ => {
                        self.last_alert.insert(device.to_string(), now);
                        true
                    }
                }
            }
        }
    }
}
