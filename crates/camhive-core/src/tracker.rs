//! Same-state run tracking for streak pruning and record dedupe.
//!
//! Both trackers watch the same per-device state stream but keep independent
//! counters. A state change, or a device seen for the first time, starts a
//! fresh run of length 1.

use std::collections::HashMap;

use camhive_schema::ClassificationState;

use crate::config::SuppressionConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakEntry {
    pub state: ClassificationState,
    pub count: u32,
    pub post_threshold_counter: u32,
}

impl StreakEntry {
    fn fresh(state: ClassificationState) -> Self {
        Self {
            state,
            count: 1,
            post_threshold_counter: 0,
        }
    }
}

/// Decides whether image bytes are kept during long same-state runs.
#[derive(Debug)]
pub struct StreakTracker {
    policy: SuppressionConfig,
    entries: HashMap<String, StreakEntry>,
}

impl StreakTracker {
    pub fn new(policy: SuppressionConfig) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.enabled
    }

    /// Record one observation and return whether its image should be stored.
    ///
    /// Within the first `threshold` captures of a run every image is kept.
    /// Past it, only every `keep_every`-th capture keeps its image.
    pub fn observe(&mut self, device: &str, state: ClassificationState) -> bool {
        if !self.policy.enabled {
            return true;
        }

        let Some(entry) = self
            .entries
            .get_mut(device)
            .filter(|entry| entry.state == state)
        else {
            self.entries
                .insert(device.to_string(), StreakEntry::fresh(state));
            return true;
        };
        entry.count = entry.count.saturating_add(1);

        if entry.count <= self.policy.threshold {
            return true;
        }

        entry.post_threshold_counter = entry.post_threshold_counter.saturating_add(1);
        entry.post_threshold_counter % self.policy.keep_every.max(1) == 0
    }

    /// True once the device's current run in `state` is at least `threshold` long.
    pub fn has_reached_threshold(&self, device: &str, state: ClassificationState) -> bool {
        self.entries
            .get(device)
            .is_some_and(|e| e.state == state && e.count >= self.policy.threshold)
    }

    pub fn entry(&self, device: &str) -> Option<&StreakEntry> {
        self.entries.get(device)
    }

    /// Put back an entry taken with [`entry`](Self::entry) before an observation
    /// whose capture was never stored.
    pub fn restore(&mut self, device: &str, previous: Option<StreakEntry>) {
        match previous {
            Some(entry) => {
                self.entries.insert(device.to_string(), entry);
            }
            None => {
                self.entries.remove(device);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeEntry {
    pub state: ClassificationState,
    pub count: u32,
    pub post_threshold_counter: u32,
    pub last_record_id: Option<String>,
}

impl DedupeEntry {
    fn fresh(state: ClassificationState) -> Self {
        Self {
            state,
            count: 1,
            post_threshold_counter: 0,
            last_record_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupeDecision {
    Create,
    Reuse(String),
}

/// Decides whether a capture produces a new record or reuses the previous one.
#[derive(Debug)]
pub struct DedupeTracker {
    policy: SuppressionConfig,
    entries: HashMap<String, DedupeEntry>,
}

impl DedupeTracker {
    pub fn new(policy: SuppressionConfig) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    /// Past the threshold the counter is checked before it is advanced, so the
    /// first capture beyond the threshold always creates a record.
    pub fn observe(&mut self, device: &str, state: ClassificationState) -> DedupeDecision {
        if !self.policy.enabled {
            return DedupeDecision::Create;
        }

        let Some(entry) = self
            .entries
            .get_mut(device)
            .filter(|entry| entry.state == state)
        else {
            self.entries
                .insert(device.to_string(), DedupeEntry::fresh(state));
            return DedupeDecision::Create;
        };
        entry.count = entry.count.saturating_add(1);

        if entry.count <= self.policy.threshold {
            return DedupeDecision::Create;
        }

        let keep = entry.post_threshold_counter % self.policy.keep_every.max(1) == 0;
        entry.post_threshold_counter = entry.post_threshold_counter.saturating_add(1);
        if keep {
            return DedupeDecision::Create;
        }

        match &entry.last_record_id {
            Some(id) => DedupeDecision::Reuse(id.clone()),
            None => DedupeDecision::Create,
        }
    }

    pub fn record_created(&mut self, device: &str, record_id: &str) {
        if let Some(entry) = self.entries.get_mut(device) {
            entry.last_record_id = Some(record_id.to_string());
        }
    }

    pub fn entry(&self, device: &str) -> Option<&DedupeEntry> {
        self.entries.get(device)
    }

    pub fn restore(&mut self, device: &str, previous: Option<DedupeEntry>) {
        match previous {
            Some(entry) => {
                self.entries.insert(device.to_string(), entry);
            }
            None => {
                self.entries.remove(device);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ClassificationState::*;

    #[test]
    fn streak_keeps_three_of_seven_images() {
        let mut tracker = StreakTracker::new(SuppressionConfig::enabled(2, 3));
        let stored: Vec<bool> = (0..7).map(|_| tracker.observe("cam1", Normal)).collect();

        assert_eq!(stored, vec![true, true, false, false, true, false, false]);
        assert_eq!(stored.iter().filter(|s| **s).count(), 3);
    }

    #[test]
    fn dedupe_creates_at_one_two_three_and_six() {
        let mut tracker = DedupeTracker::new(SuppressionConfig::enabled(2, 3));
        let mut created = Vec::new();
        let mut last_id = String::new();

        for n in 1..=6 {
            match tracker.observe("cam1", Normal) {
                DedupeDecision::Create => {
                    last_id = format!("rec{n}");
                    tracker.record_created("cam1", &last_id);
                    created.push(n);
                }
                DedupeDecision::Reuse(id) => {
                    assert_eq!(id, "rec3");
                    assert_eq!(id, last_id);
                }
            }
        }

        assert_eq!(created, vec![1, 2, 3, 6]);
    }

    #[test]
    fn state_change_resets_both_trackers() {
        let mut streak = StreakTracker::new(SuppressionConfig::enabled(2, 3));
        let mut dedupe = DedupeTracker::new(SuppressionConfig::enabled(2, 3));

        for _ in 0..5 {
            streak.observe("cam1", Normal);
            if dedupe.observe("cam1", Normal) == DedupeDecision::Create {
                dedupe.record_created("cam1", "rec");
            }
        }
        assert_eq!(streak.entry("cam1").unwrap().count, 5);

        assert!(streak.observe("cam1", Alert));
        assert_eq!(dedupe.observe("cam1", Alert), DedupeDecision::Create);

        let s = streak.entry("cam1").unwrap();
        assert_eq!((s.state, s.count, s.post_threshold_counter), (Alert, 1, 0));
        let d = dedupe.entry("cam1").unwrap();
        assert_eq!((d.state, d.count), (Alert, 1));
        assert!(d.last_record_id.is_none());
    }

    #[test]
    fn devices_are_tracked_independently() {
        let mut streak = StreakTracker::new(SuppressionConfig::enabled(1, 5));
        assert!(streak.observe("cam1", Normal));
        assert!(!streak.observe("cam1", Normal));
        assert!(streak.observe("cam2", Normal));
    }

    #[test]
    fn disabled_trackers_never_suppress() {
        let mut streak = StreakTracker::new(SuppressionConfig::default());
        let mut dedupe = DedupeTracker::new(SuppressionConfig::default());
        for _ in 0..20 {
            assert!(streak.observe("cam1", Normal));
            assert_eq!(dedupe.observe("cam1", Normal), DedupeDecision::Create);
        }
        assert!(streak.entry("cam1").is_none());
    }

    #[test]
    fn dedupe_without_previous_record_creates() {
        let mut tracker = DedupeTracker::new(SuppressionConfig::enabled(0, 3));
        assert_eq!(tracker.observe("cam1", Normal), DedupeDecision::Create);
        assert_eq!(tracker.observe("cam1", Normal), DedupeDecision::Create);
        // Third capture is off-cycle, but there is no record to reuse.
        assert_eq!(tracker.observe("cam1", Normal), DedupeDecision::Create);
        assert!(tracker.entry("cam1").unwrap().last_record_id.is_none());
    }

    #[test]
    fn threshold_reached_requires_matching_state() {
        let mut streak = StreakTracker::new(SuppressionConfig::enabled(2, 3));
        streak.observe("cam1", Normal);
        assert!(!streak.has_reached_threshold("cam1", Normal));
        streak.observe("cam1", Normal);
        assert!(streak.has_reached_threshold("cam1", Normal));
        assert!(!streak.has_reached_threshold("cam1", Alert));
        assert!(!streak.has_reached_threshold("cam2", Normal));
    }

    #[test]
    fn restore_undoes_an_unstored_observation() {
        let policy = SuppressionConfig::enabled(2, 3);
        let mut streak = StreakTracker::new(policy.clone());
        let mut dedupe = DedupeTracker::new(policy);
        for _ in 0..2 {
            streak.observe("cam1", Normal);
            dedupe.observe("cam1", Normal);
        }
        dedupe.record_created("cam1", "rec2");

        let streak_before = streak.entry("cam1").cloned();
        let dedupe_before = dedupe.entry("cam1").cloned();
        streak.observe("cam1", Normal);
        dedupe.observe("cam1", Normal);
        streak.restore("cam1", streak_before.clone());
        dedupe.restore("cam1", dedupe_before.clone());
        assert_eq!(streak.entry("cam1").cloned(), streak_before);
        assert_eq!(dedupe.entry("cam1").cloned(), dedupe_before);

        // A first-ever observation rolls back to no entry at all.
        dedupe.observe("cam2", Alert);
        dedupe.restore("cam2", None);
        assert!(dedupe.entry("cam2").is_none());
    }
}
