use std::collections::{HashMap, VecDeque};

use camhive_schema::ClassificationState;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentCapture {
    pub record_id: String,
    pub state: ClassificationState,
    pub score: f64,
    pub captured_at: DateTime<Utc>,
    pub image_stored: bool,
}

/// Bounded newest-first index of created records per device.
#[derive(Debug)]
pub struct RecentCaptures {
    limit: usize,
    per_device: HashMap<String, VecDeque<RecentCapture>>,
}

impl RecentCaptures {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            per_device: HashMap::new(),
        }
    }

    pub fn push(&mut self, device: &str, capture: RecentCapture) {
        let ring = self.per_device.entry(device.to_string()).or_default();
        ring.push_front(capture);
        ring.truncate(self.limit);
    }

    pub fn list(&self, device: &str) -> Vec<RecentCapture> {
        self.per_device
            .get(device)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(id: &str) -> RecentCapture {
        RecentCapture {
            record_id: id.into(),
            state: ClassificationState::Normal,
            score: 0.8,
            captured_at: Utc::now(),
            image_stored: true,
        }
    }

    #[test]
    fn newest_first_and_bounded() {
        let mut recent = RecentCaptures::new(2);
        recent.push("cam1", capture("a"));
        recent.push("cam1", capture("b"));
        recent.push("cam1", capture("c"));

        let ids: Vec<String> = recent.list("cam1").into_iter().map(|c| c.record_id).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert!(recent.list("cam2").is_empty());
    }
}
