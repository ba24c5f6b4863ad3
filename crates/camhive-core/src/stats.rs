use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct InferenceStats {
    captures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    records_created: AtomicU64,
    records_deduped: AtomicU64,
    images_pruned: AtomicU64,
    alerts_sent: AtomicU64,
    notify_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct InferenceStatsSnapshot {
    pub captures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub records_created: u64,
    pub records_deduped: u64,
    pub images_pruned: u64,
    pub alerts_sent: u64,
    pub notify_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl InferenceStats {
    pub fn capture(&self) {
        bump(&self.captures);
    }

    pub fn cache_hit(&self) {
        bump(&self.cache_hits);
    }

    pub fn cache_miss(&self) {
        bump(&self.cache_misses);
    }

    pub fn record_created(&self) {
        bump(&self.records_created);
    }

    pub fn record_deduped(&self) {
        bump(&self.records_deduped);
    }

    pub fn image_pruned(&self) {
        bump(&self.images_pruned);
    }

    pub fn alert_sent(&self) {
        bump(&self.alerts_sent);
    }

    pub fn notify_failed(&self) {
        bump(&self.notify_failures);
    }

    pub fn snapshot(&self) -> InferenceStatsSnapshot {
        InferenceStatsSnapshot {
            captures: self.captures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            records_created: self.records_created.load(Ordering::Relaxed),
            records_deduped: self.records_deduped.load(Ordering::Relaxed),
            images_pruned: self.images_pruned.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            notify_failures: self.notify_failures.load(Ordering::Relaxed),
        }
    }
}
