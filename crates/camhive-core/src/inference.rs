//! Per-capture decision engine.
//!
//! One call to [`InferenceService::process_capture`] decodes the upload,
//! optionally reuses a cached verdict for a near-identical frame, classifies,
//! applies the streak and dedupe storage policies, persists, dispatches alerts
//! and announces the result on the capture hub.

use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine;
use camhive_bus::CaptureHub;
use camhive_provider::Classifier;
use camhive_schema::{
    CaptureEvent, CaptureEventKind, CaptureRecord, Classification, ClassificationState,
    UNKNOWN_DEVICE,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use crate::cooldown::AlertCooldown;
use crate::datalake::{Datalake, NewCapture, Notifier};
use crate::device_lock::DeviceLockManager;
use crate::error::InferenceError;
use crate::ids::generate_record_id;
use crate::recent::{RecentCapture, RecentCaptures};
use crate::similarity::{average_hash, hamming_distance, hash_to_hex, CachedEvaluation, SimilarityCache};
use crate::stats::{InferenceStats, InferenceStatsSnapshot};
use crate::timestamp::resolve_captured_at;
use crate::tracker::{DedupeDecision, DedupeEntry, DedupeTracker, StreakEntry, StreakTracker};

const LOCK_SLOT_SOFT_LIMIT: usize = 1024;

/// Upload body accepted by the capture route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePayload {
    #[serde(default)]
    pub device_id: String,
    /// Filled in by the route from the device registry, never by the device.
    #[serde(default, skip_deserializing)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub trigger_label: String,
    pub image_base64: String,
    #[serde(default)]
    pub thumbnail_base64: Option<String>,
    #[serde(default)]
    pub captured_at: Option<String>,
    #[serde(default)]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutcome {
    pub record_id: String,
    pub state: ClassificationState,
    pub score: f64,
    pub reason: Option<String>,
    pub captured_at: DateTime<Utc>,
    /// False when dedupe reused the previous record.
    pub created: bool,
}

struct DeviceTracking {
    streak: StreakTracker,
    dedupe: DedupeTracker,
    similarity: SimilarityCache,
    cooldown: AlertCooldown,
    recent: RecentCaptures,
}

/// Restores a device's streak and dedupe entries unless committed. A capture
/// that fails to store, or whose future is dropped mid-store, must not count
/// toward the run.
struct TrackerRollback<'a> {
    service: &'a InferenceService,
    device: String,
    previous: Option<(Option<StreakEntry>, Option<DedupeEntry>)>,
}

impl TrackerRollback<'_> {
    fn commit(mut self) {
        self.previous = None;
    }
}

impl Drop for TrackerRollback<'_> {
    fn drop(&mut self) {
        if let Some((streak, dedupe)) = self.previous.take() {
            let mut tracking = self.service.tracking();
            tracking.streak.restore(&self.device, streak);
            tracking.dedupe.restore(&self.device, dedupe);
        }
    }
}

pub struct InferenceService {
    classifier: Arc<dyn Classifier>,
    datalake: Arc<dyn Datalake>,
    notifier: Arc<dyn Notifier>,
    capture_hub: CaptureHub,
    config: InferenceConfig,
    tracking: Mutex<DeviceTracking>,
    locks: DeviceLockManager,
    stats: InferenceStats,
}

fn decode_base64(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    // Tolerate data URLs and line-wrapped payloads.
    let body = raw.split_once(',').map_or(raw, |(_, body)| body);
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD.decode(compact)
}

impl InferenceService {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        datalake: Arc<dyn Datalake>,
        notifier: Arc<dyn Notifier>,
        capture_hub: CaptureHub,
        config: InferenceConfig,
    ) -> Self {
        let tracking = DeviceTracking {
            streak: StreakTracker::new(config.streak.clone()),
            dedupe: DedupeTracker::new(config.dedupe.clone()),
            similarity: SimilarityCache::new(config.similarity.expiry_minutes),
            cooldown: AlertCooldown::new(config.alert.cooldown_seconds),
            recent: RecentCaptures::new(config.recent_limit),
        };
        Self {
            classifier,
            datalake,
            notifier,
            capture_hub,
            config,
            tracking: Mutex::new(tracking),
            locks: DeviceLockManager::new(),
            stats: InferenceStats::default(),
        }
    }

    fn tracking(&self) -> MutexGuard<'_, DeviceTracking> {
        self.tracking
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Forward a scene description to the classifier chain.
    pub fn set_context(&self, description: Option<&str>) {
        self.classifier.set_context(description);
    }

    pub async fn process_capture(
        &self,
        payload: CapturePayload,
    ) -> Result<CaptureOutcome, InferenceError> {
        let ingested_at = Utc::now();

        let image = decode_base64(&payload.image_base64)
            .map_err(|e| InferenceError::InvalidPayload(format!("image is not valid base64: {e}")))?;
        if image.is_empty() {
            return Err(InferenceError::InvalidPayload("image is empty".into()));
        }

        let thumbnail = payload
            .thumbnail_base64
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| match decode_base64(raw) {
                Ok(bytes) if !bytes.is_empty() => Some(bytes),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(device_id = %payload.device_id, "dropping undecodable thumbnail: {e}");
                    None
                }
            });

        let device_key = match payload.device_id.trim() {
            "" => UNKNOWN_DEVICE.to_string(),
            id => id.to_string(),
        };
        let captured_at = resolve_captured_at(payload.captured_at.as_deref(), ingested_at);

        self.stats.capture();
        if self.locks.len() > LOCK_SLOT_SOFT_LIMIT {
            self.locks.cleanup_unused();
        }
        let _device_guard = self.locks.acquire(&device_key).await;

        let image_hash = if self.config.similarity.enabled {
            match average_hash(&image) {
                Ok(hash) => Some(hash_to_hex(hash)),
                Err(e) => {
                    tracing::debug!(device_id = %device_key, "skipping similarity cache: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let cached = image_hash
            .as_deref()
            .and_then(|hash| self.lookup_similar(&device_key, hash, ingested_at));
        if self.config.similarity.enabled {
            if cached.is_some() {
                self.stats.cache_hit();
            } else {
                self.stats.cache_miss();
            }
        }

        let from_cache = cached.is_some();
        let classification = match cached {
            Some(classification) => classification,
            None => self
                .classifier
                .classify(&image)
                .await
                .map_err(InferenceError::Classification)?,
        };
        let state = classification.state;

        let (store_image, decision, rollback) = {
            let mut tracking = self.tracking();
            let rollback = TrackerRollback {
                service: self,
                device: device_key.clone(),
                previous: Some((
                    tracking.streak.entry(&device_key).cloned(),
                    tracking.dedupe.entry(&device_key).cloned(),
                )),
            };
            let store_image = tracking.streak.observe(&device_key, state);
            let decision = tracking.dedupe.observe(&device_key, state);
            (store_image, decision, rollback)
        };

        let (record_id, record) = match decision {
            DedupeDecision::Reuse(record_id) => {
                self.stats.record_deduped();
                tracing::debug!(device_id = %device_key, record_id = %record_id, "reusing previous record");
                rollback.commit();
                (record_id, None)
            }
            DedupeDecision::Create => {
                let label = match payload.trigger_label.trim() {
                    "" => device_key.as_str(),
                    label => label,
                };
                if !store_image {
                    self.stats.image_pruned();
                }
                let record = self
                    .datalake
                    .store_capture(NewCapture {
                        record_id: generate_record_id(label, ingested_at),
                        device_id: device_key.clone(),
                        trigger_label: payload.trigger_label.clone(),
                        trigger_id: payload.trigger_id.clone(),
                        captured_at,
                        ingested_at,
                        image: store_image.then_some(image),
                        thumbnail,
                        metadata: payload.metadata.clone(),
                        classification: classification.clone(),
                    })
                    .await
                    .map_err(InferenceError::Storage)?;
                rollback.commit();
                self.stats.record_created();
                (record.record_id.clone(), Some(record))
            }
        };
        let created = record.is_some();

        let notify = {
            let mut tracking = self.tracking();
            if let Some(record) = &record {
                tracking.dedupe.record_created(&device_key, &record.record_id);
                tracking.recent.push(
                    &device_key,
                    RecentCapture {
                        record_id: record.record_id.clone(),
                        state,
                        score: classification.score,
                        captured_at,
                        image_stored: record.image_stored,
                    },
                );
            }
            // Reused verdicts keep their original timestamp so the entry still expires.
            if let (Some(hash), false) = (image_hash, from_cache) {
                tracking.similarity.put(
                    &device_key,
                    CachedEvaluation {
                        hash,
                        state,
                        score: classification.score,
                        reason: classification.reason.clone(),
                        record_id: record_id.clone(),
                        timestamp: ingested_at,
                    },
                );
            }
            tracking
                .cooldown
                .observe(&device_key, state, created, ingested_at)
        };

        if let (true, Some(record)) = (notify, &record) {
            self.dispatch_alert(record).await;
        }

        if let Some(tenant_id) = payload.tenant_id.as_deref().filter(|t| !t.is_empty()) {
            let event = CaptureEvent {
                event: if created {
                    CaptureEventKind::NewCapture
                } else {
                    CaptureEventKind::CaptureUpdated
                },
                capture_id: record_id.clone(),
                device_id: device_key.clone(),
                state,
                score: classification.score,
                captured_at,
            };
            self.capture_hub.publish(tenant_id, &device_key, event).await;
        }

        tracing::info!(
            device_id = %device_key,
            record_id = %record_id,
            state = %state,
            score = classification.score,
            created,
            from_cache,
            "capture processed"
        );

        Ok(CaptureOutcome {
            record_id,
            state,
            score: classification.score,
            reason: classification.reason,
            captured_at,
            created,
        })
    }

    fn lookup_similar(
        &self,
        device: &str,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Option<Classification> {
        let mut tracking = self.tracking();
        tracking.similarity.prune(now);
        let cached = tracking.similarity.get(device, now)?;

        if tracking.streak.is_enabled()
            && !tracking.streak.has_reached_threshold(device, cached.state)
        {
            return None;
        }

        let distance = hamming_distance(hash, &cached.hash);
        if distance > self.config.similarity.threshold {
            tracing::debug!(device_id = %device, distance, "similarity cache miss");
            return None;
        }

        tracing::debug!(
            device_id = %device,
            distance,
            record_id = %cached.record_id,
            "reusing cached classification"
        );
        Some(cached.classification())
    }

    async fn dispatch_alert(&self, record: &CaptureRecord) {
        match self.notifier.notify_alert(record).await {
            Ok(()) => self.stats.alert_sent(),
            Err(e) => {
                self.stats.notify_failed();
                tracing::warn!(
                    device_id = %record.device_id,
                    record_id = %record.record_id,
                    "alert notification failed: {e:#}"
                );
            }
        }
    }

    pub fn recent_captures(&self, device: &str) -> Vec<RecentCapture> {
        self.tracking().recent.list(device)
    }

    pub fn stats(&self) -> InferenceStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn dedupe_entry(&self, device: &str) -> Option<DedupeEntry> {
        self.tracking().dedupe.entry(device).cloned()
    }

    pub fn streak_entry(&self, device: &str) -> Option<StreakEntry> {
        self.tracking().streak.entry(device).cloned()
    }

    pub fn cached_evaluation(&self, device: &str) -> Option<CachedEvaluation> {
        self.tracking()
            .similarity
            .get(device, Utc::now())
            .cloned()
    }
}
