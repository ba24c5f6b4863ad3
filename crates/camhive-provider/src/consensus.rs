//! Dual-classifier consensus.
//!
//! Both classifiers run concurrently on the shared [`WorkerPool`]. Either
//! failure fails the whole call; there is no degraded single-model result.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use camhive_schema::{Classification, ClassificationState};
use serde_json::{json, Map, Value};

use crate::pool::{flatten, AbortOnDrop, WorkerPool};
use crate::Classifier;

pub const LOW_CONFIDENCE_PREFIX: &str = "Low confidence: ";

const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f64 = 0.6;
const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(500);

pub struct ConsensusClassifier {
    primary: Arc<dyn Classifier>,
    secondary: Arc<dyn Classifier>,
    pool: WorkerPool,
    low_confidence_threshold: f64,
    cancel_grace: Duration,
}

impl ConsensusClassifier {
    pub fn new(
        primary: Arc<dyn Classifier>,
        secondary: Arc<dyn Classifier>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            primary,
            secondary,
            pool,
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn with_low_confidence_threshold(mut self, threshold: f64) -> Self {
        self.low_confidence_threshold = threshold;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn low_confidence_threshold(&self) -> f64 {
        self.low_confidence_threshold
    }
}

#[async_trait]
impl Classifier for ConsensusClassifier {
    async fn classify(&self, image: &[u8]) -> Result<Classification> {
        let image: Arc<[u8]> = Arc::from(image);

        let primary = {
            let classifier = Arc::clone(&self.primary);
            let image = Arc::clone(&image);
            self.pool.spawn(async move { classifier.classify(&image).await })
        };
        let secondary = {
            let classifier = Arc::clone(&self.secondary);
            let image = Arc::clone(&image);
            self.pool.spawn(async move { classifier.classify(&image).await })
        };
        // A dropped caller must not leave both jobs holding pool permits.
        let mut jobs = AbortOnDrop::default();
        jobs.track(&primary);
        jobs.track(&secondary);

        let primary_verdict = match flatten(primary.await) {
            Ok(verdict) => verdict,
            Err(err) => {
                secondary.abort();
                if tokio::time::timeout(self.cancel_grace, secondary).await.is_err() {
                    tracing::warn!(
                        classifier = self.secondary.name(),
                        "secondary classifier did not unwind within grace period"
                    );
                }
                tracing::warn!(
                    classifier = self.primary.name(),
                    error = %err,
                    "primary classifier failed"
                );
                return Err(err);
            }
        };

        let secondary_verdict = flatten(secondary.await).inspect_err(|err| {
            tracing::warn!(
                classifier = self.secondary.name(),
                error = %err,
                "secondary classifier failed"
            );
        })?;

        Ok(reconcile(
            &primary_verdict,
            &secondary_verdict,
            self.low_confidence_threshold,
        ))
    }

    fn set_context(&self, description: Option<&str>) {
        self.primary.set_context(description);
        self.secondary.set_context(description);
    }

    fn name(&self) -> &str {
        "consensus"
    }
}

/// Merge two verdicts into one.
///
/// Agreement averages the scores and may downgrade to uncertain when the
/// average is below `low_confidence_threshold`. Disagreement is always
/// uncertain with the lower of the two scores.
pub fn reconcile(
    primary: &Classification,
    secondary: &Classification,
    low_confidence_threshold: f64,
) -> Classification {
    let details = agent_details(primary, secondary);
    let more_confident = if secondary.score > primary.score {
        secondary
    } else {
        primary
    };

    if primary.state == secondary.state {
        let score = (primary.score + secondary.score) / 2.0;
        let mut state = primary.state;
        let mut reason = more_confident.reason.clone();

        if state != ClassificationState::Uncertain && score < low_confidence_threshold {
            state = ClassificationState::Uncertain;
            let note = format!(
                "combined confidence {score:.2} is below {low_confidence_threshold:.2}"
            );
            reason = Some(match reason {
                Some(text) => format!("{text} ({note})"),
                None => note,
            });
        }

        return Classification::new(state, score, reason).with_agent_details(details);
    }

    let score = primary.score.min(secondary.score);
    let flagged = [primary, secondary].into_iter().find(|verdict| {
        matches!(
            verdict.state,
            ClassificationState::Alert | ClassificationState::Uncertain
        ) && !verdict.reason_text().trim().is_empty()
    });
    let source = flagged.unwrap_or(more_confident);

    let reason = match source.reason_text().trim() {
        "" => format!(
            "{LOW_CONFIDENCE_PREFIX}classifiers disagreed ({} vs {})",
            primary.state, secondary.state
        ),
        text => format!("{LOW_CONFIDENCE_PREFIX}{text}"),
    };

    Classification::new(ClassificationState::Uncertain, score, Some(reason))
        .with_agent_details(details)
}

fn agent_details(primary: &Classification, secondary: &Classification) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("primary".to_string(), verdict_json(primary));
    details.insert("secondary".to_string(), verdict_json(secondary));
    details
}

fn verdict_json(verdict: &Classification) -> Value {
    json!({
        "state": verdict.state,
        "score": verdict.score,
        "reason": verdict.reason,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::*;

    fn verdict(state: ClassificationState, score: f64, reason: &str) -> Classification {
        Classification::new(state, score, Some(reason.to_string()))
    }

    struct Fixed {
        verdict: Classification,
        delay: Duration,
    }

    #[async_trait]
    impl Classifier for Fixed {
        async fn classify(&self, _image: &[u8]) -> Result<Classification> {
            tokio::time::sleep(self.delay).await;
            Ok(self.verdict.clone())
        }
    }

    struct Failing {
        message: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Classifier for Failing {
        async fn classify(&self, _image: &[u8]) -> Result<Classification> {
            tokio::time::sleep(self.delay).await;
            Err(anyhow!(self.message))
        }
    }

    /// Flags whether it ran to completion.
    struct Slow {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Classifier for Slow {
        async fn classify(&self, _image: &[u8]) -> Result<Classification> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(verdict(ClassificationState::Normal, 0.9, "late"))
        }
    }

    #[derive(Default)]
    struct ContextRecorder {
        seen: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Classifier for ContextRecorder {
        async fn classify(&self, _image: &[u8]) -> Result<Classification> {
            Ok(verdict(ClassificationState::Normal, 1.0, "ok"))
        }

        fn set_context(&self, description: Option<&str>) {
            self.seen
                .lock()
                .unwrap()
                .push(description.map(str::to_string));
        }
    }

    fn fixed(state: ClassificationState, score: f64, reason: &str) -> Arc<dyn Classifier> {
        Arc::new(Fixed {
            verdict: verdict(state, score, reason),
            delay: Duration::ZERO,
        })
    }

    #[test]
    fn agreement_averages_scores() {
        let merged = reconcile(
            &verdict(ClassificationState::Normal, 0.8, "calm"),
            &verdict(ClassificationState::Normal, 0.9, "empty room"),
            0.6,
        );
        assert_eq!(merged.state, ClassificationState::Normal);
        assert!((merged.score - 0.85).abs() < 1e-9);
        assert_eq!(merged.reason.as_deref(), Some("empty room"));
    }

    #[test]
    fn agreement_tie_prefers_primary_reason() {
        let merged = reconcile(
            &verdict(ClassificationState::Alert, 0.9, "first"),
            &verdict(ClassificationState::Alert, 0.9, "second"),
            0.6,
        );
        assert_eq!(merged.reason.as_deref(), Some("first"));
    }

    #[test]
    fn weak_agreement_downgrades_to_uncertain() {
        let merged = reconcile(
            &verdict(ClassificationState::Alert, 0.4, "A"),
            &verdict(ClassificationState::Alert, 0.6, "B"),
            0.6,
        );
        assert_eq!(merged.state, ClassificationState::Uncertain);
        assert!((merged.score - 0.5).abs() < 1e-9);
        let reason = merged.reason.unwrap();
        assert!(reason.contains('B'));
        assert!(!reason.contains("Agent1"));
        assert!(!reason.contains("Agent2"));
        assert!(!reason.contains("primary"));
        assert!(!reason.contains("secondary"));
    }

    #[test]
    fn agreed_uncertain_is_not_annotated() {
        let merged = reconcile(
            &verdict(ClassificationState::Uncertain, 0.2, "dark"),
            &verdict(ClassificationState::Uncertain, 0.3, "blurry"),
            0.6,
        );
        assert_eq!(merged.state, ClassificationState::Uncertain);
        assert_eq!(merged.reason.as_deref(), Some("blurry"));
    }

    #[test]
    fn disagreement_is_uncertain_with_min_score() {
        let merged = reconcile(
            &verdict(ClassificationState::Normal, 0.95, "nothing there"),
            &verdict(ClassificationState::Alert, 0.7, "person at door"),
            0.6,
        );
        assert_eq!(merged.state, ClassificationState::Uncertain);
        assert!((merged.score - 0.7).abs() < 1e-9);
        assert_eq!(
            merged.reason.as_deref(),
            Some("Low confidence: person at door")
        );
    }

    #[test]
    fn disagreement_falls_back_to_more_confident_reason() {
        let merged = reconcile(
            &Classification::new(ClassificationState::Alert, 0.3, None),
            &verdict(ClassificationState::Normal, 0.8, "looks fine"),
            0.6,
        );
        assert_eq!(merged.reason.as_deref(), Some("Low confidence: looks fine"));
        assert!((merged.score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn agent_details_always_kept() {
        let merged = reconcile(
            &verdict(ClassificationState::Normal, 0.9, "a"),
            &verdict(ClassificationState::Normal, 0.9, "b"),
            0.6,
        );
        let details = merged.agent_details.unwrap();
        assert_eq!(details["primary"]["reason"], "a");
        assert_eq!(details["secondary"]["reason"], "b");
    }

    #[tokio::test]
    async fn runs_both_concurrently() {
        let delay = Duration::from_millis(150);
        let consensus = ConsensusClassifier::new(
            Arc::new(Fixed {
                verdict: verdict(ClassificationState::Normal, 0.9, "a"),
                delay,
            }),
            Arc::new(Fixed {
                verdict: verdict(ClassificationState::Normal, 0.7, "b"),
                delay,
            }),
            WorkerPool::new(2),
        );

        let started = std::time::Instant::now();
        let merged = consensus.classify(b"img").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(290));
        assert!((merged.score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn primary_failure_cancels_secondary() {
        let finished = Arc::new(AtomicBool::new(false));
        let consensus = ConsensusClassifier::new(
            Arc::new(Failing {
                message: "primary down",
                delay: Duration::from_millis(10),
            }),
            Arc::new(Slow {
                finished: finished.clone(),
            }),
            WorkerPool::new(2),
        )
        .with_cancel_grace(Duration::from_millis(50));

        let err = consensus.classify(b"img").await.unwrap_err();
        assert_eq!(err.to_string(), "primary down");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn primary_error_wins_when_both_fail() {
        let consensus = ConsensusClassifier::new(
            Arc::new(Failing {
                message: "primary down",
                delay: Duration::from_millis(30),
            }),
            Arc::new(Failing {
                message: "secondary down",
                delay: Duration::ZERO,
            }),
            WorkerPool::new(2),
        );
        let err = consensus.classify(b"img").await.unwrap_err();
        assert_eq!(err.to_string(), "primary down");
    }

    #[tokio::test]
    async fn secondary_failure_propagates() {
        let consensus = ConsensusClassifier::new(
            fixed(ClassificationState::Normal, 0.9, "fine"),
            Arc::new(Failing {
                message: "secondary down",
                delay: Duration::ZERO,
            }),
            WorkerPool::new(2),
        );
        let err = consensus.classify(b"img").await.unwrap_err();
        assert_eq!(err.to_string(), "secondary down");
    }

    #[tokio::test]
    async fn context_is_forwarded_to_both_children() {
        let primary = Arc::new(ContextRecorder::default());
        let secondary = Arc::new(ContextRecorder::default());
        let consensus = ConsensusClassifier::new(
            primary.clone(),
            secondary.clone(),
            WorkerPool::new(1),
        );

        consensus.set_context(Some("loading dock, forklifts are normal"));
        consensus.set_context(None);

        for recorder in [&primary, &secondary] {
            let seen = recorder.seen.lock().unwrap();
            assert_eq!(
                *seen,
                vec![Some("loading dock, forklifts are normal".to_string()), None]
            );
        }
    }

    #[tokio::test]
    async fn single_permit_pool_still_completes() {
        let consensus = ConsensusClassifier::new(
            fixed(ClassificationState::Alert, 0.9, "smoke"),
            fixed(ClassificationState::Alert, 0.8, "fire"),
            WorkerPool::new(1),
        );
        let merged = consensus.classify(b"img").await.unwrap();
        assert_eq!(merged.state, ClassificationState::Alert);
        assert_eq!(merged.reason.as_deref(), Some("smoke"));
    }

    #[tokio::test]
    async fn dropped_call_aborts_both_jobs() {
        let primary_done = Arc::new(AtomicBool::new(false));
        let secondary_done = Arc::new(AtomicBool::new(false));
        let pool = WorkerPool::new(2);
        let consensus = ConsensusClassifier::new(
            Arc::new(Slow {
                finished: primary_done.clone(),
            }),
            Arc::new(Slow {
                finished: secondary_done.clone(),
            }),
            pool.clone(),
        );

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), consensus.classify(b"img")).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.available(), 2);
        assert!(!primary_done.load(Ordering::SeqCst));
        assert!(!secondary_done.load(Ordering::SeqCst));
    }
}
