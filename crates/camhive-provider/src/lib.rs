pub mod consensus;
pub mod pool;
pub mod remote;
pub mod vocabulary;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use camhive_schema::Classification;
use serde::{Deserialize, Serialize};

pub use consensus::{reconcile, ConsensusClassifier, LOW_CONFIDENCE_PREFIX};
pub use pool::WorkerPool;
pub use remote::RemoteClassifier;
pub use vocabulary::LabelVocabulary;

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &[u8]) -> Result<Classification>;

    /// Push a scene description that later calls should take into account.
    /// Composite classifiers forward it to every child.
    fn set_context(&self, _description: Option<&str>) {}

    fn name(&self) -> &str {
        "classifier"
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Configuration for one HTTP-backed classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub vocabulary: LabelVocabulary,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ClassifierConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key: None,
            vocabulary: LabelVocabulary::default(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_vocabulary(mut self, vocabulary: LabelVocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }
}

/// Create a classifier from configuration.
pub fn create_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    if config.endpoint.trim().is_empty() {
        return Err(anyhow!("classifier {} requires an endpoint", config.name));
    }
    let classifier = RemoteClassifier::from_config(config)?;
    tracing::info!(
        "Registered classifier: {} ({:?} vocabulary)",
        config.name,
        config.vocabulary
    );
    Ok(Arc::new(classifier))
}
