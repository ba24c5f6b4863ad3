//! Generic HTTP classifier.
//!
//! POSTs `{image_base64, context}` to a configured endpoint and expects
//! `{label|state, score|confidence, reason}` back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use base64::Engine;
use camhive_schema::Classification;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{Classifier, ClassifierConfig, LabelVocabulary};

pub struct RemoteClassifier {
    client: reqwest::Client,
    name: String,
    endpoint: String,
    api_key: Option<String>,
    vocabulary: LabelVocabulary,
    context: ArcSwapOption<String>,
}

#[derive(Serialize)]
struct RemoteRequest<'a> {
    image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

#[derive(Deserialize)]
struct RemoteVerdict {
    #[serde(alias = "state")]
    label: String,
    #[serde(default, alias = "confidence")]
    score: f64,
    #[serde(default)]
    reason: Option<String>,
}

impl RemoteClassifier {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::from_parts(
            name.into(),
            endpoint.into(),
            None,
            LabelVocabulary::default(),
            Duration::from_secs(30),
        )
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        if config.timeout_secs == 0 {
            return Err(anyhow!("classifier {} has a zero timeout", config.name));
        }
        Ok(Self::from_parts(
            config.name.clone(),
            config.endpoint.clone(),
            config.api_key.clone().filter(|k| !k.is_empty()),
            config.vocabulary,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    fn from_parts(
        name: String,
        endpoint: String,
        api_key: Option<String>,
        vocabulary: LabelVocabulary,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            name,
            endpoint,
            api_key,
            vocabulary,
            context: ArcSwapOption::empty(),
        }
    }

    pub fn context(&self) -> Option<Arc<String>> {
        self.context.load_full()
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, image: &[u8]) -> Result<Classification> {
        let context = self.context.load_full();
        let payload = RemoteRequest {
            image_base64: base64::engine::general_purpose::STANDARD.encode(image),
            context: context.as_deref().map(String::as_str),
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(anyhow!("classifier {} timed out", self.name));
            }
            Err(e) if e.is_connect() => {
                return Err(anyhow!("classifier {} unreachable: {e}", self.name));
            }
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "classifier {} error ({}): {}",
                self.name,
                status.as_u16(),
                text.trim()
            ));
        }

        let verdict: RemoteVerdict = resp.json().await?;
        let state = self.vocabulary.map(&verdict.label);
        tracing::debug!(
            classifier = %self.name,
            label = %verdict.label,
            state = %state,
            score = verdict.score,
            "classification received"
        );
        Ok(Classification::new(state, verdict.score, verdict.reason))
    }

    fn set_context(&self, description: Option<&str>) {
        self.context.store(
            description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(|d| Arc::new(d.to_string())),
        );
    }

    fn name(&self) -> &str {
        &self.name
    }
}
