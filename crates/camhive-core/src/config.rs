use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use camhive_provider::ClassifierConfig;
use serde::{Deserialize, Serialize};

fn default_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_database() -> String {
    "data/camhive.db".to_string()
}

fn default_stream_poll_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// SQLite path, relative to the config root.
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_stream_poll_ms")]
    pub stream_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            database: default_database(),
            stream_poll_ms: default_stream_poll_ms(),
        }
    }
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_error_backoff_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

fn default_similarity_threshold() -> u32 {
    5
}

fn default_expiry_minutes() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Maximum Hamming distance between hashes that still counts as the same frame.
    #[serde(default = "default_similarity_threshold")]
    pub threshold: u32,
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: u64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_similarity_threshold(),
            expiry_minutes: default_expiry_minutes(),
        }
    }
}

fn default_run_threshold() -> u32 {
    5
}

fn default_keep_every() -> u32 {
    10
}

/// Same-state run policy shared by streak pruning and record dedupe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuppressionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_run_threshold")]
    pub threshold: u32,
    #[serde(default = "default_keep_every")]
    pub keep_every: u32,
}

impl SuppressionConfig {
    pub fn enabled(threshold: u32, keep_every: u32) -> Self {
        Self {
            enabled: true,
            threshold,
            keep_every,
        }
    }
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_run_threshold(),
            keep_every: default_keep_every(),
        }
    }
}

fn default_cooldown_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// 0 disables throttling.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

fn default_recent_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub streak: SuppressionConfig,
    #[serde(default)]
    pub dedupe: SuppressionConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            similarity: SimilarityConfig::default(),
            streak: SuppressionConfig::default(),
            dedupe: SuppressionConfig::default(),
            alert: AlertConfig::default(),
            recent_limit: default_recent_limit(),
        }
    }
}

fn default_low_confidence_threshold() -> f64 {
    0.6
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_cancel_grace_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Optional scene description pushed to both classifiers at startup.
    #[serde(default)]
    pub context: Option<String>,
    pub primary: ClassifierConfig,
    pub secondary: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifierConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamhiveConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_config(root: &Path) -> Result<CamhiveConfig> {
    let mut config: CamhiveConfig = read_yaml_file(&root.join("main.yaml"))?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &CamhiveConfig) -> Result<()> {
    for (name, policy) in [
        ("inference.streak", &config.inference.streak),
        ("inference.dedupe", &config.inference.dedupe),
    ] {
        if policy.keep_every == 0 {
            return Err(anyhow!("{name}.keep_every must be at least 1"));
        }
    }

    let threshold = config.consensus.low_confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(anyhow!(
            "consensus.low_confidence_threshold must be within [0, 1], got {threshold}"
        ));
    }

    if config.consensus.worker_pool_size == 0 {
        return Err(anyhow!("consensus.worker_pool_size must be at least 1"));
    }

    if config.inference.similarity.threshold > 64 {
        return Err(anyhow!(
            "inference.similarity.threshold cannot exceed 64 bits, got {}",
            config.inference.similarity.threshold
        ));
    }

    for (slot, classifier) in [
        ("primary", &config.consensus.primary),
        ("secondary", &config.consensus.secondary),
    ] {
        if classifier.endpoint.trim().is_empty() {
            return Err(anyhow!("consensus.{slot}.endpoint is empty"));
        }
    }

    if config.server.stream_poll_ms == 0 {
        return Err(anyhow!("server.stream_poll_ms must be positive"));
    }

    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut CamhiveConfig) {
    config.server.addr = resolve_env_var(&config.server.addr);
    config.server.database = resolve_env_var(&config.server.database);

    for classifier in [&mut config.consensus.primary, &mut config.consensus.secondary] {
        classifier.name = resolve_env_var(&classifier.name);
        classifier.endpoint = resolve_env_var(&classifier.endpoint);
        if let Some(key) = &mut classifier.api_key {
            *key = resolve_env_var(key);
        }
    }

    config.consensus.context = config
        .consensus
        .context
        .as_deref()
        .map(resolve_env_var)
        .filter(|context| !context.trim().is_empty());

    if let Some(url) = &mut config.notifier.webhook_url {
        *url = resolve_env_var(url);
    }
    // An unset variable leaves an empty URL behind; treat it as "no webhook".
    if config
        .notifier
        .webhook_url
        .as_deref()
        .is_some_and(|url| url.trim().is_empty())
    {
        config.notifier.webhook_url = None;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn fixture_config_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
    }

    #[test]
    fn load_config_from_workspace_fixtures() {
        let config = load_config(&fixture_config_root()).unwrap();
        assert_eq!(config.consensus.primary.name, "primary");
        assert_eq!(config.consensus.secondary.name, "secondary");
        assert_eq!(config.consensus.worker_pool_size, 4);
        assert!((config.consensus.low_confidence_threshold - 0.6).abs() < f64::EPSILON);
        assert!(config.inference.dedupe.enabled);
        assert_eq!(config.inference.recent_limit, 50);
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let yaml = r#"
consensus:
  primary:
    name: a
    endpoint: http://localhost:9000/a
  secondary:
    name: b
    endpoint: http://localhost:9000/b
"#;
        let config: CamhiveConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.stream_poll_ms, 15_000);
        assert_eq!(config.scheduler.tick_ms, 1_000);
        assert_eq!(config.scheduler.error_backoff_ms, 1_000);
        assert!(!config.inference.similarity.enabled);
        assert_eq!(config.inference.alert.cooldown_seconds, 300);
        assert_eq!(config.consensus.cancel_grace_ms, 500);
        assert!(config.notifier.webhook_url.is_none());
        validate_config(&config).unwrap();
    }

    #[test]
    fn validate_config_rejects_zero_keep_every() {
        let mut config = load_config(&fixture_config_root()).unwrap();
        config.inference.streak.keep_every = 0;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("inference.streak.keep_every"));
    }

    #[test]
    fn validate_config_rejects_out_of_range_threshold() {
        let mut config = load_config(&fixture_config_root()).unwrap();
        config.consensus.low_confidence_threshold = 1.5;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("low_confidence_threshold"));
    }

    #[test]
    fn validate_config_rejects_empty_worker_pool() {
        let mut config = load_config(&fixture_config_root()).unwrap();
        config.consensus.worker_pool_size = 0;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("worker_pool_size"));
    }

    #[test]
    fn resolve_env_var_replaces_env_placeholder() {
        let expected = std::env::var("PATH").unwrap();
        assert_eq!(resolve_env_var("${PATH}"), expected);
    }

    #[test]
    fn resolve_env_var_unclosed_bracket() {
        assert_eq!(resolve_env_var("prefix_${UNCLOSED"), "prefix_${UNCLOSED");
    }

    #[test]
    fn resolve_env_var_missing_env_returns_empty() {
        let result = resolve_env_var("val=${CAMHIVE_NONEXISTENT_VAR_XYZ}");
        assert_eq!(result, "val=");
    }

    #[test]
    fn unset_webhook_variable_disables_webhook() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.yaml"),
            r#"
consensus:
  primary:
    name: a
    endpoint: http://localhost:9000/a
  secondary:
    name: b
    endpoint: http://localhost:9000/b
notifier:
  webhook_url: "${CAMHIVE_NONEXISTENT_WEBHOOK_XYZ}"
"#,
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert!(config.notifier.webhook_url.is_none());
    }
}
