//! Runtime configuration.
//!
//! One YAML file describes the model roster, fallback mapping, budgets,
//! circuit thresholds, and scheduling offsets. Parsing and validation
//! happen once at startup; a config that would misbehave at 89 minutes
//! before kickoff should refuse to load at boot instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use scoreline_core::domain::{
    ModelEntry, PromptVariant, ProviderBackend, ResponseHandler, TimeoutClass,
};

use crate::resilience::CircuitBreakerConfig;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config validation failed: {0}")]
    Validation(String),
}

/// Serialize durations as humane strings ("30s", "6h") in YAML.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// One model in the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Stable id used across predictions, budgets, and the fallback graph.
    pub id: String,

    pub backend: ProviderBackend,

    /// Backend-side model name (e.g. "claude-sonnet-4-5-20250514").
    pub model_name: String,

    /// Base URL override; required for OpenAI-compatible endpoints.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key for this model's endpoint.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Mapped equivalent to substitute when this model fails.
    #[serde(default)]
    pub fallback: Option<String>,

    #[serde(default)]
    pub timeout_class: TimeoutClass,

    #[serde(default)]
    pub prompt_variant: PromptVariant,

    #[serde(default)]
    pub response_handler: ResponseHandler,
}

impl ModelConfig {
    /// Seed row for the model registry.
    pub fn to_entry(&self) -> ModelEntry {
        ModelEntry {
            id: self.id.clone(),
            backend: self.backend,
            model_name: self.model_name.clone(),
            active: true,
            consecutive_failures: 0,
            last_failure_at: None,
            fallback_target: self.fallback.clone(),
            timeout_class: self.timeout_class,
            prompt_variant: self.prompt_variant,
            response_handler: self.response_handler,
        }
    }
}

/// Offsets from kickoff at which pipeline jobs run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Analysis runs this long before kickoff.
    #[serde(with = "duration_str", default = "default_analysis_offset")]
    pub analysis_offset: Duration,

    /// Predictions run this long before kickoff.
    #[serde(with = "duration_str", default = "default_predictions_offset")]
    pub predictions_offset: Duration,

    /// Late retry slot for models that failed the main predictions pass.
    #[serde(with = "duration_str", default = "default_predictions_retry_offset")]
    pub predictions_retry_offset: Duration,

    /// Poll interval while a match is live.
    #[serde(with = "duration_str", default = "default_live_interval")]
    pub live_monitor_interval: Duration,
}

fn default_analysis_offset() -> Duration {
    Duration::from_secs(6 * 3600)
}
fn default_predictions_offset() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_predictions_retry_offset() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_live_interval() -> Duration {
    Duration::from_secs(2 * 60)
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            analysis_offset: default_analysis_offset(),
            predictions_offset: default_predictions_offset(),
            predictions_retry_offset: default_predictions_retry_offset(),
            live_monitor_interval: default_live_interval(),
        }
    }
}

/// Per-provider daily request quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Applies when a provider has no explicit override.
    #[serde(default = "default_daily_limit")]
    pub daily_request_limit: u32,

    /// Overrides keyed by model id.
    #[serde(default)]
    pub per_provider: BTreeMap<String, u32>,
}

fn default_daily_limit() -> u32 {
    200
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_request_limit: default_daily_limit(),
            per_provider: BTreeMap::new(),
        }
    }
}

impl BudgetConfig {
    pub fn daily_limit(&self, provider: &str) -> u32 {
        self.per_provider
            .get(provider)
            .copied()
            .unwrap_or(self.daily_request_limit)
    }
}

/// Worker pool sizing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent provider calls within one predictions job.
    #[serde(default = "default_prediction_concurrency")]
    pub prediction_concurrency: usize,

    /// Concurrent jobs per job type.
    #[serde(default = "default_worker_concurrency")]
    pub job_concurrency: usize,

    /// Failed jobs move to the dead set after this many attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Queue poll cadence.
    #[serde(with = "duration_str", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_prediction_concurrency() -> usize {
    5
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            prediction_concurrency: default_prediction_concurrency(),
            job_concurrency: default_worker_concurrency(),
            max_retries: default_max_retries(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Model health management: auto-disable and probe re-enable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealthConfig {
    /// Consecutive failures before a model is taken out of rotation.
    #[serde(default = "default_disable_threshold")]
    pub disable_threshold: u32,

    /// A disabled model becomes eligible for a single probe after this.
    #[serde(with = "duration_str", default = "default_reenable_cooldown")]
    pub reenable_cooldown: Duration,
}

fn default_disable_threshold() -> u32 {
    3
}
fn default_reenable_cooldown() -> Duration {
    Duration::from_secs(30 * 60)
}

impl Default for ModelHealthConfig {
    fn default() -> Self {
        Self {
            disable_threshold: default_disable_threshold(),
            reenable_cooldown: default_reenable_cooldown(),
        }
    }
}

/// Admin retry surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_bind")]
    pub bind: String,

    /// Environment variable holding the bearer token.
    #[serde(default = "default_admin_token_env")]
    pub auth_token_env: String,
}

fn default_admin_bind() -> String {
    "127.0.0.1:8090".to_string()
}
fn default_admin_token_env() -> String {
    "SCORELINE_ADMIN_TOKEN".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind: default_admin_bind(),
            auth_token_env: default_admin_token_env(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    pub models: Vec<ModelConfig>,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub model_health: ModelHealthConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    /// Deadline for standard models.
    #[serde(with = "duration_str", default = "default_standard_timeout")]
    pub standard_timeout: Duration,

    /// Deadline for reasoning models. These stream an internal
    /// chain-of-thought first, so the gap to standard is large on purpose.
    #[serde(with = "duration_str", default = "default_reasoning_timeout")]
    pub reasoning_timeout: Duration,
}

fn default_database_path() -> String {
    "scoreline.db".to_string()
}
fn default_standard_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_reasoning_timeout() -> Duration {
    Duration::from_secs(150)
}

impl RuntimeConfig {
    /// Parse a config from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from a YAML file and validate it.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Structural validation. The fallback graph gets its own dedicated
    /// pass (cycles, depth) at startup; this catches what serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::Validation(
                "at least one model must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate model id: '{}'",
                    model.id
                )));
            }
            if model.backend == ProviderBackend::OpenAiCompatible && model.base_url.is_none() {
                return Err(ConfigError::Validation(format!(
                    "model '{}' uses an OpenAI-compatible backend and needs a base_url",
                    model.id
                )));
            }
        }

        for model in &self.models {
            if let Some(target) = &model.fallback {
                if !seen.contains(target.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "model '{}' falls back to unknown model '{}'",
                        model.id, target
                    )));
                }
            }
        }

        if self.reasoning_timeout <= self.standard_timeout {
            return Err(ConfigError::Validation(
                "reasoning_timeout must exceed standard_timeout".to_string(),
            ));
        }

        Ok(())
    }

    /// Deadline for a model's timeout class.
    pub fn timeout_for(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Standard => self.standard_timeout,
            TimeoutClass::Reasoning => self.reasoning_timeout,
        }
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}
