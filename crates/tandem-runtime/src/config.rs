//! Runtime configuration: model catalog, per-step generation parameters
//! and the request timeout.
//!
//! ```yaml
//! request_timeout: 45s
//! system_prompt: "You are a careful assistant."
//! steps:
//!   validation: { temperature: 0.1, max_tokens: 512, json_output: true }
//! models:
//!   gpt-4o:
//!     provider: openai_compatible
//!     config: { base_url: "https://api.openai.com/v1" }
//!   phi-3-mini:
//!     provider: openai_compatible
//!     api_model: "phi3:mini"
//!     config: { base_url: "http://localhost:11434/v1", json_mode: false }
//! default_provider:
//!   provider: mock
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors loading a runtime config.
#[derive(Error, Debug)]
pub enum RuntimeConfigError {
    #[error("Failed to read runtime config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse runtime config: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid runtime config: {0}")]
    Invalid(String),
}

/// Sampling parameters for one kind of model call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationParams {
    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Ask the backend for a JSON object
    #[serde(default)]
    pub json_output: bool,
}

impl GenerationParams {
    /// Plain-text generation.
    pub const fn text(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
            json_output: false,
        }
    }

    /// JSON generation.
    pub const fn json(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
            json_output: true,
        }
    }
}

/// Generation parameters for each step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepParams {
    /// Shared context generation (large model)
    pub context: GenerationParams,
    /// Question generation
    pub question: GenerationParams,
    /// Simulated answer
    pub answer: GenerationParams,
    /// Baseline self-evaluation
    pub baseline_evaluation: GenerationParams,
    /// Every validation stage
    pub validation: GenerationParams,
    /// Reviewer escalation (large model)
    pub review: GenerationParams,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            context: GenerationParams::json(0.7, 1024),
            question: GenerationParams::text(0.7, 1024),
            answer: GenerationParams::text(0.7, 1024),
            baseline_evaluation: GenerationParams::json(0.3, 512),
            validation: GenerationParams::json(0.1, 512),
            review: GenerationParams::json(0.3, 1024),
        }
    }
}

/// How to build a provider for one model id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    /// Provider type registered in the `ProviderRegistry`
    pub provider: String,

    /// Model name sent to the backend; defaults to the model id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_model: Option<String>,

    /// Provider-specific configuration
    #[serde(default)]
    pub config: JsonValue,
}

impl ModelSpec {
    /// A spec for `provider` with empty config.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_model: None,
            config: JsonValue::Object(Default::default()),
        }
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Everything the runner needs besides the suite and templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Per-call timeout, e.g. `"45s"` or `"2m"`
    #[serde(with = "duration_str", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Optional system message sent before every prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Per-step generation parameters
    #[serde(default)]
    pub steps: StepParams,

    /// Model id -> provider spec
    #[serde(default)]
    pub models: BTreeMap<String, ModelSpec>,

    /// Used for model ids missing from `models`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<ModelSpec>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            system_prompt: None,
            steps: StepParams::default(),
            models: BTreeMap::new(),
            default_provider: None,
        }
    }
}

impl RuntimeConfig {
    /// A config that routes every model id to the mock provider.
    pub fn mock() -> Self {
        Self {
            default_provider: Some(ModelSpec::new("mock")),
            ..Self::default()
        }
    }

    /// Parse from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, RuntimeConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RuntimeConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Replace the catalog so every model id resolves to the mock provider.
    pub fn into_mock(mut self) -> Self {
        self.models.clear();
        self.default_provider = Some(ModelSpec::new("mock"));
        self
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        if self.request_timeout.is_zero() {
            return Err(RuntimeConfigError::Invalid(
                "request_timeout must be positive".to_string(),
            ));
        }
        for (id, spec) in &self.models {
            if spec.provider.trim().is_empty() {
                return Err(RuntimeConfigError::Invalid(format!(
                    "model '{}' has no provider",
                    id
                )));
            }
        }
        Ok(())
    }
}
