//! Suite parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

use super::context::{ContextError, SharedRequestContext};
use super::schema::validate_suite_schema;
use super::sequence::ValidationSequence;
use crate::constraints::ConstraintSpec;
use crate::template::Variables;

/// Sequence used by guided runs when none is configured.
pub const DEFAULT_VALIDATION_SEQUENCE: &str = "basic_validation_sequence";

/// Hardware profile used when none is configured.
pub const DEFAULT_HARDWARE_PROFILE: &str = "sim_unconstrained";

/// Errors that can occur when loading a suite.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read suite file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Suite failed schema validation: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Suite validation failed: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Run '{run}' references unknown validation sequence '{sequence}'")]
    UnknownSequence { run: String, sequence: String },
}

/// Which concrete models fill the two comparison roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelRoles {
    /// High-capability reference model
    pub large: String,

    /// Resource-constrained target models
    pub edge: Vec<String>,
}

fn default_validation_sequence() -> String {
    DEFAULT_VALIDATION_SEQUENCE.to_string()
}

/// Settings for one guided run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuidedRunSettings {
    /// Validation sequence applied to the guided answer
    #[serde(default = "default_validation_sequence")]
    pub validation_sequence: String,
}

impl Default for GuidedRunSettings {
    fn default() -> Self {
        Self {
            validation_sequence: default_validation_sequence(),
        }
    }
}

/// Per-run parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunParameters {
    /// Guided run on the large model
    #[serde(default, alias = "run_2")]
    pub guided_large: GuidedRunSettings,

    /// Guided run on each edge model
    #[serde(default, alias = "run_4")]
    pub guided_edge: GuidedRunSettings,
}

fn default_request_context() -> String {
    "request_context".to_string()
}
fn default_baseline_question() -> String {
    "baseline_question".to_string()
}
fn default_guided_question() -> String {
    "guided_question".to_string()
}
fn default_simulated_answer() -> String {
    "simulated_answer".to_string()
}
fn default_baseline_evaluation() -> String {
    "baseline_evaluation".to_string()
}
fn default_review_escalation() -> String {
    "review_escalation".to_string()
}

/// Template id used by each protocol step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepTemplates {
    /// Generates the shared request context
    #[serde(default = "default_request_context")]
    pub request_context: String,

    /// Single-shot question for baseline runs
    #[serde(default = "default_baseline_question")]
    pub baseline_question: String,

    /// Context-informed question for guided runs
    #[serde(default = "default_guided_question")]
    pub guided_question: String,

    /// Simulated answer to a generated question
    #[serde(default = "default_simulated_answer")]
    pub simulated_answer: String,

    /// Single-shot evaluation for baseline runs
    #[serde(default = "default_baseline_evaluation")]
    pub baseline_evaluation: String,

    /// Reviewer escalation for failed guided runs
    #[serde(default = "default_review_escalation")]
    pub review_escalation: String,
}

impl Default for StepTemplates {
    fn default() -> Self {
        Self {
            request_context: default_request_context(),
            baseline_question: default_baseline_question(),
            guided_question: default_guided_question(),
            simulated_answer: default_simulated_answer(),
            baseline_evaluation: default_baseline_evaluation(),
            review_escalation: default_review_escalation(),
        }
    }
}

/// Per-test-case template overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepTemplateOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_evaluation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_escalation: Option<String>,
}

impl StepTemplates {
    /// Apply per-case overrides.
    pub fn with_overrides(&self, overrides: &StepTemplateOverrides) -> StepTemplates {
        let pick = |own: &Option<String>, base: &String| own.clone().unwrap_or_else(|| base.clone());
        StepTemplates {
            request_context: pick(&overrides.request_context, &self.request_context),
            baseline_question: pick(&overrides.baseline_question, &self.baseline_question),
            guided_question: pick(&overrides.guided_question, &self.guided_question),
            simulated_answer: pick(&overrides.simulated_answer, &self.simulated_answer),
            baseline_evaluation: pick(&overrides.baseline_evaluation, &self.baseline_evaluation),
            review_escalation: pick(&overrides.review_escalation, &self.review_escalation),
        }
    }

    /// Every template id, for presence checks.
    pub fn all(&self) -> [&str; 6] {
        [
            &self.request_context,
            &self.baseline_question,
            &self.guided_question,
            &self.simulated_answer,
            &self.baseline_evaluation,
            &self.review_escalation,
        ]
    }
}

/// One test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
    /// Unique identifier within the suite
    pub id: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form variables (topic, audience, complexity, student level, ...)
    #[serde(default)]
    pub variables: Variables,

    /// Constraint hints applied to every run of this case
    #[serde(default)]
    pub constraints: ConstraintSpec,

    /// Criteria passed to evaluation templates
    #[serde(default)]
    pub evaluation_criteria: Value,

    /// Template overrides for this case
    #[serde(default)]
    pub step_templates: StepTemplateOverrides,

    /// Written once by the runner, read by every run afterwards
    #[serde(skip)]
    shared_context: OnceLock<SharedRequestContext>,
}

impl TestCase {
    /// Create a test case with variables only.
    pub fn new(id: impl Into<String>, variables: Variables) -> Self {
        Self {
            id: id.into(),
            description: None,
            variables,
            constraints: ConstraintSpec::default(),
            evaluation_criteria: Value::Null,
            step_templates: StepTemplateOverrides::default(),
            shared_context: OnceLock::new(),
        }
    }

    /// The shared context, once injected.
    pub fn shared_context(&self) -> Option<&SharedRequestContext> {
        self.shared_context.get()
    }

    /// Inject the shared context. A second injection is rejected.
    pub fn inject_context(
        &self,
        context: SharedRequestContext,
    ) -> Result<&SharedRequestContext, ContextError> {
        self.shared_context
            .set(context)
            .map_err(|_| ContextError::AlreadyInjected(self.id.clone()))?;
        self.shared_context
            .get()
            .ok_or_else(|| ContextError::AlreadyInjected(self.id.clone()))
    }

    /// Variables for templates, with `test_case_id` and
    /// `evaluation_criteria` added.
    pub fn template_variables(&self) -> Variables {
        let mut vars = self.variables.clone();
        vars.insert("test_case_id".to_string(), Value::String(self.id.clone()));
        if !self.evaluation_criteria.is_null() {
            vars.insert(
                "evaluation_criteria".to_string(),
                self.evaluation_criteria.clone(),
            );
        }
        vars
    }
}

fn default_hardware_profiles() -> Vec<String> {
    vec![DEFAULT_HARDWARE_PROFILE.to_string()]
}

/// A complete comparison suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSuite {
    /// Suite identifier, used in run ids
    pub id: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Model role assignments
    pub models: ModelRoles,

    /// Per-run parameters
    #[serde(default)]
    pub run_parameters: RunParameters,

    /// Descriptive hardware labels; each multiplies the combination matrix
    #[serde(default = "default_hardware_profiles")]
    pub hardware_profiles: Vec<String>,

    /// Validation sequences available to guided runs
    #[serde(default)]
    pub validation_sequences: Vec<ValidationSequence>,

    /// Inline templates (id -> text)
    #[serde(default)]
    pub templates: BTreeMap<String, String>,

    /// Template ids per step
    #[serde(default)]
    pub step_templates: StepTemplates,

    /// Test cases
    pub test_cases: Vec<TestCase>,
}

impl TestSuite {
    /// Parse a suite from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a suite from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Schema-check, deserialize and validate a suite document.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        validate_suite_schema(&value).map_err(ConfigError::SchemaError)?;
        let suite: TestSuite = serde_json::from_value(value)?;
        suite.validate()?;
        Ok(suite)
    }

    /// Parse a suite file; `.json` is read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Check cross-field rules that the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id".to_string()));
        }
        if self.models.large.trim().is_empty() {
            return Err(ConfigError::MissingField("models.large".to_string()));
        }
        if self.models.edge.is_empty() {
            return Err(ConfigError::MissingField("models.edge".to_string()));
        }
        if let Some(blank) = self.models.edge.iter().position(|m| m.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "models.edge[{}] is empty",
                blank
            )));
        }
        if self.hardware_profiles.is_empty() {
            return Err(ConfigError::ValidationError(
                "hardware_profiles must not be empty".to_string(),
            ));
        }

        let mut case_ids = HashSet::new();
        for case in &self.test_cases {
            if !case_ids.insert(&case.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate test case ID: {}",
                    case.id
                )));
            }
        }

        let mut sequence_ids = HashSet::new();
        for sequence in &self.validation_sequences {
            if !sequence_ids.insert(&sequence.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate validation sequence ID: {}",
                    sequence.id
                )));
            }
            let mut stage_ids = HashSet::new();
            for stage in &sequence.stages {
                if !stage_ids.insert(&stage.id) {
                    return Err(ConfigError::ValidationError(format!(
                        "Duplicate stage ID '{}' in sequence '{}'",
                        stage.id, sequence.id
                    )));
                }
                if stage.template.trim().is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "validation_sequences.{}.{}.template",
                        sequence.id, stage.id
                    )));
                }
            }
        }

        for (run, settings) in [
            ("guided_large", &self.run_parameters.guided_large),
            ("guided_edge", &self.run_parameters.guided_edge),
        ] {
            if self.sequence(&settings.validation_sequence).is_none() {
                return Err(ConfigError::UnknownSequence {
                    run: run.to_string(),
                    sequence: settings.validation_sequence.clone(),
                });
            }
        }

        Ok(())
    }

    /// Look up a validation sequence by id.
    pub fn sequence(&self, id: &str) -> Option<&ValidationSequence> {
        self.validation_sequences.iter().find(|s| s.id == id)
    }

    /// Effective step templates for a test case.
    pub fn step_templates_for(&self, case: &TestCase) -> StepTemplates {
        self.step_templates.with_overrides(&case.step_templates)
    }

    /// Hardware profile x edge model pairs, profile-major.
    pub fn combinations(&self) -> Vec<(&str, &str)> {
        self.hardware_profiles
            .iter()
            .flat_map(|profile| {
                self.models
                    .edge
                    .iter()
                    .map(move |edge| (profile.as_str(), edge.as_str()))
            })
            .collect()
    }

    /// Number of run records a full execution produces.
    pub fn record_count(&self) -> usize {
        self.test_cases.len() * self.hardware_profiles.len() * self.models.edge.len()
    }
}
