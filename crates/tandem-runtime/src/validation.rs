//! Multi-stage validation of a question/answer pair.
//!
//! A [`ValidationSequence`] is run stage by stage in priority order. Each
//! stage renders a prompt, asks a [`StageExecutor`] for model text and
//! extracts a judgment from it. Content failures (a stage judging
//! `passed: false`) are data in the [`ValidationResult`]; infrastructure
//! failures (unrenderable template, model error, unparseable output) end
//! the whole validation with a [`ValidationError`].
//!
//! ## Scoring
//!
//! `final_score` is the sum of `score * scoring_impact` over passed stages.
//! Failed stages contribute nothing. The sum is not rescaled or clamped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use tandem_core::{
    extract_judgment, ExtractionError, Metrics, TemplateError, TemplateResolver,
    ValidationSequence, ValidationStage, Variables,
};

use crate::config::GenerationParams;
use crate::executor::{ExecutionError, ModelExecutor};
use crate::models::ModelHandle;

/// Raw stage output.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Model text to extract a judgment from
    pub text: String,

    /// Metrics for the call
    pub metrics: Metrics,
}

/// Executes one stage prompt.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Produce model text for `prompt`.
    async fn execute(
        &self,
        stage: &ValidationStage,
        prompt: &str,
    ) -> Result<StageOutput, ExecutionError>;
}

/// [`StageExecutor`] backed by a model handle.
pub struct ModelStageExecutor<'a> {
    executor: &'a ModelExecutor,
    handle: &'a ModelHandle,
    params: GenerationParams,
}

impl<'a> ModelStageExecutor<'a> {
    /// Stage calls use JSON output, temperature 0.1 and 512 tokens.
    pub const DEFAULT_PARAMS: GenerationParams = GenerationParams::json(0.1, 512);

    /// Run stages on `handle` with the default stage parameters.
    pub fn new(executor: &'a ModelExecutor, handle: &'a ModelHandle) -> Self {
        Self {
            executor,
            handle,
            params: Self::DEFAULT_PARAMS,
        }
    }

    /// Override the generation parameters.
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

#[async_trait]
impl StageExecutor for ModelStageExecutor<'_> {
    async fn execute(
        &self,
        stage: &ValidationStage,
        prompt: &str,
    ) -> Result<StageOutput, ExecutionError> {
        tracing::debug!(stage = %stage.id, model = %self.handle.model_id, "Running validation stage");
        let generation = self
            .executor
            .execute(self.handle, prompt, &self.params)
            .await?;
        Ok(StageOutput {
            text: generation.text,
            metrics: generation.metrics,
        })
    }
}

/// Infrastructure failure during validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Stage '{stage}' prompt could not be rendered: {source}")]
    Template {
        stage: String,
        #[source]
        source: TemplateError,
    },

    #[error("Stage '{stage}' execution failed: {source}")]
    Execution {
        stage: String,
        #[source]
        source: ExecutionError,
    },

    #[error("Stage '{stage}' output has no usable judgment: {source}")]
    Extraction {
        stage: String,
        #[source]
        source: ExtractionError,
    },
}

impl ValidationError {
    /// Id of the stage that failed.
    pub fn stage(&self) -> &str {
        match self {
            ValidationError::Template { stage, .. }
            | ValidationError::Execution { stage, .. }
            | ValidationError::Extraction { stage, .. } => stage,
        }
    }
}

/// One executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_id: String,
    pub passed: bool,
    pub score: f64,
    pub feedback: String,
    pub scoring_impact: f64,
    pub metrics: Metrics,
}

/// Outcome of a validation sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// False if any executed stage failed
    pub is_valid: bool,

    /// Weighted sum over passed stages
    pub final_score: f64,

    /// Executed stages, in execution order
    pub stage_results: Vec<StageResult>,

    /// `[stage] feedback` lines
    pub aggregate_feedback: String,

    /// Merge of the stage metrics; absent when nothing ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,

    /// Number of stages that ran
    pub stages_executed: usize,

    /// Stage whose failure stopped the sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<String>,
}

impl ValidationResult {
    /// Result for an empty sequence.
    pub fn trivially_valid() -> Self {
        Self {
            is_valid: true,
            final_score: 0.0,
            stage_results: Vec::new(),
            aggregate_feedback: String::new(),
            metrics: None,
            stages_executed: 0,
            aborted_at: None,
        }
    }

    /// Ids of the stages that judged the answer as failing.
    pub fn failed_stages(&self) -> impl Iterator<Item = &str> {
        self.stage_results
            .iter()
            .filter(|s| !s.passed)
            .map(|s| s.stage_id.as_str())
    }
}

/// Runs validation sequences.
#[derive(Clone)]
pub struct ValidationEngine {
    templates: Arc<dyn TemplateResolver>,
}

impl ValidationEngine {
    /// Create an engine rendering stage prompts with `templates`.
    pub fn new(templates: Arc<dyn TemplateResolver>) -> Self {
        Self { templates }
    }

    /// Validate `answer` to `question` with `sequence`.
    pub async fn validate(
        &self,
        question: &str,
        answer: &str,
        sequence: &ValidationSequence,
        executor: &dyn StageExecutor,
    ) -> Result<ValidationResult, ValidationError> {
        self.validate_with_variables(question, answer, sequence, executor, &Variables::new())
            .await
    }

    /// Like [`validate`](Self::validate), with extra variables available to
    /// every stage prompt. Stage-local variables override them, and
    /// `question`, `answer` and `stage_id` override both.
    pub async fn validate_with_variables(
        &self,
        question: &str,
        answer: &str,
        sequence: &ValidationSequence,
        executor: &dyn StageExecutor,
        base: &Variables,
    ) -> Result<ValidationResult, ValidationError> {
        if sequence.is_empty() {
            return Ok(ValidationResult::trivially_valid());
        }

        let mut result = ValidationResult::trivially_valid();

        for stage in sequence.execution_order() {
            let mut vars = base.clone();
            vars.extend(stage.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
            vars.insert("question".to_string(), Value::String(question.to_string()));
            vars.insert("answer".to_string(), Value::String(answer.to_string()));
            vars.insert("stage_id".to_string(), Value::String(stage.id.clone()));

            let prompt =
                self.templates
                    .render(&stage.template, &vars)
                    .map_err(|source| ValidationError::Template {
                        stage: stage.id.clone(),
                        source,
                    })?;

            let output = executor.execute(stage, &prompt).await.map_err(|source| {
                ValidationError::Execution {
                    stage: stage.id.clone(),
                    source,
                }
            })?;

            let judgment =
                extract_judgment(&output.text).map_err(|source| ValidationError::Extraction {
                    stage: stage.id.clone(),
                    source,
                })?;

            result.stages_executed += 1;
            if !judgment.feedback.is_empty() {
                result
                    .aggregate_feedback
                    .push_str(&format!("[{}] {}\n", stage.id, judgment.feedback));
            }

            if judgment.passed {
                result.final_score += judgment.score * stage.scoring_impact;
            } else {
                result.is_valid = false;
            }

            tracing::debug!(
                stage = %stage.id,
                passed = judgment.passed,
                score = judgment.score,
                "Validation stage judged"
            );

            let passed = judgment.passed;
            result.stage_results.push(StageResult {
                stage_id: stage.id.clone(),
                passed,
                score: judgment.score,
                feedback: judgment.feedback,
                scoring_impact: stage.scoring_impact,
                metrics: output.metrics,
            });

            if !passed && stage.abort_on_failure {
                tracing::info!(stage = %stage.id, sequence = %sequence.id, "Validation aborted");
                result.aborted_at = Some(stage.id.clone());
                break;
            }
        }

        result.metrics = Metrics::merge(result.stage_results.iter().map(|s| &s.metrics));
        Ok(result)
    }
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine").finish_non_exhaustive()
    }
}
