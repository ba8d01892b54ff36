//! Suite runner for the four-run comparison protocol.
//!
//! For every test case the large model first writes a shared request
//! context (topic plus optional constraints). Then, for every hardware
//! profile x edge model combination, four runs execute one after another:
//!
//! 1. baseline on the large model
//! 2. guided on the large model
//! 3. baseline on the edge model
//! 4. guided on the edge model
//!
//! Baseline runs generate a question, answer it, self-evaluate and check
//! constraints. Guided runs generate a context-informed question, answer
//! it, run the configured validation sequence, check constraints and, if
//! anything failed, escalate to a reviewer on the large model.
//!
//! A failing run is recorded with its error and never stops its siblings.
//! Nothing is retried.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use tandem_core::{
    extract_object, normalize_unit_score, ConfigError, ConstraintEnforcer, ConstraintResult,
    ContextError, ExtractionError, SharedRequestContext, StepTemplates, StructuredJudgment,
    TemplateError, TemplateResolver, TestCase, TestSuite, ValidationSequence, Variables,
};

use crate::config::{GenerationParams, RuntimeConfig};
use crate::executor::{ExecutionError, ModelExecutor};
use crate::models::{ModelCache, ModelHandle, ModelInitError};
use crate::providers::ProviderRegistry;
use crate::run::{
    FinalDecision, ModelRole, RunKind, RunOutcome, RunRecord, RunSink, ScoredJudgment,
    SuiteSummary,
};
use crate::validation::{ModelStageExecutor, ValidationEngine, ValidationError, ValidationResult};

lazy_static! {
    static ref UNSAFE_ID_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_\-]").unwrap();
}

const STEP_CONTEXT: &str = "context";
const STEP_QUESTION: &str = "question";
const STEP_ANSWER: &str = "answer";
const STEP_EVALUATION: &str = "evaluation";
const STEP_VALIDATION: &str = "validation";
const STEP_REVIEW: &str = "review";

/// Keys accepted in place of `score` in evaluation and review output.
const SCORE_ALIASES: [&str; 3] = ["rating", "evaluation", "grade"];

/// Answer length hints for guided prompts when the context sets none.
const DEFAULT_MIN_WORDS: usize = 100;
const DEFAULT_MAX_WORDS: usize = 500;

/// Suite-level failures. Any of these stops the suite before a run starts.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid suite: {0}")]
    Config(#[from] ConfigError),

    #[error("Large model unavailable: {0}")]
    LargeModel(#[from] ModelInitError),

    #[error("Runner not configured: {0}")]
    NotConfigured(String),
}

/// Failure of one protocol step; fails the enclosing run.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Step '{step}' template failed: {source}")]
    Template {
        step: &'static str,
        #[source]
        source: TemplateError,
    },

    #[error("Step '{step}' model call failed: {source}")]
    Execution {
        step: &'static str,
        #[source]
        source: ExecutionError,
    },

    #[error("Step '{step}' output could not be parsed: {source}")]
    Extraction {
        step: &'static str,
        #[source]
        source: ExtractionError,
    },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Validation sequence '{0}' not found")]
    MissingSequence(String),
}

/// Build a run id from its parts, replacing anything outside
/// `[A-Za-z0-9_-]` with `_`.
pub fn run_id(suite: &str, case: &str, edge: &str, profile: &str, counter: usize) -> String {
    let raw = format!("{}_{}_{}_{}_{}", suite, case, edge, profile, counter);
    UNSAFE_ID_CHARS.replace_all(&raw, "_").into_owned()
}

/// Extract a judgment, accepting `comments` for `feedback` and
/// `rating`/`evaluation`/`grade` for `score`, then rescale the score to
/// [0, 1].
pub fn parse_scored_judgment(text: &str) -> Result<ScoredJudgment, ExtractionError> {
    let (mut object, _) = extract_object(text)?;

    if !object.contains_key("feedback") {
        if let Some(comments) = object.remove("comments") {
            object.insert("feedback".to_string(), comments);
        }
    }
    if !object.contains_key("score") {
        let alias = SCORE_ALIASES
            .iter()
            .find_map(|key| object.get(*key).filter(|v| v.is_number()).cloned());
        if let Some(score) = alias {
            object.insert("score".to_string(), score);
        }
    }

    let judgment = StructuredJudgment::from_object(object)?;
    let raw_score = judgment.score;
    Ok(ScoredJudgment {
        judgment: StructuredJudgment {
            score: normalize_unit_score(raw_score),
            ..judgment
        },
        raw_score,
    })
}

/// Text handed to the reviewer describing what failed.
fn review_summary(validation: &ValidationResult, constraints: &ConstraintResult) -> String {
    let mut summary = format!(
        "Validation: {} (score {:.2})\n",
        if validation.is_valid { "PASSED" } else { "FAILED" },
        validation.final_score
    );
    for stage in &validation.stage_results {
        summary.push_str(&format!(
            "- [{}] {} ({:.2}): {}\n",
            stage.stage_id,
            if stage.passed { "PASS" } else { "FAIL" },
            stage.score,
            stage.feedback
        ));
    }
    if let Some(stage) = &validation.aborted_at {
        summary.push_str(&format!("Stopped after stage '{}'\n", stage));
    }
    if constraints.passed {
        summary.push_str("Constraints: all satisfied\n");
    } else {
        summary.push_str(&format!(
            "Constraints: {} violation(s)\n",
            constraints.violations.len()
        ));
        for violation in &constraints.violations {
            summary.push_str(&format!("- {}\n", violation));
        }
    }
    summary
}

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

/// Runs suites.
pub struct Runner {
    config: RuntimeConfig,
    templates: Arc<dyn TemplateResolver>,
    models: ModelCache,
    executor: ModelExecutor,
    engine: ValidationEngine,
    enforcer: ConstraintEnforcer,
}

impl Runner {
    /// Create a runner.
    pub fn new(
        config: RuntimeConfig,
        templates: Arc<dyn TemplateResolver>,
        registry: ProviderRegistry,
    ) -> Self {
        let models = ModelCache::new(registry, &config);
        let executor = ModelExecutor::new(config.request_timeout)
            .with_system_prompt(config.system_prompt.clone());
        Self {
            engine: ValidationEngine::new(Arc::clone(&templates)),
            templates,
            models,
            executor,
            enforcer: ConstraintEnforcer::new(),
            config,
        }
    }

    /// The model cache, for preloading handles.
    pub fn models(&self) -> &ModelCache {
        &self.models
    }

    /// Execute every test case and combination of `suite`.
    ///
    /// Records go to `sink` as they finish; the summary goes last and is
    /// also returned. Sink errors are logged and otherwise ignored.
    pub async fn run_suite(
        &self,
        suite: &TestSuite,
        sink: &mut dyn RunSink,
    ) -> Result<SuiteSummary, RunnerError> {
        suite.validate()?;
        self.warn_missing_templates(suite);

        let large = self.models.get_or_init(&suite.models.large)?;

        tracing::info!(
            suite = %suite.id,
            test_cases = suite.test_cases.len(),
            records = suite.record_count(),
            "Starting suite"
        );

        let mut records = Vec::with_capacity(suite.record_count());
        let mut counter = 0usize;

        for case in &suite.test_cases {
            let templates = suite.step_templates_for(case);
            let context = self.ensure_context(case, &templates, &large).await;
            if let Err(e) = &context {
                tracing::warn!(test_case = %case.id, error = %e, "Shared context generation failed");
            }

            for (profile, edge) in suite.combinations() {
                counter += 1;
                let mut record = RunRecord::new(
                    run_id(&suite.id, &case.id, edge, profile, counter),
                    &suite.id,
                    &case.id,
                    &suite.models.large,
                    edge,
                    profile,
                );

                match &context {
                    Err(e) => record.fail(format!("Shared context generation failed: {}", e)),
                    Ok(context) => match self.models.get_or_init(edge) {
                        Err(e) => {
                            tracing::warn!(run_id = %record.run_id, error = %e, "Edge model unavailable");
                            record.fail(e.to_string());
                        }
                        Ok(edge_handle) => {
                            self.run_combination(
                                suite,
                                case,
                                &templates,
                                context,
                                &large,
                                &edge_handle,
                                &mut record,
                            )
                            .await;
                            record.finish();
                        }
                    },
                }

                tracing::info!(
                    run_id = %record.run_id,
                    status = ?record.status,
                    "Record finished"
                );
                if let Err(e) = sink.record(&record) {
                    tracing::warn!(run_id = %record.run_id, error = %e, "Failed to write run record");
                }
                records.push(record);
            }
        }

        let summary = SuiteSummary::from_records(&suite.id, &records);
        if let Err(e) = sink.summary(&summary) {
            tracing::warn!(suite = %suite.id, error = %e, "Failed to write suite summary");
        }
        tracing::info!(
            suite = %suite.id,
            completed_runs = summary.completed_runs,
            failed_runs = summary.failed_runs,
            "Suite finished"
        );
        Ok(summary)
    }

    fn warn_missing_templates(&self, suite: &TestSuite) {
        let step_ids = suite
            .test_cases
            .iter()
            .flat_map(|case| suite.step_templates_for(case).all().map(str::to_string));
        let stage_ids = suite
            .validation_sequences
            .iter()
            .flat_map(|seq| seq.stages.iter().map(|stage| stage.template.clone()));
        for id in step_ids.chain(stage_ids) {
            if !self.templates.contains(&id) {
                tracing::warn!(template = %id, "Template referenced by suite is not loaded");
            }
        }
    }

    /// The case's shared context, generating and injecting it on first use.
    async fn ensure_context<'c>(
        &self,
        case: &'c TestCase,
        templates: &StepTemplates,
        large: &ModelHandle,
    ) -> Result<&'c SharedRequestContext, StepError> {
        if let Some(context) = case.shared_context() {
            return Ok(context);
        }

        let prompt = self
            .templates
            .render(&templates.request_context, &case.template_variables())
            .map_err(|source| StepError::Template {
                step: STEP_CONTEXT,
                source,
            })?;
        let generation = self
            .executor
            .execute(large, &prompt, &self.config.steps.context)
            .await
            .map_err(|source| StepError::Execution {
                step: STEP_CONTEXT,
                source,
            })?;
        let (object, method) =
            extract_object(&generation.text).map_err(|source| StepError::Extraction {
                step: STEP_CONTEXT,
                source,
            })?;

        let context = SharedRequestContext::from_object(object)?;
        tracing::info!(
            test_case = %case.id,
            topic = %context.topic,
            method = ?method,
            latency_ms = generation.metrics.latency_ms.unwrap_or_default(),
            "Shared context generated"
        );
        Ok(case.inject_context(context)?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_combination(
        &self,
        suite: &TestSuite,
        case: &TestCase,
        templates: &StepTemplates,
        context: &SharedRequestContext,
        large: &ModelHandle,
        edge: &ModelHandle,
        record: &mut RunRecord,
    ) {
        for kind in RunKind::ALL {
            let handle = match kind.role() {
                ModelRole::Large => large,
                ModelRole::Edge => edge,
            };
            let mut outcome = RunOutcome::new(kind, &handle.model_id);

            let result = if kind.is_guided() {
                let sequence_id = match kind.role() {
                    ModelRole::Large => &suite.run_parameters.guided_large.validation_sequence,
                    ModelRole::Edge => &suite.run_parameters.guided_edge.validation_sequence,
                };
                match suite.sequence(sequence_id) {
                    Some(sequence) => {
                        self.guided_run(
                            case,
                            templates,
                            context,
                            sequence,
                            handle,
                            large,
                            &mut outcome,
                        )
                        .await
                    }
                    None => Err(StepError::MissingSequence(sequence_id.clone())),
                }
            } else {
                self.baseline_run(case, templates, context, handle, &mut outcome)
                    .await
            };

            if let Err(e) = result {
                tracing::warn!(
                    run_id = %record.run_id,
                    run = %kind,
                    model = %handle.model_id,
                    error = %e,
                    "Run failed"
                );
                outcome.fail(e.to_string());
            } else {
                tracing::debug!(
                    run_id = %record.run_id,
                    run = %kind,
                    decision = ?outcome.final_decision,
                    "Run completed"
                );
            }

            outcome.seal();
            record.push(outcome);
        }
    }

    /// Render, call and record metrics for one generation step.
    async fn generate(
        &self,
        step: &'static str,
        template: &str,
        vars: &Variables,
        handle: &ModelHandle,
        params: &GenerationParams,
        outcome: &mut RunOutcome,
    ) -> Result<String, StepError> {
        let prompt = self
            .templates
            .render(template, vars)
            .map_err(|source| StepError::Template { step, source })?;
        let generation = self
            .executor
            .execute(handle, &prompt, params)
            .await
            .map_err(|source| StepError::Execution { step, source })?;
        outcome
            .step_metrics
            .insert(step.to_string(), generation.metrics);
        Ok(generation.text)
    }

    async fn baseline_run(
        &self,
        case: &TestCase,
        templates: &StepTemplates,
        context: &SharedRequestContext,
        handle: &ModelHandle,
        outcome: &mut RunOutcome,
    ) -> Result<(), StepError> {
        let steps = &self.config.steps;
        let mut vars = case.template_variables();
        vars.insert("topic".to_string(), text(&context.topic));
        vars.entry("student_level".to_string())
            .or_insert_with(|| text("average"));
        vars.insert("aware_of_constraints".to_string(), Value::Bool(false));

        let question = self
            .generate(
                STEP_QUESTION,
                &templates.baseline_question,
                &vars,
                handle,
                &steps.question,
                outcome,
            )
            .await?;
        outcome.question = Some(question.clone());
        vars.insert("question".to_string(), text(&question));

        let answer = self
            .generate(
                STEP_ANSWER,
                &templates.simulated_answer,
                &vars,
                handle,
                &steps.answer,
                outcome,
            )
            .await?;
        outcome.answer = Some(answer.clone());
        vars.insert("answer".to_string(), text(&answer));
        vars.insert("student_answer".to_string(), text(&answer));
        vars.entry("evaluation_criteria".to_string())
            .or_insert_with(|| Value::Object(Default::default()));

        let raw_evaluation = self
            .generate(
                STEP_EVALUATION,
                &templates.baseline_evaluation,
                &vars,
                handle,
                &steps.baseline_evaluation,
                outcome,
            )
            .await?;
        let evaluation =
            parse_scored_judgment(&raw_evaluation).map_err(|source| StepError::Extraction {
                step: STEP_EVALUATION,
                source,
            })?;

        let constraints = self.enforcer.enforce(&answer, &case.constraints);
        outcome.final_decision = Some(if evaluation.judgment.passed && constraints.passed {
            FinalDecision::Accepted
        } else {
            FinalDecision::Rejected
        });
        outcome.baseline_evaluation = Some(evaluation);
        outcome.constraints = Some(constraints);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn guided_run(
        &self,
        case: &TestCase,
        templates: &StepTemplates,
        context: &SharedRequestContext,
        sequence: &ValidationSequence,
        handle: &ModelHandle,
        reviewer: &ModelHandle,
        outcome: &mut RunOutcome,
    ) -> Result<(), StepError> {
        let steps = &self.config.steps;
        let constraint_spec = context.effective_constraints(&case.constraints);

        let mut vars = case.template_variables();
        vars.extend(context.variables());
        vars.entry("student_level".to_string())
            .or_insert_with(|| text("average"));
        vars.insert("aware_of_constraints".to_string(), Value::Bool(true));
        vars.insert(
            "min_words".to_string(),
            Value::from(constraint_spec.min_words.unwrap_or(DEFAULT_MIN_WORDS)),
        );
        vars.insert(
            "max_words".to_string(),
            Value::from(constraint_spec.max_words.unwrap_or(DEFAULT_MAX_WORDS)),
        );

        let question = self
            .generate(
                STEP_QUESTION,
                &templates.guided_question,
                &vars,
                handle,
                &steps.question,
                outcome,
            )
            .await?;
        outcome.question = Some(question.clone());
        vars.insert("question".to_string(), text(&question));

        let answer = self
            .generate(
                STEP_ANSWER,
                &templates.simulated_answer,
                &vars,
                handle,
                &steps.answer,
                outcome,
            )
            .await?;
        outcome.answer = Some(answer.clone());
        vars.insert("answer".to_string(), text(&answer));
        vars.insert("student_answer".to_string(), text(&answer));

        let stage_executor =
            ModelStageExecutor::new(&self.executor, handle).with_params(steps.validation);
        let validation = self
            .engine
            .validate_with_variables(&question, &answer, sequence, &stage_executor, &vars)
            .await?;
        if let Some(metrics) = &validation.metrics {
            outcome
                .step_metrics
                .insert(STEP_VALIDATION.to_string(), metrics.clone());
        }

        let constraints = self.enforcer.enforce(&answer, &constraint_spec);
        let needs_review = !validation.is_valid || !constraints.passed;

        if needs_review {
            tracing::debug!(
                model = %handle.model_id,
                valid = validation.is_valid,
                violations = constraints.violations.len(),
                "Escalating to reviewer"
            );
            vars.insert(
                "validation_summary".to_string(),
                text(&review_summary(&validation, &constraints)),
            );
            vars.insert(
                "aggregate_feedback".to_string(),
                text(&validation.aggregate_feedback),
            );
            vars.insert(
                "constraint_violations".to_string(),
                Value::from(constraints.violations.clone()),
            );
        }
        outcome.validation = Some(validation);
        outcome.constraints = Some(constraints);

        if !needs_review {
            outcome.final_decision = Some(FinalDecision::Accepted);
            return Ok(());
        }

        let raw_review = self
            .generate(
                STEP_REVIEW,
                &templates.review_escalation,
                &vars,
                reviewer,
                &steps.review,
                outcome,
            )
            .await?;
        let review = parse_scored_judgment(&raw_review).map_err(|source| StepError::Extraction {
            step: STEP_REVIEW,
            source,
        })?;
        outcome.final_decision = Some(if review.judgment.passed {
            FinalDecision::Escalated
        } else {
            FinalDecision::Rejected
        });
        outcome.review = Some(review);
        Ok(())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("models", &self.models)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Runner`].
pub struct RunnerBuilder {
    config: RuntimeConfig,
    registry: ProviderRegistry,
    templates: Option<Arc<dyn TemplateResolver>>,
    handles: Vec<ModelHandle>,
}

impl RunnerBuilder {
    /// Create a new builder with the built-in providers.
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            registry: ProviderRegistry::with_defaults(),
            templates: None,
            handles: Vec::new(),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the provider registry.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the template resolver.
    pub fn templates(mut self, templates: Arc<dyn TemplateResolver>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Preload a model handle, bypassing the catalog for its id.
    pub fn model(mut self, handle: ModelHandle) -> Self {
        self.handles.push(handle);
        self
    }

    /// Build the runner.
    pub fn build(self) -> Result<Runner, RunnerError> {
        let templates = self
            .templates
            .ok_or_else(|| RunnerError::NotConfigured("No template resolver set".to_string()))?;

        let runner = Runner::new(self.config, templates, self.registry);
        for handle in self.handles {
            runner.models.insert(handle);
        }
        Ok(runner)
    }
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionConfig, LlmProvider, ProviderError, ScriptedProvider};
    use crate::run::{MemorySink, RecordStatus, RunPhase, RunStatus};
    use tandem_core::TemplateStore;

    const SUITE: &str = r#"
id: "science suite"
models:
  large: "gpt-4o"
  edge: ["phi-3-mini"]
validation_sequences:
  - id: "basic_validation_sequence"
    stages:
      - id: "relevance"
        template: "stage_check"
        priority: 10
        scoring_impact: 0.5
      - id: "clarity"
        template: "stage_check"
        scoring_impact: 0.5
test_cases:
  - id: "tides"
    variables:
      grade: "6"
"#;

    fn templates() -> Arc<dyn TemplateResolver> {
        let mut store = TemplateStore::new();
        store.extend([
            ("request_context", "CONTEXT for [test_case_id]"),
            ("baseline_question", "BASELINE QUESTION about [topic]"),
            ("guided_question", "GUIDED QUESTION about [topic] in [max_words] words"),
            ("simulated_answer", "ANSWER [question]"),
            ("baseline_evaluation", "EVALUATE [student_answer]"),
            ("review_escalation", "REVIEW [validation_summary]"),
            ("stage_check", "STAGE [stage_id] on [topic]: [answer]"),
        ]);
        Arc::new(store)
    }

    const ANSWER: &str = "The moon's gravity pulls on the oceans and that causes two tides every day.";

    fn respond(prompt: &str) -> Result<String, ProviderError> {
        let text = if prompt.starts_with("CONTEXT") {
            r#"Here you go: {"topic": "Tides", "constraints": {"max_words": 50}}"#
        } else if prompt.starts_with("BASELINE QUESTION") || prompt.starts_with("GUIDED QUESTION") {
            "What causes tides?"
        } else if prompt.starts_with("ANSWER") {
            ANSWER
        } else if prompt.starts_with("EVALUATE") {
            r#"{"passed": true, "rating": 8, "comments": "solid"}"#
        } else if prompt.starts_with("STAGE") {
            r#"```json
{"passed": true, "score": 0.9, "feedback": "fine"}
```"#
        } else if prompt.starts_with("REVIEW") {
            "- passed: true\n- score: 7\n- feedback: acceptable after review"
        } else {
            return Err(ProviderError::ParseError(format!("unexpected prompt: {}", prompt)));
        };
        Ok(text.to_string())
    }

    fn scripted<F>(name: &str, script: F) -> Arc<ScriptedProvider>
    where
        F: Fn(&str, &CompletionConfig) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Arc::new(ScriptedProvider::new(name, script))
    }

    fn runner(large: Arc<ScriptedProvider>, edge: Arc<ScriptedProvider>) -> Runner {
        let large: Arc<dyn LlmProvider> = large;
        let edge: Arc<dyn LlmProvider> = edge;
        RunnerBuilder::new()
            .templates(templates())
            .model(ModelHandle::new("gpt-4o", large))
            .model(ModelHandle::new("phi-3-mini", edge))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_protocol_completes() {
        let large = scripted("large", |p, _| respond(p));
        let edge = scripted("edge", |p, _| respond(p));
        let runner = runner(large.clone(), edge.clone());
        let suite = TestSuite::from_yaml(SUITE).unwrap();
        let mut sink = MemorySink::new();

        let summary = runner.run_suite(&suite, &mut sink).await.unwrap();

        assert_eq!(sink.records.len(), 1);
        let record = &sink.records[0];
        assert_eq!(record.run_id, "science_suite_tides_phi-3-mini_sim_unconstrained_1");
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.phase, RunPhase::Complete);
        let kinds: Vec<RunKind> = record.runs.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, RunKind::ALL.to_vec());

        let baseline = record.outcome(RunKind::BaselineEdge).unwrap();
        assert_eq!(baseline.model, "phi-3-mini");
        let evaluation = baseline.baseline_evaluation.as_ref().unwrap();
        assert!((evaluation.judgment.score - 0.8).abs() < 1e-9);
        assert_eq!(evaluation.raw_score, 8.0);
        assert_eq!(evaluation.judgment.feedback, "solid");
        assert_eq!(baseline.final_decision, Some(FinalDecision::Accepted));
        assert!(baseline.step_metrics.contains_key("evaluation"));

        let guided = record.outcome(RunKind::GuidedEdge).unwrap();
        let validation = guided.validation.as_ref().unwrap();
        assert!(validation.is_valid);
        assert!((validation.final_score - 0.9).abs() < 1e-9);
        assert!(guided.review.is_none());
        assert_eq!(guided.final_decision, Some(FinalDecision::Accepted));
        assert!(guided.step_metrics.contains_key("validation"));
        assert!(guided.total_metrics.is_some());

        assert_eq!(suite.test_cases[0].shared_context().unwrap().topic, "Tides");
        assert!(edge
            .calls()
            .iter()
            .any(|p| p == "GUIDED QUESTION about Tides in 50 words"));
        assert!(edge.calls().iter().all(|p| !p.starts_with("CONTEXT")));
        assert!(edge.calls().iter().any(|p| p.starts_with("STAGE relevance on Tides")));

        assert_eq!(summary.completed_runs, 4);
        assert!(sink.summary.is_some());
    }

    #[tokio::test]
    async fn test_guided_failure_does_not_stop_siblings() {
        let large = scripted("large", |p, _| respond(p));
        let edge = scripted("edge", |p, _| {
            if p.starts_with("GUIDED QUESTION") {
                Err(ProviderError::ApiError {
                    status: 503,
                    message: "overloaded".to_string(),
                })
            } else {
                respond(p)
            }
        });
        let runner = runner(large, edge);
        let suite = TestSuite::from_yaml(SUITE).unwrap();
        let mut sink = MemorySink::new();

        let summary = runner.run_suite(&suite, &mut sink).await.unwrap();

        let record = &sink.records[0];
        assert_eq!(record.status, RecordStatus::PartialFailure);
        let failed = record.outcome(RunKind::GuidedEdge).unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("overloaded"));
        assert!(failed.final_decision.is_none());
        assert!(record.outcome(RunKind::BaselineEdge).unwrap().is_completed());
        assert!(record.outcome(RunKind::GuidedLarge).unwrap().is_completed());

        assert_eq!(summary.failed_runs, 1);
        assert_eq!(summary.completed_runs, 3);
        assert_eq!(summary.errors[0].run_kind, Some(RunKind::GuidedEdge));
    }

    #[tokio::test]
    async fn test_failed_validation_escalates_to_large_reviewer() {
        let large = scripted("large", |p, _| respond(p));
        let edge = scripted("edge", |p, _| {
            if p.starts_with("STAGE relevance") {
                Ok(r#"{"passed": false, "score": 0.1, "feedback": "off topic"}"#.to_string())
            } else {
                respond(p)
            }
        });
        let runner = runner(large.clone(), edge.clone());
        let suite = TestSuite::from_yaml(SUITE).unwrap();
        let mut sink = MemorySink::new();

        runner.run_suite(&suite, &mut sink).await.unwrap();

        let guided = sink.records[0].outcome(RunKind::GuidedEdge).unwrap();
        let validation = guided.validation.as_ref().unwrap();
        assert!(!validation.is_valid);
        assert_eq!(validation.aborted_at.as_deref(), Some("relevance"));
        assert_eq!(validation.stages_executed, 1);

        let review = guided.review.as_ref().unwrap();
        assert!((review.judgment.score - 0.7).abs() < 1e-9);
        assert_eq!(guided.final_decision, Some(FinalDecision::Escalated));

        let reviews: Vec<String> = large
            .calls()
            .into_iter()
            .filter(|p| p.starts_with("REVIEW"))
            .collect();
        assert_eq!(reviews.len(), 1);
        assert!(reviews[0].contains("[relevance] FAIL"));
        assert!(edge.calls().iter().all(|p| !p.starts_with("REVIEW")));
        assert!(edge.calls().iter().all(|p| !p.starts_with("STAGE clarity")));
    }

    #[tokio::test]
    async fn test_constraint_violation_triggers_review() {
        let large = scripted("large", |p, _| {
            if p.starts_with("CONTEXT") {
                Ok(r#"{"topic": "Tides", "constraints": {"min_words": 200}}"#.to_string())
            } else if p.starts_with("REVIEW") {
                Ok(r#"{"passed": false, "score": 0.3, "feedback": "too short"}"#.to_string())
            } else {
                respond(p)
            }
        });
        let edge = scripted("edge", |p, _| respond(p));
        let runner = runner(large, edge);
        let suite = TestSuite::from_yaml(SUITE).unwrap();
        let mut sink = MemorySink::new();

        runner.run_suite(&suite, &mut sink).await.unwrap();

        let record = &sink.records[0];
        let guided = record.outcome(RunKind::GuidedLarge).unwrap();
        assert!(guided.validation.as_ref().unwrap().is_valid);
        let constraints = guided.constraints.as_ref().unwrap();
        assert!(!constraints.passed);
        assert!(constraints.violations[0].contains("below minimum 200"));
        assert_eq!(guided.final_decision, Some(FinalDecision::Rejected));

        // Baseline runs check the case's own constraints only.
        let baseline = record.outcome(RunKind::BaselineLarge).unwrap();
        assert!(baseline.constraints.as_ref().unwrap().passed);
    }

    #[tokio::test]
    async fn test_context_failure_fails_every_combination() {
        let large = scripted("large", |p, _| {
            if p.starts_with("CONTEXT") {
                Ok("I would rather not.".to_string())
            } else {
                respond(p)
            }
        });
        let edge = scripted("edge", |p, _| respond(p));
        let runner = runner(large.clone(), edge.clone());
        let mut suite = TestSuite::from_yaml(SUITE).unwrap();
        suite.hardware_profiles = vec!["cpu".to_string(), "gpu".to_string()];
        let mut sink = MemorySink::new();

        let summary = runner.run_suite(&suite, &mut sink).await.unwrap();

        assert_eq!(sink.records.len(), 2);
        for record in &sink.records {
            assert_eq!(record.status, RecordStatus::Failed);
            assert_eq!(record.phase, RunPhase::Init);
            assert!(record.runs.is_empty());
            assert!(record.error.as_deref().unwrap().contains("context"));
        }
        assert_eq!(sink.records[1].run_id, "science_suite_tides_phi-3-mini_gpu_2");
        assert_eq!(large.call_count(), 1);
        assert_eq!(edge.call_count(), 0);
        assert_eq!(summary.failed_records, 2);
        assert_eq!(summary.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_near_json_context_with_unusable_constraints_still_runs() {
        let large = scripted("large", |p, _| {
            if p.starts_with("CONTEXT") {
                Ok("{'topic': 'Tides', 'constraints': ['Keep it short'],}".to_string())
            } else {
                respond(p)
            }
        });
        let edge = scripted("edge", |p, _| respond(p));
        let runner = runner(large, edge.clone());
        let suite = TestSuite::from_yaml(SUITE).unwrap();
        let mut sink = MemorySink::new();

        let summary = runner.run_suite(&suite, &mut sink).await.unwrap();

        assert_eq!(sink.records[0].status, RecordStatus::Completed);
        assert_eq!(summary.completed_runs, 4);
        let context = suite.test_cases[0].shared_context().unwrap();
        assert_eq!(context.topic, "Tides");
        assert!(context.constraints.is_none());
        assert!(edge
            .calls()
            .iter()
            .any(|p| p == "GUIDED QUESTION about Tides in 500 words"));
    }

    #[tokio::test]
    async fn test_edge_init_failure_marks_record_failed() {
        let large = scripted("large", |p, _| respond(p));
        let edge = scripted("edge", |p, _| respond(p));
        let runner = runner(large, edge);
        let mut suite = TestSuite::from_yaml(SUITE).unwrap();
        suite.models.edge.push("ghost-model".to_string());
        let mut sink = MemorySink::new();

        let summary = runner.run_suite(&suite, &mut sink).await.unwrap();

        assert_eq!(sink.records[0].status, RecordStatus::Completed);
        let ghost = &sink.records[1];
        assert_eq!(ghost.edge_model, "ghost-model");
        assert_eq!(ghost.status, RecordStatus::Failed);
        assert!(ghost.error.as_deref().unwrap().contains("ghost-model"));
        assert_eq!(summary.completed_records, 1);
        assert_eq!(summary.failed_records, 1);
    }

    #[tokio::test]
    async fn test_invalid_suite_is_fatal() {
        let large = scripted("large", |p, _| respond(p));
        let edge = scripted("edge", |p, _| respond(p));
        let runner = runner(large.clone(), edge);
        let mut suite = TestSuite::from_yaml(SUITE).unwrap();
        suite.run_parameters.guided_edge.validation_sequence = "missing".to_string();
        let mut sink = MemorySink::new();

        let result = runner.run_suite(&suite, &mut sink).await;

        assert!(matches!(result, Err(RunnerError::Config(_))));
        assert!(sink.records.is_empty());
        assert_eq!(large.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_large_model_is_fatal() {
        let runner = RunnerBuilder::new().templates(templates()).build().unwrap();
        let suite = TestSuite::from_yaml(SUITE).unwrap();
        let result = runner.run_suite(&suite, &mut MemorySink::new()).await;
        assert!(matches!(result, Err(RunnerError::LargeModel(_))));
    }

    #[tokio::test]
    async fn test_mock_config_runs_offline() {
        let mut store = TemplateStore::new();
        store.extend([
            ("request_context", "Topic: Tides\nDescribe a request."),
            ("baseline_question", "Ask about [topic]."),
            ("guided_question", "Ask about [topic] in at most [max_words] words."),
            ("simulated_answer", "Topic: [topic]\nAnswer: [question]"),
            ("baseline_evaluation", "Topic: [topic]\nGrade: [answer]"),
            ("review_escalation", "Review: [validation_summary]"),
            ("stage_check", "Topic: [topic]\nCheck [stage_id]: [answer]"),
        ]);
        let runner = RunnerBuilder::new()
            .config(RuntimeConfig::mock())
            .templates(Arc::new(store))
            .build()
            .unwrap();
        let suite = TestSuite::from_yaml(SUITE).unwrap();
        let mut sink = MemorySink::new();

        let summary = runner.run_suite(&suite, &mut sink).await.unwrap();

        assert_eq!(summary.failed_runs, 0, "errors: {:?}", summary.errors);
        assert_eq!(summary.completed_runs, 4);
        assert_eq!(runner.models().len(), 2);
    }

    #[test]
    fn test_builder_requires_templates() {
        assert!(matches!(
            RunnerBuilder::new().build(),
            Err(RunnerError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_run_id_sanitized() {
        assert_eq!(
            run_id("s 1", "case/1", "org/model:7b", "gpu 8gb", 3),
            "s_1_case_1_org_model_7b_gpu_8gb_3"
        );
    }

    #[test]
    fn test_parse_scored_judgment_aliases() {
        let scored =
            parse_scored_judgment(r#"{"valid": false, "grade": 45, "comments": "weak"}"#).unwrap();
        assert!(!scored.judgment.passed);
        assert_eq!(scored.raw_score, 45.0);
        assert!((scored.judgment.score - 0.45).abs() < 1e-9);
        assert_eq!(scored.judgment.feedback, "weak");

        let explicit =
            parse_scored_judgment(r#"{"passed": true, "score": 0.6, "feedback": "ok", "rating": 9}"#)
                .unwrap();
        assert_eq!(explicit.judgment.score, 0.6);

        assert!(matches!(
            parse_scored_judgment(r#"{"passed": true, "feedback": "no score"}"#),
            Err(ExtractionError::MissingKeys(_))
        ));
    }

    #[test]
    fn test_review_summary_lists_failures() {
        let validation = ValidationResult {
            is_valid: false,
            final_score: 0.0,
            stage_results: vec![crate::validation::StageResult {
                stage_id: "relevance".to_string(),
                passed: false,
                score: 0.1,
                feedback: "off topic".to_string(),
                scoring_impact: 1.0,
                metrics: Default::default(),
            }],
            aggregate_feedback: "[relevance] off topic\n".to_string(),
            metrics: None,
            stages_executed: 1,
            aborted_at: Some("relevance".to_string()),
        };
        let constraints = ConstraintResult {
            passed: false,
            violations: vec!["Word count 10 below minimum 50".to_string()],
            word_count: 10,
        };
        let summary = review_summary(&validation, &constraints);
        assert!(summary.starts_with("Validation: FAILED"));
        assert!(summary.contains("- [relevance] FAIL (0.10): off topic"));
        assert!(summary.contains("Stopped after stage 'relevance'"));
        assert!(summary.contains("- Word count 10 below minimum 50"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn run_ids_only_contain_safe_characters(
                suite in ".{0,16}",
                case in ".{0,16}",
                edge in ".{0,16}",
                counter in 1usize..10_000,
            ) {
                let id = run_id(&suite, &case, &edge, "sim", counter);
                prop_assert!(id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
                let suffix = format!("_{}", counter);
                prop_assert!(id.ends_with(&suffix));
            }

            #[test]
            fn scored_judgments_land_in_unit_range(score in -1000.0f64..1000.0) {
                let text = format!(
                    r#"{{"passed": true, "score": {}, "feedback": "ok"}}"#,
                    score
                );
                let scored = parse_scored_judgment(&text).unwrap();
                prop_assert!((0.0..=1.0).contains(&scored.judgment.score));
                prop_assert!((scored.raw_score - score).abs() < 1e-9);
            }
        }
    }
}
