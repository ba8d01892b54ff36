//! Run outcomes and per-combination records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tandem_core::{ConstraintResult, Metrics, StructuredJudgment};

use crate::validation::ValidationResult;

/// Which model the run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Large,
    Edge,
}

/// The four runs of the comparison protocol, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    BaselineLarge,
    GuidedLarge,
    BaselineEdge,
    GuidedEdge,
}

impl RunKind {
    /// Protocol order.
    pub const ALL: [RunKind; 4] = [
        RunKind::BaselineLarge,
        RunKind::GuidedLarge,
        RunKind::BaselineEdge,
        RunKind::GuidedEdge,
    ];

    /// True for runs that use the shared context and validation.
    pub fn is_guided(self) -> bool {
        matches!(self, RunKind::GuidedLarge | RunKind::GuidedEdge)
    }

    /// Model role.
    pub fn role(self) -> ModelRole {
        match self {
            RunKind::BaselineLarge | RunKind::GuidedLarge => ModelRole::Large,
            RunKind::BaselineEdge | RunKind::GuidedEdge => ModelRole::Edge,
        }
    }

    /// Short label, `run_1` through `run_4`.
    pub fn label(self) -> &'static str {
        match self {
            RunKind::BaselineLarge => "run_1",
            RunKind::GuidedLarge => "run_2",
            RunKind::BaselineEdge => "run_3",
            RunKind::GuidedEdge => "run_4",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunKind::BaselineLarge => "baseline_large",
            RunKind::GuidedLarge => "guided_large",
            RunKind::BaselineEdge => "baseline_edge",
            RunKind::GuidedEdge => "guided_edge",
        };
        f.write_str(name)
    }
}

/// Protocol state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    BaselineLarge,
    GuidedLarge,
    BaselineEdge,
    GuidedEdge,
    Complete,
}

impl RunPhase {
    /// The following state, or `None` at `Complete`.
    pub fn next(self) -> Option<RunPhase> {
        match self {
            RunPhase::Init => Some(RunPhase::BaselineLarge),
            RunPhase::BaselineLarge => Some(RunPhase::GuidedLarge),
            RunPhase::GuidedLarge => Some(RunPhase::BaselineEdge),
            RunPhase::BaselineEdge => Some(RunPhase::GuidedEdge),
            RunPhase::GuidedEdge => Some(RunPhase::Complete),
            RunPhase::Complete => None,
        }
    }
}

impl From<RunKind> for RunPhase {
    fn from(kind: RunKind) -> Self {
        match kind {
            RunKind::BaselineLarge => RunPhase::BaselineLarge,
            RunKind::GuidedLarge => RunPhase::GuidedLarge,
            RunKind::BaselineEdge => RunPhase::BaselineEdge,
            RunKind::GuidedEdge => RunPhase::GuidedEdge,
        }
    }
}

/// Terminal status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Terminal status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// All four runs completed
    Completed,
    /// At least one run failed
    PartialFailure,
    /// No run executed
    Failed,
}

/// What the run concluded about its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    /// Every check passed
    Accepted,
    /// A check failed and was not overturned
    Rejected,
    /// A check failed and the reviewer accepted the answer
    Escalated,
}

/// A judgment whose score was rescaled to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredJudgment {
    #[serde(flatten)]
    pub judgment: StructuredJudgment,

    /// Score as the model wrote it
    pub raw_score: f64,
}

/// Result of one of the four runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub kind: RunKind,
    pub model: String,
    pub status: RunStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    /// Baseline runs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_evaluation: Option<ScoredJudgment>,

    /// Guided runs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<ConstraintResult>,

    /// Guided runs whose checks failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ScoredJudgment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_decision: Option<FinalDecision>,

    /// Step name -> metrics, for steps that called a model
    #[serde(default)]
    pub step_metrics: BTreeMap<String, Metrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_metrics: Option<Metrics>,
}

impl RunOutcome {
    /// A run that has not finished yet.
    pub fn new(kind: RunKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            status: RunStatus::Completed,
            error: None,
            question: None,
            answer: None,
            baseline_evaluation: None,
            validation: None,
            constraints: None,
            review: None,
            final_decision: None,
            step_metrics: BTreeMap::new(),
            total_metrics: None,
        }
    }

    /// Mark the run failed. Partial results are kept.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.final_decision = None;
    }

    /// Compute total metrics from the step metrics.
    pub fn seal(&mut self) {
        self.total_metrics = Metrics::merge(self.step_metrics.values());
    }

    /// True if the run completed.
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Evaluation score of the run: the baseline evaluation for baseline
    /// runs, the validation final score for guided runs.
    pub fn score(&self) -> Option<f64> {
        if self.kind.is_guided() {
            self.validation.as_ref().map(|v| v.final_score)
        } else {
            self.baseline_evaluation.as_ref().map(|e| e.judgment.score)
        }
    }
}

/// One test case x hardware profile x edge model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub suite_id: String,
    pub test_case_id: String,
    pub large_model: String,
    pub edge_model: String,
    pub hardware_profile: String,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Last state reached
    pub phase: RunPhase,

    pub status: RecordStatus,

    /// Record-level failure, set when no run could execute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub runs: Vec<RunOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl RunRecord {
    /// Start a record in `Init`.
    pub fn new(
        run_id: impl Into<String>,
        suite_id: impl Into<String>,
        test_case_id: impl Into<String>,
        large_model: impl Into<String>,
        edge_model: impl Into<String>,
        hardware_profile: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            suite_id: suite_id.into(),
            test_case_id: test_case_id.into(),
            large_model: large_model.into(),
            edge_model: edge_model.into(),
            hardware_profile: hardware_profile.into(),
            started_at: Utc::now(),
            finished_at: None,
            phase: RunPhase::Init,
            status: RecordStatus::Completed,
            error: None,
            runs: Vec::with_capacity(RunKind::ALL.len()),
            metrics: None,
        }
    }

    /// Append a finished run and advance the phase to it.
    pub fn push(&mut self, outcome: RunOutcome) {
        self.phase = RunPhase::from(outcome.kind);
        self.runs.push(outcome);
    }

    /// Fail the whole record; it stays in its current phase.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RecordStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Close the record after its runs.
    pub fn finish(&mut self) {
        self.metrics = Metrics::merge(self.runs.iter().filter_map(|r| r.total_metrics.as_ref()));
        self.status = if self.runs.iter().all(RunOutcome::is_completed) {
            RecordStatus::Completed
        } else {
            RecordStatus::PartialFailure
        };
        if self.phase.next() == Some(RunPhase::Complete) {
            self.phase = RunPhase::Complete;
        }
        self.finished_at = Some(Utc::now());
    }

    /// Outcome for `kind`, if it ran.
    pub fn outcome(&self, kind: RunKind) -> Option<&RunOutcome> {
        self.runs.iter().find(|r| r.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RunRecord {
        RunRecord::new("r1", "suite", "case", "large", "edge", "sim_unconstrained")
    }

    fn outcome(kind: RunKind, latency: u64) -> RunOutcome {
        let mut outcome = RunOutcome::new(kind, "m");
        outcome
            .step_metrics
            .insert("question".to_string(), Metrics::from_parts(latency, 10, 5));
        outcome
            .step_metrics
            .insert("answer".to_string(), Metrics::from_parts(latency, 10, 5));
        outcome.seal();
        outcome
    }

    #[test]
    fn test_phase_walks_protocol() {
        let mut phase = RunPhase::Init;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&RunPhase::Complete));
    }

    #[test]
    fn test_record_completes_after_four_runs() {
        let mut record = record();
        for kind in RunKind::ALL {
            record.push(outcome(kind, 100));
        }
        record.finish();

        assert_eq!(record.phase, RunPhase::Complete);
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.metrics.as_ref().unwrap().latency_ms, Some(800));
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_failed_run_is_partial_failure() {
        let mut record = record();
        for kind in RunKind::ALL {
            let mut o = outcome(kind, 10);
            if kind == RunKind::GuidedEdge {
                o.fail("model down");
            }
            record.push(o);
        }
        record.finish();

        assert_eq!(record.status, RecordStatus::PartialFailure);
        let failed = record.outcome(RunKind::GuidedEdge).unwrap();
        assert_eq!(failed.error.as_deref(), Some("model down"));
        assert!(record.outcome(RunKind::BaselineEdge).unwrap().is_completed());
    }

    #[test]
    fn test_record_level_failure_stays_in_init() {
        let mut record = record();
        record.fail("edge model unavailable");
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.phase, RunPhase::Init);
        assert!(record.runs.is_empty());
    }

    #[test]
    fn test_outcome_serialization_skips_absent_fields() {
        let value = serde_json::to_value(RunOutcome::new(RunKind::BaselineEdge, "phi")).unwrap();
        assert_eq!(value["kind"], "baseline_edge");
        assert_eq!(value["status"], "completed");
        assert!(value.get("validation").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_scored_judgment_flattens() {
        let scored = ScoredJudgment {
            judgment: StructuredJudgment {
                passed: true,
                score: 0.8,
                feedback: "ok".to_string(),
            },
            raw_score: 8.0,
        };
        let value = serde_json::to_value(&scored).unwrap();
        assert_eq!(value["score"], 0.8);
        assert_eq!(value["raw_score"], 8.0);
    }
}
