//! Suite-level summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::{RecordStatus, RunKind, RunRecord};

/// Aggregates for one run kind across all records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunKindStats {
    pub completed: usize,
    pub failed: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_output_tokens: Option<f64>,

    /// Baseline evaluation score or validation final score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_score: Option<f64>,
}

/// A run or record error kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub run_id: String,

    /// Absent for record-level failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_kind: Option<RunKind>,

    pub message: String,
}

/// Counts and averages over a whole suite execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub suite_id: String,
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub completed_records: usize,
    pub partial_records: usize,
    pub failed_records: usize,
    pub total_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub by_run_kind: BTreeMap<RunKind, RunKindStats>,
    pub errors: Vec<RunError>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(Default)]
struct Samples {
    latency: Vec<f64>,
    output_tokens: Vec<f64>,
    score: Vec<f64>,
}

impl SuiteSummary {
    /// Summarize `records`.
    ///
    /// Averages only cover completed runs that reported the value.
    pub fn from_records(suite_id: impl Into<String>, records: &[RunRecord]) -> Self {
        let mut summary = Self {
            suite_id: suite_id.into(),
            generated_at: Utc::now(),
            total_records: records.len(),
            completed_records: 0,
            partial_records: 0,
            failed_records: 0,
            total_runs: 0,
            completed_runs: 0,
            failed_runs: 0,
            by_run_kind: BTreeMap::new(),
            errors: Vec::new(),
        };
        let mut samples: BTreeMap<RunKind, Samples> = BTreeMap::new();

        for record in records {
            match record.status {
                RecordStatus::Completed => summary.completed_records += 1,
                RecordStatus::PartialFailure => summary.partial_records += 1,
                RecordStatus::Failed => summary.failed_records += 1,
            }
            if let Some(error) = &record.error {
                summary.errors.push(RunError {
                    run_id: record.run_id.clone(),
                    run_kind: None,
                    message: error.clone(),
                });
            }

            for run in &record.runs {
                summary.total_runs += 1;
                let stats = summary.by_run_kind.entry(run.kind).or_default();
                if !run.is_completed() {
                    summary.failed_runs += 1;
                    stats.failed += 1;
                    summary.errors.push(RunError {
                        run_id: record.run_id.clone(),
                        run_kind: Some(run.kind),
                        message: run.error.clone().unwrap_or_default(),
                    });
                    continue;
                }

                summary.completed_runs += 1;
                stats.completed += 1;
                let entry = samples.entry(run.kind).or_default();
                if let Some(metrics) = &run.total_metrics {
                    if let Some(latency) = metrics.latency_ms {
                        entry.latency.push(latency as f64);
                    }
                    if let Some(tokens) = metrics.output_tokens {
                        entry.output_tokens.push(tokens as f64);
                    }
                }
                if let Some(score) = run.score() {
                    entry.score.push(score);
                }
            }
        }

        for (kind, entry) in samples {
            let stats = summary.by_run_kind.entry(kind).or_default();
            stats.avg_latency_ms = mean(&entry.latency);
            stats.avg_output_tokens = mean(&entry.output_tokens);
            stats.avg_score = mean(&entry.score);
        }

        summary
    }

    /// True if every record completed all of its runs.
    pub fn all_completed(&self) -> bool {
        self.completed_records == self.total_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::record::{RunOutcome, ScoredJudgment};
    use tandem_core::{Metrics, StructuredJudgment};

    fn baseline(kind: RunKind, latency: u64, score: f64) -> RunOutcome {
        let mut outcome = RunOutcome::new(kind, "m");
        outcome
            .step_metrics
            .insert("answer".to_string(), Metrics::from_parts(latency, 10, 20));
        outcome.baseline_evaluation = Some(ScoredJudgment {
            judgment: StructuredJudgment {
                passed: true,
                score,
                feedback: String::new(),
            },
            raw_score: score,
        });
        outcome.seal();
        outcome
    }

    #[test]
    fn test_summary_counts_and_averages() {
        let mut first = RunRecord::new("r1", "s", "c", "L", "E", "p");
        first.push(baseline(RunKind::BaselineLarge, 100, 0.6));
        let mut failed = RunOutcome::new(RunKind::GuidedLarge, "L");
        failed.fail("template missing");
        first.push(failed);
        first.finish();

        let mut second = RunRecord::new("r2", "s", "c", "L", "E2", "p");
        second.push(baseline(RunKind::BaselineLarge, 300, 1.0));
        second.finish();

        let mut third = RunRecord::new("r3", "s", "c", "L", "E3", "p");
        third.fail("edge model unavailable");

        let summary = SuiteSummary::from_records("s", &[first, second, third]);

        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.completed_records, 1);
        assert_eq!(summary.partial_records, 1);
        assert_eq!(summary.failed_records, 1);
        assert_eq!(summary.total_runs, 3);
        assert_eq!(summary.failed_runs, 1);

        let stats = &summary.by_run_kind[&RunKind::BaselineLarge];
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.avg_latency_ms, Some(200.0));
        assert!((stats.avg_score.unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(summary.by_run_kind[&RunKind::GuidedLarge].failed, 1);

        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.errors[0].run_kind, Some(RunKind::GuidedLarge));
        assert_eq!(summary.errors[1].run_id, "r3");
        assert!(!summary.all_completed());
    }

    #[test]
    fn test_empty_summary() {
        let summary = SuiteSummary::from_records("s", &[]);
        assert!(summary.all_completed());
        assert!(summary.by_run_kind.is_empty());
    }
}
