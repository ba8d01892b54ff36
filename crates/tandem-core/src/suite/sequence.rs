//! Validation stages and sequences.

use serde::{Deserialize, Serialize};

use crate::template::Variables;

fn default_abort_on_failure() -> bool {
    true
}

/// One configured unit of validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationStage {
    /// Unique identifier within its sequence
    pub id: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Template used to build the stage prompt
    #[serde(default, alias = "template_id", alias = "templateId")]
    pub template: String,

    /// Higher runs first; ties keep declaration order. Fractions are allowed.
    #[serde(default)]
    pub priority: f64,

    /// Weight applied to the stage score when it passes
    #[serde(default, alias = "scoringImpact")]
    pub scoring_impact: f64,

    /// Stop the sequence when this stage fails
    #[serde(default = "default_abort_on_failure", alias = "abortOnFailure")]
    pub abort_on_failure: bool,

    /// Extra variables for the stage template
    #[serde(default, skip_serializing_if = "Variables::is_empty")]
    pub variables: Variables,
}

impl ValidationStage {
    /// Create a stage with default priority, zero weight and abort on failure.
    pub fn new(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            template: template.into(),
            priority: 0.0,
            scoring_impact: 0.0,
            abort_on_failure: true,
            variables: Variables::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: impl Into<f64>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Set the scoring weight.
    pub fn with_scoring_impact(mut self, scoring_impact: f64) -> Self {
        self.scoring_impact = scoring_impact;
        self
    }

    /// Set whether failure aborts the sequence.
    pub fn with_abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_on_failure = abort;
        self
    }
}

/// An ordered set of stages applied to one question/answer pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationSequence {
    /// Identifier referenced from run parameters
    pub id: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Stages in declaration order
    #[serde(default)]
    pub stages: Vec<ValidationStage>,
}

impl ValidationSequence {
    /// Create a sequence from stages.
    pub fn new(id: impl Into<String>, stages: Vec<ValidationStage>) -> Self {
        Self {
            id: id.into(),
            description: None,
            stages,
        }
    }

    /// Stages in execution order: priority descending, stable on ties.
    pub fn execution_order(&self) -> Vec<&ValidationStage> {
        let mut ordered: Vec<&ValidationStage> = self.stages.iter().collect();
        ordered.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        ordered
    }

    /// True if the sequence has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
