//! Structured judgment extraction.
//!
//! Model output is free text. This module turns it into a
//! [`StructuredJudgment`] or fails loudly with an [`ExtractionError`].
//!
//! ## Pipeline
//!
//! 1. Recover an object with the fallback chain in [`strategies`], which
//!    retries near-JSON (single quotes, bare keys, Python literals,
//!    trailing commas) before falling back to bullet lines
//! 2. Alias `valid` to `passed` when `passed` is absent
//! 3. Require `passed`, `score` and `feedback`
//! 4. Type-check: `passed` bool, `score` number, `feedback` string
//! 5. Coerce `score` to `f64`
//!
//! Range normalization is not done here. Callers that receive 0–10 or
//! 0–100 scores apply [`normalize_unit_score`] themselves.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tandem_core::judgment::extract_judgment;
//!
//! let judgment = extract_judgment("- passed: true\n- score: 0.8\n- feedback: fine")?;
//! assert!(judgment.passed);
//! ```

mod scan;
pub mod strategies;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use strategies::{ExtractionMethod, JsonMap, STRATEGIES};

/// Keys every judgment must carry after aliasing.
pub const REQUIRED_KEYS: [&str; 3] = ["passed", "score", "feedback"];

const PREVIEW_CHARS: usize = 100;

/// Errors from judgment extraction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Model output is empty")]
    Empty,

    #[error("Could not extract a structured object from output: {preview}")]
    Unparseable { preview: String },

    #[error("Judgment is missing required keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("Judgment has mistyped fields: {}", .0.join("; "))]
    TypeMismatch(Vec<String>),
}

/// The canonical verdict extracted from a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredJudgment {
    /// Whether the evaluated content passed
    pub passed: bool,

    /// Score, expected in [0, 1]
    pub score: f64,

    /// Free-text feedback from the evaluator
    pub feedback: String,
}

impl StructuredJudgment {
    /// Build a judgment from an already-recovered object.
    ///
    /// Applies the `valid -> passed` alias, then checks required keys and
    /// types. All missing keys (or all mistyped fields) are reported at once.
    pub fn from_object(mut object: JsonMap) -> Result<Self, ExtractionError> {
        if !object.contains_key("passed") {
            if let Some(valid) = object.get("valid").cloned() {
                object.insert("passed".to_string(), valid);
            }
        }

        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| !object.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ExtractionError::MissingKeys(missing));
        }

        let passed = object["passed"].as_bool();
        let score = object["score"].as_f64();
        let feedback = object["feedback"].as_str();

        let mut mismatches = Vec::new();
        if passed.is_none() {
            mismatches.push(type_mismatch("passed", "boolean", &object["passed"]));
        }
        if score.is_none() {
            mismatches.push(type_mismatch("score", "number", &object["score"]));
        }
        if feedback.is_none() {
            mismatches.push(type_mismatch("feedback", "string", &object["feedback"]));
        }

        match (passed, score, feedback) {
            (Some(passed), Some(score), Some(feedback)) => Ok(Self {
                passed,
                score,
                feedback: feedback.to_string(),
            }),
            _ => Err(ExtractionError::TypeMismatch(mismatches)),
        }
    }
}

/// Recover an object from model text with the ordered fallback chain.
///
/// Returns the object together with the strategy that produced it.
pub fn extract_object(text: &str) -> Result<(JsonMap, ExtractionMethod), ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }

    for (method, strategy) in STRATEGIES {
        if let Some(object) = strategy(text) {
            tracing::debug!(method = ?method, keys = object.len(), "Extracted object");
            return Ok((object, *method));
        }
    }

    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    tracing::warn!(preview = %preview, "No extraction strategy produced an object");
    Err(ExtractionError::Unparseable { preview })
}

/// Extract a validated judgment from model text.
pub fn extract_judgment(text: &str) -> Result<StructuredJudgment, ExtractionError> {
    let (object, _) = extract_object(text)?;
    StructuredJudgment::from_object(object)
}

/// Rescale a score into [0, 1].
///
/// Values already in [0, 1] are kept. Values up to 10 are treated as a
/// 0–10 scale and values up to 100 as a 0–100 scale. Anything else is
/// clamped.
pub fn normalize_unit_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    let scaled = if score <= 1.0 {
        score
    } else if score <= 10.0 {
        score / 10.0
    } else if score <= 100.0 {
        score / 100.0
    } else {
        1.0
    };
    scaled.clamp(0.0, 1.0)
}

fn type_mismatch(key: &str, expected: &str, found: &Value) -> String {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("'{}' must be a {}, found {}", key, expected, found)
}
