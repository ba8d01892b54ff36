//! The per-test-case shared request context.
//!
//! The context is generated once per test case by the large model and then
//! reused by every run of that case, so all four runs talk about the same
//! topic under the same constraints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::constraints::{ContentFormat, ConstraintSpec};
use crate::judgment::JsonMap;
use crate::template::Variables;

/// Errors building or injecting a shared context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("Shared context is missing a string 'topic'")]
    MissingTopic,

    #[error("Shared context for test case '{0}' was already injected")]
    AlreadyInjected(String),
}

/// Context shared by every run of one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedRequestContext {
    /// Topic all runs must address
    pub topic: String,

    /// Constraints requested by the context, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<ConstraintSpec>,

    /// Every other field the context generator produced
    #[serde(default)]
    pub fields: JsonMap,
}

/// Read a model-produced constraints object.
///
/// Unknown keys are ignored. Known keys with an unusable value are dropped
/// and named in the returned list; the rest are kept.
fn tolerant_constraints(object: &JsonMap) -> (ConstraintSpec, Vec<String>) {
    let mut spec = ConstraintSpec::default();
    let mut dropped = Vec::new();

    for (key, value) in object {
        if value.is_null() {
            continue;
        }
        let accepted = match key.as_str() {
            "min_words" | "minWords" => fill(&mut spec.min_words, word_count(value)),
            "max_words" | "maxWords" => fill(&mut spec.max_words, word_count(value)),
            "prohibited_keywords" | "prohibitedKeywords" => match keywords(value) {
                Some(list) => {
                    spec.prohibited_keywords = list;
                    true
                }
                None => false,
            },
            "required_topic" | "requiredTopic" => {
                fill(&mut spec.required_topic, value.as_str().map(str::to_string))
            }
            "format" => fill(
                &mut spec.format,
                serde_json::from_value::<ContentFormat>(value.clone()).ok(),
            ),
            _ => true,
        };
        if !accepted {
            dropped.push(key.clone());
        }
    }

    (spec, dropped)
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(value) => {
            *slot = Some(value);
            true
        }
        None => false,
    }
}

/// A non-negative whole number, also accepted as `50.0` or `"50"`.
fn word_count(value: &Value) -> Option<usize> {
    let count = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u32::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    count.and_then(|n| usize::try_from(n).ok())
}

/// A keyword list; a lone string counts as one keyword. Non-string entries
/// are skipped.
fn keywords(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(keyword) => Some(vec![keyword.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

impl SharedRequestContext {
    /// Create a context with only a topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            constraints: None,
            fields: JsonMap::new(),
        }
    }

    /// Build a context from an extracted object.
    ///
    /// `topic` must be a non-empty string; nothing else can fail. An
    /// optional `constraints` object is read tolerantly: unusable keys are
    /// dropped with a warning, and a `constraints` value that is not an
    /// object is ignored.
    pub fn from_object(mut object: JsonMap) -> Result<Self, ContextError> {
        let topic = match object.remove("topic") {
            Some(Value::String(topic)) if !topic.trim().is_empty() => topic,
            _ => return Err(ContextError::MissingTopic),
        };

        let constraints = match object.remove("constraints") {
            None | Some(Value::Null) => None,
            Some(Value::Object(raw)) => {
                let (spec, dropped) = tolerant_constraints(&raw);
                if !dropped.is_empty() {
                    tracing::warn!(
                        topic = %topic,
                        dropped = ?dropped,
                        "Ignoring unusable context constraints"
                    );
                }
                (spec != ConstraintSpec::default()).then_some(spec)
            }
            Some(other) => {
                tracing::warn!(
                    topic = %topic,
                    constraints = %other,
                    "Context constraints are not an object; ignoring them"
                );
                None
            }
        };

        Ok(Self {
            topic,
            constraints,
            fields: object,
        })
    }

    /// Template variables contributed by the context.
    ///
    /// Includes every extra field plus `topic`; `constraints` is included as
    /// a JSON object when present.
    pub fn variables(&self) -> Variables {
        let mut vars: Variables = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.insert("topic".to_string(), Value::String(self.topic.clone()));
        if let Some(constraints) = &self.constraints {
            if let Ok(value) = serde_json::to_value(constraints) {
                vars.insert("constraints".to_string(), value);
            }
        }
        vars
    }

    /// Effective constraints: the context's overlaid on `hints`.
    pub fn effective_constraints(&self, hints: &ConstraintSpec) -> ConstraintSpec {
        match &self.constraints {
            Some(own) => own.merge_over(hints),
            None => hints.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_object() {
        let ctx = SharedRequestContext::from_object(object(json!({
            "topic": "Tides",
            "audience": "grade 6",
            "constraints": { "maxWords": 120, "tone": "friendly" }
        })))
        .unwrap();
        assert_eq!(ctx.topic, "Tides");
        assert_eq!(ctx.constraints.as_ref().unwrap().max_words, Some(120));
        assert_eq!(ctx.fields["audience"], json!("grade 6"));
        assert!(!ctx.fields.contains_key("topic"));
    }

    #[test]
    fn test_missing_topic() {
        let result = SharedRequestContext::from_object(object(json!({ "audience": "x" })));
        assert_eq!(result, Err(ContextError::MissingTopic));

        let result = SharedRequestContext::from_object(object(json!({ "topic": 3 })));
        assert_eq!(result, Err(ContextError::MissingTopic));
    }

    #[test]
    fn test_mistyped_constraint_key_is_dropped() {
        let ctx = SharedRequestContext::from_object(object(json!({
            "topic": "x",
            "constraints": { "min_words": "many", "max_words": 80 }
        })))
        .unwrap();
        let constraints = ctx.constraints.unwrap();
        assert_eq!(constraints.min_words, None);
        assert_eq!(constraints.max_words, Some(80));
    }

    #[test]
    fn test_constraints_list_is_ignored() {
        let ctx = SharedRequestContext::from_object(object(json!({
            "topic": "x",
            "constraints": ["Keep it short"]
        })))
        .unwrap();
        assert_eq!(ctx.topic, "x");
        assert!(ctx.constraints.is_none());
    }

    #[test]
    fn test_whole_float_word_counts() {
        let ctx = SharedRequestContext::from_object(object(json!({
            "topic": "x",
            "constraints": { "min_words": 50.0, "maxWords": "200", "max_words": 12.5 }
        })))
        .unwrap();
        let constraints = ctx.constraints.unwrap();
        assert_eq!(constraints.min_words, Some(50));
        // 12.5 is dropped; the camelCase alias still applies
        assert_eq!(constraints.max_words, Some(200));
    }

    #[test]
    fn test_single_prohibited_keyword_string() {
        let ctx = SharedRequestContext::from_object(object(json!({
            "topic": "x",
            "constraints": { "prohibited_keywords": "foo", "format": "yaml" }
        })))
        .unwrap();
        let constraints = ctx.constraints.unwrap();
        assert_eq!(constraints.prohibited_keywords, vec!["foo".to_string()]);
        assert_eq!(constraints.format, None);
    }

    #[test]
    fn test_constraints_with_only_unknown_keys() {
        let ctx = SharedRequestContext::from_object(object(json!({
            "topic": "x",
            "constraints": { "tone": "friendly" }
        })))
        .unwrap();
        assert!(ctx.constraints.is_none());
    }

    #[test]
    fn test_variables_include_topic_and_fields() {
        let mut ctx = SharedRequestContext::new("Volcanoes");
        ctx.fields.insert("persona".to_string(), json!("curious student"));
        let vars = ctx.variables();
        assert_eq!(vars["topic"], json!("Volcanoes"));
        assert_eq!(vars["persona"], json!("curious student"));
        assert!(!vars.contains_key("constraints"));
    }

    #[test]
    fn test_effective_constraints() {
        let hints = ConstraintSpec {
            min_words: Some(10),
            ..Default::default()
        };
        let ctx = SharedRequestContext::new("x");
        assert_eq!(ctx.effective_constraints(&hints), hints);

        let ctx = SharedRequestContext {
            constraints: Some(ConstraintSpec {
                min_words: Some(30),
                ..Default::default()
            }),
            ..SharedRequestContext::new("x")
        };
        assert_eq!(ctx.effective_constraints(&hints).min_words, Some(30));
    }
}
