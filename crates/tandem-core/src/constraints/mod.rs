//! Deterministic content constraints.
//!
//! **Question**: Does the generated text respect the hard acceptance rules?
//!
//! Rules are independent. Every applicable rule is checked on every call and
//! each failure adds one human-readable violation, so a caller always sees
//! the complete picture.

pub mod patterns;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use patterns::{contains_keyword, count_words, covers_topic};

/// Gross output shapes that can be required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// A single top-level JSON object
    Json,
    /// A single top-level JSON array
    JsonArray,
}

impl ContentFormat {
    fn delimiters(self) -> (char, char) {
        match self {
            ContentFormat::Json => ('{', '}'),
            ContentFormat::JsonArray => ('[', ']'),
        }
    }

    fn violation(self) -> &'static str {
        match self {
            ContentFormat::Json => "Content does not appear to be in required JSON format",
            ContentFormat::JsonArray => {
                "Content does not appear to be in required JSON array format"
            }
        }
    }
}

/// Rules to enforce on one piece of content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintSpec {
    /// Minimum word count
    #[serde(default, alias = "minWords", skip_serializing_if = "Option::is_none")]
    pub min_words: Option<usize>,

    /// Maximum word count
    #[serde(default, alias = "maxWords", skip_serializing_if = "Option::is_none")]
    pub max_words: Option<usize>,

    /// Keywords that must not appear as whole words (case-insensitive)
    #[serde(
        default,
        alias = "prohibitedKeywords",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub prohibited_keywords: Vec<String>,

    /// Topic the content must address
    #[serde(default, alias = "requiredTopic", skip_serializing_if = "Option::is_none")]
    pub required_topic: Option<String>,

    /// Required gross shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ContentFormat>,
}

impl ConstraintSpec {
    /// True when no rule is configured.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay `self` on `base`: fields set here win, unset fields fall
    /// back to `base`. Prohibited keywords are the union of both lists.
    pub fn merge_over(&self, base: &ConstraintSpec) -> ConstraintSpec {
        let mut keywords = base.prohibited_keywords.clone();
        for keyword in &self.prohibited_keywords {
            if !keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
                keywords.push(keyword.clone());
            }
        }

        ConstraintSpec {
            min_words: self.min_words.or(base.min_words),
            max_words: self.max_words.or(base.max_words),
            prohibited_keywords: keywords,
            required_topic: self
                .required_topic
                .clone()
                .or_else(|| base.required_topic.clone()),
            format: self.format.or(base.format),
        }
    }
}

/// Outcome of a constraint check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintResult {
    /// No rule was violated
    pub passed: bool,

    /// One entry per violated rule instance, in rule order
    pub violations: Vec<String>,

    /// Word count of the checked content
    pub word_count: usize,
}

/// Stateless rule checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintEnforcer;

impl ConstraintEnforcer {
    pub fn new() -> Self {
        Self
    }

    /// Check `content` against every rule in `spec`.
    ///
    /// Order of violations: word minimum, word maximum, prohibited keywords
    /// (declaration order, each distinct keyword once), topic, format.
    pub fn enforce(&self, content: &str, spec: &ConstraintSpec) -> ConstraintResult {
        let mut violations = Vec::new();
        let word_count = count_words(content);

        if let Some(min) = spec.min_words {
            if word_count < min {
                violations.push(format!("Word count {} below minimum {}", word_count, min));
            }
        }

        if let Some(max) = spec.max_words {
            if word_count > max {
                violations.push(format!("Word count {} exceeds maximum {}", word_count, max));
            }
        }

        let mut seen = HashSet::new();
        for keyword in &spec.prohibited_keywords {
            if !seen.insert(keyword.to_lowercase()) {
                continue;
            }
            if contains_keyword(content, keyword) {
                violations.push(format!("Prohibited keyword '{}' found", keyword));
            }
        }

        if let Some(topic) = spec.required_topic.as_deref() {
            if !topic.trim().is_empty() && !covers_topic(content, topic) {
                violations.push(format!(
                    "Content does not appear to address required topic '{}'",
                    topic
                ));
            }
        }

        if let Some(format) = spec.format {
            let (open, close) = format.delimiters();
            let trimmed = content.trim();
            if !(trimmed.starts_with(open) && trimmed.ends_with(close)) {
                violations.push(format.violation().to_string());
            }
        }

        if !violations.is_empty() {
            tracing::debug!(violations = violations.len(), word_count, "Constraint violations");
        }

        ConstraintResult {
            passed: violations.is_empty(),
            violations,
            word_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enforce(content: &str, spec: &ConstraintSpec) -> ConstraintResult {
        ConstraintEnforcer::new().enforce(content, spec)
    }

    #[test]
    fn test_empty_spec_passes() {
        let result = enforce("anything at all", &ConstraintSpec::default());
        assert!(result.passed);
        assert!(result.violations.is_empty());
        assert_eq!(result.word_count, 3);
    }

    #[test]
    fn test_collects_every_violation() {
        let spec = ConstraintSpec {
            min_words: Some(50),
            prohibited_keywords: vec!["violence".to_string()],
            ..Default::default()
        };
        let content = "This short answer mentions violence once and then stops here.";
        let result = enforce(content, &spec);
        assert!(!result.passed);
        assert_eq!(
            result.violations,
            vec![
                "Word count 10 below minimum 50".to_string(),
                "Prohibited keyword 'violence' found".to_string(),
            ]
        );
    }

    #[test]
    fn test_min_and_max_both_fire() {
        let spec = ConstraintSpec {
            min_words: Some(5),
            max_words: Some(2),
            ..Default::default()
        };
        let result = enforce("one two three", &spec);
        assert_eq!(result.violations.len(), 2);
        assert_eq!(result.violations[1], "Word count 3 exceeds maximum 2");
    }

    #[test]
    fn test_keyword_reported_once() {
        let spec = ConstraintSpec {
            prohibited_keywords: vec!["Gore".to_string(), "gore".to_string()],
            ..Default::default()
        };
        let result = enforce("gore and more GORE", &spec);
        assert_eq!(result.violations, vec!["Prohibited keyword 'Gore' found"]);
    }

    #[test]
    fn test_required_topic() {
        let spec = ConstraintSpec {
            required_topic: Some("Water Cycle".to_string()),
            ..Default::default()
        };
        assert!(enforce("Evaporation moves water upward.", &spec).passed);

        let result = enforce("Volcanoes erupt.", &spec);
        assert_eq!(
            result.violations,
            vec!["Content does not appear to address required topic 'Water Cycle'"]
        );
    }

    #[test]
    fn test_blank_topic_ignored() {
        let spec = ConstraintSpec {
            required_topic: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(enforce("text", &spec).passed);
    }

    #[test]
    fn test_json_format_shape() {
        let spec = ConstraintSpec {
            format: Some(ContentFormat::Json),
            ..Default::default()
        };
        assert!(enforce("  {\"a\": 1}\n", &spec).passed);
        assert!(enforce("{ not really json }", &spec).passed);
        assert_eq!(
            enforce("Here: {\"a\": 1}", &spec).violations,
            vec!["Content does not appear to be in required JSON format"]
        );
    }

    #[test]
    fn test_json_array_shape() {
        let spec = ConstraintSpec {
            format: Some(ContentFormat::JsonArray),
            ..Default::default()
        };
        assert!(enforce("[1, 2]", &spec).passed);
        assert!(!enforce("{}", &spec).passed);
    }

    #[test]
    fn test_camel_case_aliases() {
        let spec: ConstraintSpec = serde_json::from_str(
            r#"{"minWords": 3, "maxWords": 9, "prohibitedKeywords": ["x"], "requiredTopic": "t", "format": "json"}"#,
        )
        .unwrap();
        assert_eq!(spec.min_words, Some(3));
        assert_eq!(spec.max_words, Some(9));
        assert_eq!(spec.format, Some(ContentFormat::Json));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = serde_json::from_str::<ConstraintSpec>(r#"{"min_word": 3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_over() {
        let base = ConstraintSpec {
            min_words: Some(50),
            max_words: Some(500),
            prohibited_keywords: vec!["violence".to_string()],
            ..Default::default()
        };
        let overlay = ConstraintSpec {
            max_words: Some(200),
            prohibited_keywords: vec!["VIOLENCE".to_string(), "gore".to_string()],
            required_topic: Some("volcanoes".to_string()),
            ..Default::default()
        };
        let merged = overlay.merge_over(&base);
        assert_eq!(merged.min_words, Some(50));
        assert_eq!(merged.max_words, Some(200));
        assert_eq!(merged.prohibited_keywords, vec!["violence", "gore"]);
        assert_eq!(merged.required_topic.as_deref(), Some("volcanoes"));
    }

    proptest! {
        #[test]
        fn prop_passed_iff_no_violations(
            content in "[a-z ]{0,200}",
            min in proptest::option::of(0usize..40),
            max in proptest::option::of(0usize..40),
        ) {
            let spec = ConstraintSpec { min_words: min, max_words: max, ..Default::default() };
            let result = enforce(&content, &spec);
            prop_assert_eq!(result.passed, result.violations.is_empty());
            let expected = usize::from(min.map_or(false, |m| result.word_count < m))
                + usize::from(max.map_or(false, |m| result.word_count > m));
            prop_assert_eq!(result.violations.len(), expected);
        }
    }
}
