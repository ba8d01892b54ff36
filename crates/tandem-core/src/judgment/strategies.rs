//! The ordered fallback chain used to recover an object from model text.
//!
//! Each strategy is a pure `&str -> Option<JsonMap>` function and can be
//! tested on its own. [`STRATEGIES`] fixes the order; the first strategy
//! that yields an object wins.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::scan::{fenced_blocks, top_level_objects};

/// A JSON object as produced by the strategies.
pub type JsonMap = Map<String, Value>;

/// A single extraction strategy.
pub type Strategy = fn(&str) -> Option<JsonMap>;

lazy_static! {
    /// `- key: value` bullet lines
    static ref BULLET_LINE: Regex = Regex::new(
        r"(?m)^[ \t]*-[ \t]+([A-Za-z_]+):[ \t]+(.+)$"
    ).unwrap();

    static ref SINGLE_QUOTED: Regex = Regex::new(r"'([^']*)'").unwrap();
    static ref BARE_KEY: Regex = Regex::new(r"([{,])\s*([A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap();
    static ref PYTHON_LITERAL: Regex = Regex::new(r"\b(True|False|None)\b").unwrap();
    static ref TRAILING_COMMA: Regex = Regex::new(r",\s*([}\]])").unwrap();
}

const JSON_LABELS: &[&str] = &["json", "jsonc"];
const YAML_LABELS: &[&str] = &["yaml", "yml"];

/// Which strategy produced the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// The whole text parsed as a JSON object
    Direct,
    /// A fenced block labeled `json`/`yaml`
    LabeledFence,
    /// A fenced block with no label
    UnlabeledFence,
    /// The last balanced `{...}` span in the text
    TrailingObject,
    /// A JSON candidate that parsed only after [`repair_json`]
    Repaired,
    /// Synthesized from `- key: value` lines
    Bullets,
}

/// Strategies in the order they are tried.
pub const STRATEGIES: &[(ExtractionMethod, Strategy)] = &[
    (ExtractionMethod::Direct, parse_direct),
    (ExtractionMethod::LabeledFence, parse_labeled_fence),
    (ExtractionMethod::UnlabeledFence, parse_unlabeled_fence),
    (ExtractionMethod::TrailingObject, parse_trailing_object),
    (ExtractionMethod::Repaired, parse_repaired),
    (ExtractionMethod::Bullets, parse_bullets),
];

/// Parse the whole text as a JSON object.
pub fn parse_direct(text: &str) -> Option<JsonMap> {
    json_object(text.trim())
}

/// Parse the first fenced block labeled as JSON or YAML that holds an object.
pub fn parse_labeled_fence(text: &str) -> Option<JsonMap> {
    fenced_blocks(text).into_iter().find_map(|block| {
        if block.has_label(JSON_LABELS) {
            json_object(block.body)
        } else if block.has_label(YAML_LABELS) {
            yaml_object(block.body)
        } else {
            None
        }
    })
}

/// Parse the first unlabeled fenced block that holds a JSON object.
pub fn parse_unlabeled_fence(text: &str) -> Option<JsonMap> {
    fenced_blocks(text)
        .into_iter()
        .filter(|block| block.is_unlabeled())
        .find_map(|block| json_object(block.body))
}

/// Parse the last top-level `{...}` span that is valid JSON.
pub fn parse_trailing_object(text: &str) -> Option<JsonMap> {
    top_level_objects(text).into_iter().rev().find_map(json_object)
}

/// Retry every JSON candidate after [`repair_json`].
///
/// Candidates are tried in the same order as the strict strategies: the
/// whole text, JSON-labeled fences, unlabeled fences, then top-level spans
/// from last to first.
pub fn parse_repaired(text: &str) -> Option<JsonMap> {
    let blocks = fenced_blocks(text);
    let labeled = blocks
        .iter()
        .filter(|block| block.has_label(JSON_LABELS))
        .map(|block| block.body);
    let unlabeled = blocks
        .iter()
        .filter(|block| block.is_unlabeled())
        .map(|block| block.body);

    std::iter::once(text.trim())
        .chain(labeled)
        .chain(unlabeled)
        .chain(top_level_objects(text).into_iter().rev())
        .filter(|candidate| candidate.starts_with('{'))
        .find_map(|candidate| json_object(&repair_json(candidate)))
}

/// Rewrite common near-JSON into JSON.
///
/// Applied in order: single-quoted strings become double-quoted, bare keys
/// get quoted, Python `True`/`False`/`None` become `true`/`false`/`null`,
/// and trailing commas before `}` or `]` are dropped. The rewrites are
/// textual and can touch string contents, so they only run after a strict
/// parse has failed.
pub fn repair_json(candidate: &str) -> String {
    let fixed = SINGLE_QUOTED.replace_all(candidate, "\"${1}\"");
    let fixed = BARE_KEY.replace_all(&fixed, "${1}\"${2}\":");
    let fixed = PYTHON_LITERAL.replace_all(&fixed, |caps: &regex::Captures<'_>| {
        match &caps[1] {
            "True" => "true",
            "False" => "false",
            _ => "null",
        }
    });
    TRAILING_COMMA.replace_all(&fixed, "${1}").into_owned()
}

/// Build an object from `- key: value` bullet lines.
///
/// Values are coerced with static rules: `true`/`false` (any case) become
/// booleans, digits with at most one dot become floats, and anything else
/// is kept as a trimmed string. Later duplicates overwrite earlier ones.
pub fn parse_bullets(text: &str) -> Option<JsonMap> {
    let mut object = JsonMap::new();
    for caps in BULLET_LINE.captures_iter(text) {
        object.insert(caps[1].to_string(), coerce_bullet_value(caps[2].trim()));
    }
    (!object.is_empty()).then_some(object)
}

/// Coerce a bullet value into a JSON scalar.
pub fn coerce_bullet_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if is_plain_decimal(raw) {
        if let Some(number) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}

/// Digits with at most one dot, and at least one digit.
fn is_plain_decimal(raw: &str) -> bool {
    let mut dots = 0;
    let mut digits = 0;
    for c in raw.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

fn json_object(candidate: &str) -> Option<JsonMap> {
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn yaml_object(candidate: &str) -> Option<JsonMap> {
    match serde_yaml::from_str::<Value>(candidate).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
