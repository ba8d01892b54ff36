//! Prompt template resolution.
//!
//! Templates are plain text with `[name]` placeholders. The runner only
//! depends on the [`TemplateResolver`] trait; [`TemplateStore`] is the
//! in-memory implementation loaded from a directory and from the suite
//! file.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

lazy_static! {
    /// `[name]` placeholder
    static ref PLACEHOLDER: Regex = Regex::new(r"\[([A-Za-z_][A-Za-z0-9_]*)\]").unwrap();

    static ref BLANK_LINES: Regex = Regex::new(r"\n\s*\n").unwrap();
    static ref SPACE_RUNS: Regex = Regex::new(r" {2,}").unwrap();
}

/// Variables available to a template.
pub type Variables = BTreeMap<String, Value>;

/// Errors from template resolution.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template '{template}' has unresolved placeholders: {}", .placeholders.join(", "))]
    Unresolved {
        template: String,
        placeholders: Vec<String>,
    },

    #[error("Failed to read template file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse template file {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Duplicate template id: {0}")]
    Duplicate(String),
}

/// Turns a template id and variables into a prompt.
pub trait TemplateResolver: Send + Sync {
    /// Render a template, failing if it is unknown or leaves placeholders.
    fn render(&self, template_id: &str, variables: &Variables) -> Result<String, TemplateError>;

    /// Whether a template with this id exists.
    fn contains(&self, template_id: &str) -> bool;
}

/// On-disk template definition.
#[derive(Debug, Deserialize)]
struct TemplateFile {
    id: String,
    #[serde(alias = "pattern")]
    template: String,
}

/// In-memory template collection.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: BTreeMap<String, String>,
    compact_whitespace: bool,
}

impl TemplateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collapse blank-line and space runs in rendered prompts.
    pub fn with_compact_whitespace(mut self, enabled: bool) -> Self {
        self.compact_whitespace = enabled;
        self
    }

    /// Add or replace a template.
    pub fn insert(&mut self, id: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(id.into(), template.into());
    }

    /// Add every entry of an inline map, replacing existing ids.
    pub fn extend<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (id, template) in entries {
            self.insert(id, template);
        }
    }

    /// Load every `*.json`, `*.yaml` and `*.yml` file in `dir`.
    ///
    /// Each file holds one `{id, template}` object (`pattern` is accepted
    /// for `template`). Two files declaring the same id are an error.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, TemplateError> {
        let mut paths: Vec<_> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("json" | "yaml" | "yml")
                )
            })
            .collect();
        paths.sort();

        let mut seen = BTreeSet::new();
        for path in &paths {
            let contents = fs::read_to_string(path)?;
            let parsed: Result<TemplateFile, String> =
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    serde_json::from_str(&contents).map_err(|e| e.to_string())
                } else {
                    serde_yaml::from_str(&contents).map_err(|e| e.to_string())
                };
            let file = parsed.map_err(|message| TemplateError::ParseError {
                path: path.display().to_string(),
                message,
            })?;
            if !seen.insert(file.id.clone()) {
                return Err(TemplateError::Duplicate(file.id));
            }
            tracing::debug!(id = %file.id, path = %path.display(), "Loaded template");
            self.insert(file.id, file.template);
        }

        Ok(paths.len())
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True if the store holds no templates.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl TemplateResolver for TemplateStore {
    fn render(&self, template_id: &str, variables: &Variables) -> Result<String, TemplateError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| TemplateError::NotFound(template_id.to_string()))?;

        let mut unresolved = BTreeSet::new();
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
            match variables.get(&caps[1]) {
                Some(value) => render_value(value),
                None => {
                    unresolved.insert(caps[1].to_string());
                    caps[0].to_string()
                }
            }
        });

        if !unresolved.is_empty() {
            return Err(TemplateError::Unresolved {
                template: template_id.to_string(),
                placeholders: unresolved.into_iter().collect(),
            });
        }

        if self.compact_whitespace {
            let collapsed = BLANK_LINES.replace_all(&rendered, "\n\n");
            Ok(SPACE_RUNS.replace_all(&collapsed, " ").trim().to_string())
        } else {
            Ok(rendered.into_owned())
        }
    }

    fn contains(&self, template_id: &str) -> bool {
        self.templates.contains_key(template_id)
    }
}

/// Render a variable value into prompt text.
///
/// Strings are inserted verbatim; every other value uses compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
