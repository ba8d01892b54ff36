//! Offline providers.
//!
//! [`MockProvider`] answers every prompt deterministically so a suite can
//! be exercised end to end without network access. [`ScriptedProvider`]
//! hands each prompt to a closure and records it, which is what the
//! runner tests use.

use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

use super::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    ProviderFactory, TokenUsage,
};

lazy_static! {
    static ref TOPIC_LINE: Regex = Regex::new(r"(?im)^\s*topic\s*:\s*(.+?)\s*$").unwrap();
}

const DEFAULT_TOPIC: &str = "general knowledge";

/// Deterministic provider for offline runs.
///
/// JSON requests get `{"topic", "passed", "score", "feedback"}`, which
/// satisfies both the context step and every judgment step. Text requests
/// get a fixed-length answer mentioning the topic found in the prompt.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    answer_words: usize,
    passed: bool,
    score: f64,
    latency: Option<Duration>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            answer_words: 60,
            passed: true,
            score: 0.85,
            latency: None,
        }
    }
}

impl MockProvider {
    /// Create a mock with default behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a provider config block.
    ///
    /// Recognized keys: `name`, `answer_words`, `passed`, `score`,
    /// `latency_ms`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let mut provider = Self::default();
        if let Some(name) = config["name"].as_str() {
            provider.name = name.to_string();
        }
        if let Some(words) = config["answer_words"].as_u64() {
            provider.answer_words = words as usize;
        }
        if let Some(passed) = config["passed"].as_bool() {
            provider.passed = passed;
        }
        if let Some(score) = config["score"].as_f64() {
            provider.score = score;
        }
        if let Some(ms) = config["latency_ms"].as_u64() {
            provider.latency = Some(Duration::from_millis(ms));
        }
        Ok(provider)
    }

    /// Set the verdict returned for JSON requests.
    pub fn with_verdict(mut self, passed: bool, score: f64) -> Self {
        self.passed = passed;
        self.score = score;
        self
    }

    /// Set the answer length in words.
    pub fn with_answer_words(mut self, words: usize) -> Self {
        self.answer_words = words;
        self
    }

    fn topic_of(prompt: &str) -> String {
        TOPIC_LINE
            .captures(prompt)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_matches('"').to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOPIC.to_string())
    }

    fn respond(&self, prompt: &str, json_output: bool) -> String {
        let topic = Self::topic_of(prompt);
        if json_output {
            let feedback = if self.passed {
                format!("The response addresses {}.", topic)
            } else {
                format!("The response does not adequately address {}.", topic)
            };
            return json!({
                "topic": topic,
                "passed": self.passed,
                "score": self.score,
                "feedback": feedback,
            })
            .to_string();
        }

        let mut words: Vec<String> = format!("This is a simulated response about {}.", topic)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let filler = ["it", "covers", "the", "main", "points", "clearly"];
        let mut i = 0;
        while words.len() < self.answer_words {
            words.push(filler[i % filler.len()].to_string());
            i += 1;
        }
        words.truncate(self.answer_words.max(1));
        words.join(" ")
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let content = self.respond(prompt, config.json_output);
        let usage = TokenUsage {
            prompt_tokens: messages
                .iter()
                .map(|m| self.estimate_tokens(&m.content))
                .sum(),
            completion_tokens: self.estimate_tokens(&content).max(1),
        };

        Ok(CompletionResponse {
            content,
            usage,
            model: config.model.clone(),
            stop_reason: Some("end_turn".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory for [`MockProvider`].
pub struct MockProviderFactory;

impl ProviderFactory for MockProviderFactory {
    fn provider_type(&self) -> &'static str {
        "mock"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(MockProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if let Some(score) = config.get("score") {
            if !score.is_number() {
                return Err(ProviderError::NotConfigured(
                    "mock 'score' must be a number".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Deterministic offline responses"
    }
}

type Script = dyn Fn(&str, &CompletionConfig) -> Result<String, ProviderError> + Send + Sync;

/// Provider whose responses come from a closure.
///
/// Every prompt is recorded, in call order.
pub struct ScriptedProvider {
    name: String,
    script: Box<Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Create a provider that answers with `script(prompt, config)`.
    pub fn new<F>(name: impl Into<String>, script: F) -> Self
    where
        F: Fn(&str, &CompletionConfig) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of prompts received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("name", &self.name)
            .field("calls", &self.call_count())
            .finish()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls.lock().push(prompt.clone());

        let content = (self.script)(&prompt, config)?;
        Ok(CompletionResponse {
            usage: TokenUsage {
                prompt_tokens: self.estimate_tokens(&prompt),
                completion_tokens: self.estimate_tokens(&content),
            },
            content,
            model: config.model.clone(),
            stop_reason: None,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}
