//! Single model call with timing and a timeout.

use std::time::Duration;
use thiserror::Error;

use tandem_core::{Metrics, MetricsTimer};

use crate::config::GenerationParams;
use crate::models::ModelHandle;
use crate::providers::{ChatMessage, CompletionConfig, ProviderError};

/// A failed model call.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Model '{model}' call failed: {source}")]
    Provider {
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("Model '{model}' timed out after {}", humantime::format_duration(*after))]
    Timeout { model: String, after: Duration },

    #[error("Model '{model}' returned empty output")]
    EmptyOutput { model: String },
}

/// Text produced by one call, with its metrics.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Generated text
    pub text: String,

    /// Latency and token counts for this call only
    pub metrics: Metrics,

    /// Model id that produced it
    pub model: String,
}

/// Runs prompts against model handles.
///
/// Each call is attempted exactly once.
#[derive(Debug, Clone)]
pub struct ModelExecutor {
    timeout: Duration,
    system_prompt: Option<String>,
}

impl ModelExecutor {
    /// Create an executor with a per-call timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            system_prompt: None,
        }
    }

    /// Send `prompt` after a system message.
    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Generate text for `prompt`.
    pub async fn execute(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, ExecutionError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let config = CompletionConfig {
            model: handle.api_model.clone(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            timeout: self.timeout,
            json_output: params.json_output,
        };

        let mut timer = MetricsTimer::started();
        let response = tokio::time::timeout(self.timeout, handle.provider.complete(messages, &config))
            .await
            .map_err(|_| ExecutionError::Timeout {
                model: handle.model_id.clone(),
                after: self.timeout,
            })?
            .map_err(|source| ExecutionError::Provider {
                model: handle.model_id.clone(),
                source,
            })?;
        timer.stop();
        timer.record_tokens(
            u64::from(response.usage.prompt_tokens),
            u64::from(response.usage.completion_tokens),
        );
        let metrics = timer.finish();

        if response.content.trim().is_empty() {
            return Err(ExecutionError::EmptyOutput {
                model: handle.model_id.clone(),
            });
        }

        tracing::debug!(
            model = %handle.model_id,
            latency_ms = metrics.latency_ms.unwrap_or_default(),
            output_tokens = metrics.output_tokens.unwrap_or_default(),
            "Model call finished"
        );

        Ok(Generation {
            text: response.content,
            metrics,
            model: handle.model_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LlmProvider, ScriptedProvider};
    use std::sync::Arc;

    fn handle(provider: ScriptedProvider) -> (ModelHandle, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let dyn_provider: Arc<dyn LlmProvider> = provider.clone();
        (ModelHandle::new("test-model", dyn_provider), provider)
    }

    #[tokio::test]
    async fn test_execute_records_metrics() {
        let (handle, _) = handle(ScriptedProvider::new("s", |_, _| {
            Ok("forty two characters of output text here".to_string())
        }));
        let executor = ModelExecutor::new(Duration::from_secs(5));

        let generation = executor
            .execute(&handle, "a prompt", &GenerationParams::text(0.7, 64))
            .await
            .unwrap();
        assert_eq!(generation.model, "test-model");
        assert!(generation.metrics.latency_ms.is_some());
        assert_eq!(generation.metrics.output_tokens, Some(10));
    }

    #[tokio::test]
    async fn test_system_prompt_and_json_flag_forwarded() {
        let (handle, provider) = handle(ScriptedProvider::new("s", |_, config| {
            Ok(format!("json={}", config.json_output))
        }));
        let executor = ModelExecutor::new(Duration::from_secs(5))
            .with_system_prompt(Some("Be terse.".to_string()));

        let generation = executor
            .execute(&handle, "judge", &GenerationParams::json(0.1, 512))
            .await
            .unwrap();
        assert_eq!(generation.text, "json=true");
        assert_eq!(provider.calls(), vec!["judge"]);
    }

    #[tokio::test]
    async fn test_empty_output_is_error() {
        let (handle, _) = handle(ScriptedProvider::new("s", |_, _| Ok("   ".to_string())));
        let executor = ModelExecutor::new(Duration::from_secs(5));
        let result = executor
            .execute(&handle, "p", &GenerationParams::text(0.7, 64))
            .await;
        assert!(matches!(result, Err(ExecutionError::EmptyOutput { .. })));
    }

    #[tokio::test]
    async fn test_provider_error_not_retried() {
        let (handle, provider) = handle(ScriptedProvider::new("s", |_, _| {
            Err(ProviderError::ApiError {
                status: 500,
                message: "down".to_string(),
            })
        }));
        let executor = ModelExecutor::new(Duration::from_secs(5));
        let result = executor
            .execute(&handle, "p", &GenerationParams::text(0.7, 64))
            .await;
        assert!(matches!(result, Err(ExecutionError::Provider { .. })));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let slow = Arc::new(crate::providers::MockProvider::from_config(
            &serde_json::json!({"latency_ms": 10_000}),
        )
        .unwrap());
        let handle = ModelHandle::new("slow", slow);
        let executor = ModelExecutor::new(Duration::from_millis(50));
        let result = executor
            .execute(&handle, "p", &GenerationParams::text(0.7, 64))
            .await;
        assert!(matches!(result, Err(ExecutionError::Timeout { .. })));
    }
}
