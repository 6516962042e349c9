//! Gemini CLI backend.
//!
//! Invokes `gemini` with stream-json output; unlike the other adapters
//! the prompt is passed as the final argument, not over stdin.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use super::stream::StreamEvent;
use super::{fold_context, invoke_tool, AgentBackend, HEALTH_CHECK_TIMEOUT};
use crate::response::{AgentResponse, AgentRole};

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub model: String,
    /// Run tool calls inside the CLI's sandbox.
    pub sandbox: bool,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-3-pro-preview".to_string(),
            sandbox: true,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Backend for the Gemini CLI.
#[derive(Debug, Clone, Default)]
pub struct GeminiBackend {
    config: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            config: GeminiConfig {
                model: model.into(),
                ..GeminiConfig::default()
            },
        }
    }

    fn args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "stream-json".to_string(),
            "-y".to_string(),
            "-m".to_string(),
            self.config.model.clone(),
        ];
        if self.config.sandbox {
            args.push("-s".to_string());
        }
        args.push(prompt.to_string());
        args
    }
}

/// Record classifier for Gemini stream-json output.
///
/// Text deltas and plain `text` records carry content; the trailing
/// `stats` record carries usage metadata.
fn classify(record: &Value) -> StreamEvent {
    if record.get("type").and_then(Value::as_str) == Some("content_block_delta") {
        let text = record
            .get("delta")
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        return StreamEvent::Text(text.to_string());
    }
    if record.get("type").and_then(Value::as_str) == Some("stats") {
        let mut fields = Map::new();
        if let Some(usage) = record.get("usage") {
            fields.insert("usage".to_string(), usage.clone());
        }
        return StreamEvent::Completion(fields);
    }
    if let Some(text) = record.get("text").and_then(Value::as_str) {
        return StreamEvent::Text(text.to_string());
    }
    StreamEvent::Other
}

#[async_trait]
impl AgentBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn invoke(
        &self,
        prompt: &str,
        context: Option<&Value>,
        role: AgentRole,
    ) -> AgentResponse {
        let prompt = fold_context(prompt, context);
        invoke_tool(
            self.name(),
            role,
            "gemini",
            self.args(&prompt),
            None,
            self.config.timeout,
            classify,
        )
        .await
        .with_metadata("model", self.config.model.clone().into())
    }

    async fn health_check(&self) -> bool {
        super::process::probe_version("gemini", HEALTH_CHECK_TIMEOUT).await
    }
}
