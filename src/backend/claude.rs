//! Claude Code CLI backend.
//!
//! Invokes `claude -p` (print mode) with stream-json output; the prompt
//! travels over stdin.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use super::stream::StreamEvent;
use super::{fold_context, invoke_tool, AgentBackend, HEALTH_CHECK_TIMEOUT};
use crate::response::{AgentResponse, AgentRole};

/// Construction-time configuration for the Claude backend.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    /// Model alias (opus, sonnet, haiku).
    pub model: String,
    /// Maximum agentic turns per invocation.
    pub max_turns: u32,
    /// Tools the agent may use during an invocation.
    pub allowed_tools: Vec<String>,
    /// Per-invocation deadline.
    pub timeout: Duration,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            model: "opus".to_string(),
            max_turns: 25,
            allowed_tools: ["Read", "Grep", "Glob", "Bash", "Task"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Backend for the Claude Code CLI.
#[derive(Debug, Clone, Default)]
pub struct ClaudeBackend {
    config: ClaudeConfig,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Self {
        Self { config }
    }

    /// A backend pinned to a specific model alias.
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            config: ClaudeConfig {
                model: model.into(),
                ..ClaudeConfig::default()
            },
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            self.config.model.clone(),
            "--max-turns".to_string(),
            self.config.max_turns.to_string(),
            "--allowedTools".to_string(),
            self.config.allowed_tools.join(","),
        ]
    }
}

/// Record classifier for Claude stream-json output.
///
/// `assistant/text` records carry content; the final `result` record
/// carries usage metadata.
fn classify(record: &Value) -> StreamEvent {
    match record.get("type").and_then(Value::as_str) {
        Some("assistant/text") => StreamEvent::Text(
            record
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        Some("result") => {
            let mut fields = Map::new();
            if let Some(usage) = record.get("usage") {
                fields.insert("usage".to_string(), usage.clone());
            }
            if let Some(cost) = record.get("total_cost_usd") {
                fields.insert("total_cost_usd".to_string(), cost.clone());
            }
            StreamEvent::Completion(fields)
        }
        _ => StreamEvent::Other,
    }
}

#[async_trait]
impl AgentBackend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
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
            "claude",
            self.args(),
            Some(prompt),
            self.config.timeout,
            classify,
        )
        .await
        .with_metadata("model", self.config.model.clone().into())
    }

    async fn health_check(&self) -> bool {
        super::process::probe_version("claude", HEALTH_CHECK_TIMEOUT).await
    }
}
