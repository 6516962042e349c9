//! Codex CLI backend.
//!
//! Invokes `codex exec` in full-auto JSONL mode; the prompt travels
//! over stdin (the trailing `-` argument).

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use super::stream::StreamEvent;
use super::{fold_context, invoke_tool, AgentBackend, HEALTH_CHECK_TIMEOUT};
use crate::response::{AgentResponse, AgentRole};

#[derive(Debug, Clone)]
pub struct CodexConfig {
    /// Optional model override; the CLI default applies otherwise.
    pub model: Option<String>,
    /// Allow reading files outside the workspace.
    pub full_disk_read: bool,
    pub timeout: Duration,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            model: None,
            full_disk_read: true,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Backend for the Codex CLI.
#[derive(Debug, Clone, Default)]
pub struct CodexBackend {
    config: CodexConfig,
}

impl CodexBackend {
    pub fn new(config: CodexConfig) -> Self {
        Self { config }
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            config: CodexConfig {
                model: Some(model.into()),
                ..CodexConfig::default()
            },
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--full-auto".to_string(),
            "--json".to_string(),
            "--skip-git-repo-check".to_string(),
        ];
        if self.config.full_disk_read {
            args.push("-c".to_string());
            args.push("sandbox_permissions=[\"disk-full-read-access\"]".to_string());
        }
        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("-".to_string());
        args
    }
}

/// Record classifier for Codex JSONL output.
///
/// Completed `agent_message` items carry content; `turn.completed`
/// carries token usage.
fn classify(record: &Value) -> StreamEvent {
    match record.get("type").and_then(Value::as_str) {
        Some("item.completed") => {
            let item = record.get("item");
            let is_message = item
                .and_then(|i| i.get("type"))
                .and_then(Value::as_str)
                .is_some_and(|t| t == "agent_message");
            if is_message {
                StreamEvent::Text(
                    item.and_then(|i| i.get("text"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                )
            } else {
                StreamEvent::Other
            }
        }
        Some("turn.completed") => {
            let mut fields = Map::new();
            if let Some(usage) = record.get("usage") {
                fields.insert("usage".to_string(), usage.clone());
            }
            StreamEvent::Completion(fields)
        }
        _ => StreamEvent::Other,
    }
}

#[async_trait]
impl AgentBackend for CodexBackend {
    fn name(&self) -> &str {
        "codex"
    }

    async fn invoke(
        &self,
        prompt: &str,
        context: Option<&Value>,
        role: AgentRole,
    ) -> AgentResponse {
        let prompt = fold_context(prompt, context);
        let mut response = invoke_tool(
            self.name(),
            role,
            "codex",
            self.args(),
            Some(prompt),
            self.config.timeout,
            classify,
        )
        .await;
        if let Some(model) = &self.config.model {
            response = response.with_metadata("model", model.clone().into());
        }
        response
    }

    async fn health_check(&self) -> bool {
        super::process::probe_version("codex", HEALTH_CHECK_TIMEOUT).await
    }
}
