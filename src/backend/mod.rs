//! Agent backends — the capability that turns a prompt into a response.
//!
//! One adapter per external CLI tool. Adapters differ only in the
//! command line they build and the record classifier they hand to the
//! stream decoder; everything else (spawn, timeout, error mapping) is
//! shared in [`process`].

pub mod claude;
pub mod codex;
pub mod gemini;
pub mod process;
pub mod scripted;
pub mod stream;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::response::{AgentResponse, AgentRole};

pub use claude::ClaudeBackend;
pub use codex::CodexBackend;
pub use gemini::GeminiBackend;
pub use scripted::ScriptedBackend;

/// Fixed deadline for availability probes. Probe failures are reported
/// as unavailability, never as invocation failures.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// A backend wrapping one external agent tool.
///
/// `invoke` never returns `Err` for ordinary failure modes (missing
/// tool, timeout, bad output); those come back as an error
/// [`AgentResponse`] so a session can keep going without the
/// participant. Backends hold no session state and may be invoked
/// concurrently by unrelated sessions.
#[async_trait]
pub trait AgentBackend: Send + Sync + std::fmt::Debug {
    /// Stable agent identity (e.g. "claude").
    fn name(&self) -> &str;

    /// Execute a prompt and return the agent's response.
    ///
    /// `context` carries optional structured data alongside the prompt;
    /// current adapters fold it into the prompt text when present.
    async fn invoke(&self, prompt: &str, context: Option<&Value>, role: AgentRole)
        -> AgentResponse;

    /// Best-effort, time-bounded availability probe.
    async fn health_check(&self) -> bool;
}

/// Run one external tool invocation end to end: spawn, decode, classify.
///
/// All ordinary failures become error responses here so the concrete
/// backends stay thin command-line builders.
pub(crate) async fn invoke_tool(
    agent_id: &str,
    role: AgentRole,
    program: &str,
    args: Vec<String>,
    stdin: Option<String>,
    timeout: Duration,
    classify: stream::Classifier,
) -> AgentResponse {
    let output = match process::run_cli(program, &args, stdin.as_deref(), timeout).await {
        Ok(output) => output,
        Err(failure) => return AgentResponse::error(agent_id, role, failure.kind, failure.detail),
    };

    let decoded = stream::decode(&output.stdout, classify);
    if decoded.is_malformed(&output.stdout) {
        return AgentResponse::error(
            agent_id,
            role,
            crate::response::ErrorKind::MalformedOutput,
            format!("{} produced output with no decodable records", program),
        )
        .with_raw_output(output.stdout);
    }

    let mut response = AgentResponse::ok(agent_id, role, decoded.content)
        .with_metadata_map(decoded.metadata)
        .with_raw_output(output.stdout);
    if let Some(code) = output.exit_code {
        response = response.with_metadata("exit_code", code.into());
    }
    response
}

/// Prepend serialized context to a prompt when context is supplied.
pub(crate) fn fold_context(prompt: &str, context: Option<&Value>) -> String {
    match context {
        Some(ctx) => format!(
            "CONTEXT:\n{}\n\n{}",
            serde_json::to_string_pretty(ctx).unwrap_or_default(),
            prompt
        ),
        None => prompt.to_string(),
    }
}
