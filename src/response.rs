//! Agent response model — one immutable record per invocation attempt.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role an agent plays for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Independent opinion-giver in a council session.
    CouncilMember,
    /// Argues in favor in a debate.
    Pro,
    /// Argues against in a debate.
    Con,
    /// Evaluates a completed debate and declares a winner.
    Judge,
    /// Generates and revises the working answer in a deliberation.
    Producer,
    /// Critiques the producer's answer and scores agreement.
    Reviewer,
    /// Synthesizes council opinions into the final answer.
    Chairman,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CouncilMember => write!(f, "council_member"),
            Self::Pro => write!(f, "pro"),
            Self::Con => write!(f, "con"),
            Self::Judge => write!(f, "judge"),
            Self::Producer => write!(f, "producer"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::Chairman => write!(f, "chairman"),
        }
    }
}

/// Kind tag for a failed invocation, recorded under `metadata["error"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The external tool binary was not found on PATH.
    CliNotFound,
    /// The invocation exceeded its deadline and was killed.
    Timeout,
    /// The tool exited with a non-zero status.
    NonZeroExit,
    /// The tool produced output but no record of it could be decoded.
    MalformedOutput,
    /// Any other spawn or I/O failure.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CliNotFound => "cli_not_found",
            Self::Timeout => "timeout",
            Self::NonZeroExit => "non_zero_exit",
            Self::MalformedOutput => "malformed_output",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent's output for one turn.
///
/// Created exactly once per invocation attempt, read and aggregated
/// thereafter. An error response is ordinary data: engines never unwind
/// on it, they treat the participant as having abstained for that turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Stable identity of the backend that produced this response.
    pub agent_id: String,
    /// Role the agent played.
    pub role: AgentRole,
    /// Main response content. For errors, a human-readable description.
    pub content: String,
    /// Unparsed backend output, kept for diagnostics only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    /// Token counts, exit codes, model id, error kind tag.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Whether this invocation failed.
    pub is_error: bool,
}

impl AgentResponse {
    /// A successful response.
    pub fn ok(agent_id: impl Into<String>, role: AgentRole, content: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            content: content.into(),
            raw_output: None,
            metadata: Map::new(),
            is_error: false,
        }
    }

    /// A failed invocation. `detail` must read as a sentence, never a stack trace.
    pub fn error(
        agent_id: impl Into<String>,
        role: AgentRole,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        let mut metadata = Map::new();
        metadata.insert("error".to_string(), Value::String(kind.as_str().to_string()));
        Self {
            agent_id: agent_id.into(),
            role,
            content: format!("[error: {}]", detail),
            raw_output: None,
            metadata,
            is_error: true,
        }
    }

    /// Attach the raw backend output.
    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Merge a metadata map into this response's metadata.
    pub fn with_metadata_map(mut self, map: Map<String, Value>) -> Self {
        self.metadata.extend(map);
        self
    }

    /// The error kind tag, if this is an error response.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if !self.is_error {
            return None;
        }
        match self.metadata.get("error").and_then(Value::as_str) {
            Some("cli_not_found") => Some(ErrorKind::CliNotFound),
            Some("timeout") => Some(ErrorKind::Timeout),
            Some("non_zero_exit") => Some(ErrorKind::NonZeroExit),
            Some("malformed_output") => Some(ErrorKind::MalformedOutput),
            _ => Some(ErrorKind::Unknown),
        }
    }
}
