//! Session-level error taxonomy.
//!
//! Only configuration errors and an unparseable debate verdict abort a
//! session. Per-agent invocation failures are data (`AgentResponse` with
//! `is_error = true`) and never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown agent: {name} (registered: {available})")]
    UnknownAgent { name: String, available: String },

    #[error("council requires at least 2 members, got {0}")]
    InsufficientAgents(usize),

    #[error("round count must be at least 1, got {0}")]
    InvalidRounds(u32),

    #[error("agreement threshold must be within 0.0..=1.0, got {0}")]
    InvalidThreshold(f64),

    #[error("judge verdict could not be parsed: {0}")]
    UnparsableVerdict(String),

    #[error("backend construction failed: {0}")]
    Backend(String),
}

impl EngineError {
    /// Whether this error belongs to the configuration category, i.e. it
    /// is raised before any backend invocation has side effects.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownAgent { .. }
                | Self::InsufficientAgents(_)
                | Self::InvalidRounds(_)
                | Self::InvalidThreshold(_)
                | Self::Backend(_)
        )
    }
}
