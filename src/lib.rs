//! Quorum — multi-agent deliberation over CLI-wrapped AI agents.
//!
//! This library coordinates independent AI agent CLIs (Claude Code,
//! Codex, Gemini) into structured group protocols:
//!
//! - **Council**: parallel expert opinions, anonymized peer ranking,
//!   chairman synthesis ([`council::CouncilEngine`])
//! - **Debate**: adversarial pro/con rounds judged by a third agent
//!   ([`debate::DebateEngine`])
//! - **Deliberation**: a producer/reviewer refinement loop that stops at
//!   an agreement threshold ([`deliberation::DeliberationEngine`])
//!
//! Agents are unreliable by assumption: a crashed, missing, timed-out,
//! or garbled participant becomes an error [`response::AgentResponse`]
//! and the session continues without it. Only misconfiguration (and a
//! judge verdict nothing can be parsed from) aborts a session.
//!
//! Every structured field recovered from free-form agent text (rankings,
//! verdicts, agreement scores) follows the documented grammar in
//! [`extract`] so results are reproducible across runs and hosts.

pub mod backend;
pub mod council;
pub mod debate;
pub mod deliberation;
pub mod error;
pub mod extract;
pub mod personas;
pub mod registry;
pub mod response;

// Re-export the session-facing types
pub use backend::{AgentBackend, ClaudeBackend, CodexBackend, GeminiBackend, ScriptedBackend};
pub use council::{AgentRank, CouncilConfig, CouncilEngine, CouncilResult, PeerRanking};
pub use debate::{DebateEngine, DebateResult, DebateRound, Verdict};
pub use deliberation::{
    DeliberationConfig, DeliberationEngine, DeliberationResult, DeliberationRound,
    DeliberationStatus, FeedbackPoint, FeedbackSeverity,
};
pub use error::EngineError;
pub use extract::WinnerTag;
pub use personas::{KeywordPersonas, Persona, PersonaStrategy};
pub use registry::{AgentAvailability, AgentRegistry, BackendFactory};
pub use response::{AgentResponse, AgentRole, ErrorKind};
