//! Deterministic in-memory backend for engine tests.
//!
//! Serves a scripted queue of replies in invocation order and records
//! every prompt it receives, so aggregation, ordering, and failure
//! handling can be tested without spawning external processes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::AgentBackend;
use crate::response::{AgentResponse, AgentRole, ErrorKind};

#[derive(Debug, Clone)]
enum Reply {
    Content(String),
    Failure(ErrorKind, String),
}

/// One observed invocation.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub prompt: String,
    pub role: AgentRole,
}

/// An [`AgentBackend`] that replays a scripted queue of responses.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    invocations: Mutex<Vec<RecordedInvocation>>,
    healthy: bool,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(Vec::new()),
            healthy: true,
        }
    }

    /// Queue a successful reply.
    pub fn reply(self, content: impl Into<String>) -> Self {
        self.replies
            .lock()
            .expect("scripted replies lock")
            .push_back(Reply::Content(content.into()));
        self
    }

    /// Queue a failed invocation.
    pub fn fail(self, kind: ErrorKind, detail: impl Into<String>) -> Self {
        self.replies
            .lock()
            .expect("scripted replies lock")
            .push_back(Reply::Failure(kind, detail.into()));
        self
    }

    /// Report unavailable from `health_check`.
    pub fn unavailable(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Number of invocations observed so far.
    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().expect("invocations lock").len()
    }

    /// Snapshot of all observed invocations, in order.
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().expect("invocations lock").clone()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        prompt: &str,
        context: Option<&Value>,
        role: AgentRole,
    ) -> AgentResponse {
        let prompt = super::fold_context(prompt, context);
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(RecordedInvocation {
                prompt,
                role,
            });

        let reply = self
            .replies
            .lock()
            .expect("scripted replies lock")
            .pop_front();
        match reply {
            Some(Reply::Content(content)) => AgentResponse::ok(&self.name, role, content),
            Some(Reply::Failure(kind, detail)) => {
                AgentResponse::error(&self.name, role, kind, detail)
            }
            None => AgentResponse::ok(&self.name, role, ""),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}
