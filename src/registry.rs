//! Agent registry — logical names to backend factories.
//!
//! Populated once at startup and read-only for the lifetime of a
//! session. A name may map to a plain constructor or to a closure over
//! fixed parameters (a pinned model id); engines cannot tell the two
//! apart because both resolve to the same trait object.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::backend::{AgentBackend, ClaudeBackend, CodexBackend, GeminiBackend};
use crate::error::EngineError;

/// Factory producing a ready-to-use backend.
pub type BackendFactory =
    Arc<dyn Fn() -> Result<Arc<dyn AgentBackend>, EngineError> + Send + Sync>;

/// Availability of one registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAvailability {
    pub name: String,
    pub available: bool,
}

/// Registry of agent backends keyed by logical name.
#[derive(Default)]
pub struct AgentRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in CLI backends registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_default::<ClaudeBackend>("claude");
        registry.register_default::<CodexBackend>("codex");
        registry.register_default::<GeminiBackend>("gemini");
        registry
    }

    /// Register a backend type directly under its default configuration.
    pub fn register_default<B>(&mut self, name: impl Into<String>)
    where
        B: AgentBackend + Default + 'static,
    {
        self.register_with(name, || Ok(Arc::new(B::default())));
    }

    /// Register a pre-configured factory (e.g. a closure pinning a model id).
    pub fn register_with<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn AgentBackend>, EngineError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Resolve a logical name into a backend instance.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn AgentBackend>, EngineError> {
        match self.factories.get(name) {
            Some(factory) => factory(),
            None => Err(EngineError::UnknownAgent {
                name: name.to_string(),
                available: self.names().join(", "),
            }),
        }
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Probe every registered backend concurrently and report availability.
    ///
    /// A backend whose factory fails is reported unavailable rather than
    /// aborting the report.
    pub async fn availability(&self) -> Vec<AgentAvailability> {
        let probes = self.names().into_iter().map(|name| async move {
            let available = match self.resolve(&name) {
                Ok(backend) => backend.health_check().await,
                Err(err) => {
                    debug!(agent = %name, %err, "factory failed during availability probe");
                    false
                }
            };
            AgentAvailability { name, available }
        });
        join_all(probes).await
    }

    /// Names of agents that pass their availability probe.
    pub async fn available_names(&self) -> Vec<String> {
        self.availability()
            .await
            .into_iter()
            .filter(|a| a.available)
            .map(|a| a.name)
            .collect()
    }
}
