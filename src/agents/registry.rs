//! Identifier → factory mapping for agent implementations.

use anyhow::{Result, bail};
use std::collections::HashMap;
use std::sync::Arc;

use super::{AgentInvoker, AgentRole};

/// Key used when an agent spec names no implementation.
pub const DEFAULT_AGENT: &str = "default";

/// Everything a factory needs to build one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub id: String,
    pub role: AgentRole,
}

impl AgentSpec {
    pub fn new(id: impl Into<String>, role: AgentRole) -> Self {
        Self { id: id.into(), role }
    }
}

pub type AgentFactory = Arc<dyn Fn(&AgentSpec) -> Result<Arc<dyn AgentInvoker>> + Send + Sync>;

/// Registry of agent factories, owned by the composition root and passed
/// down explicitly.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: HashMap<String, AgentFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one under the same key.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&AgentSpec) -> Result<Arc<dyn AgentInvoker>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&AgentSpec) -> Result<Arc<dyn AgentInvoker>> + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Build an agent from the factory registered under `key`.
    pub fn create(&self, key: &str, spec: &AgentSpec) -> Result<Arc<dyn AgentInvoker>> {
        match self.factories.get(key) {
            Some(factory) => factory(spec),
            None => bail!("No agent registered under '{}'", key),
        }
    }

    /// Drop every registration.
    pub fn reset(&mut self) {
        self.factories.clear();
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
