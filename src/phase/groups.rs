//! Agent-group configuration for a phase.

use serde::{Deserialize, Serialize};

use crate::agents::{AgentRole, DEFAULT_AGENT};

/// How the members of a group are run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Composition {
    #[default]
    Sequential,
    Parallel,
}

/// Whether members must agree before the group passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusMode {
    #[default]
    None,
    Required,
}

/// One agent within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAgentConfig {
    pub id: String,
    pub role: String,
    /// Registry key of the implementation; the default agent when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl GroupAgentConfig {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            agent: None,
        }
    }

    pub fn parsed_role(&self) -> AgentRole {
        AgentRole::parse(&self.role)
    }

    pub fn registry_key(&self) -> &str {
        self.agent.as_deref().unwrap_or(DEFAULT_AGENT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentGroupConfig {
    pub name: String,
    #[serde(default)]
    pub composition: Composition,
    #[serde(default)]
    pub consensus: ConsensusMode,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub agents: Vec<GroupAgentConfig>,
}

fn default_max_iterations() -> u32 {
    3
}

impl AgentGroupConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            composition: Composition::default(),
            consensus: ConsensusMode::default(),
            max_iterations: default_max_iterations(),
            agents: Vec::new(),
        }
    }

    pub fn parallel(mut self) -> Self {
        self.composition = Composition::Parallel;
        self
    }

    pub fn with_consensus(mut self, mode: ConsensusMode) -> Self {
        self.consensus = mode;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_agent(mut self, agent: GroupAgentConfig) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn requires_consensus(&self) -> bool {
        self.consensus == ConsensusMode::Required
    }
}
