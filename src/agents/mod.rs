//! Agent invocation.
//!
//! An agent is an external, usually LLM-backed worker. The orchestration core
//! only talks to agents through [`AgentInvoker`]; concrete implementations are
//! created from an [`AgentRegistry`] owned by the composition root.

pub mod cli;
pub mod parse;
pub mod registry;
pub mod role;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub use cli::{CliAgent, CliAgentConfig, is_transient_error};
pub use parse::{AgentReport, ParseError, parse_agent_report};
pub use registry::{AgentFactory, AgentRegistry, AgentSpec, DEFAULT_AGENT};
pub use role::{AgentRole, Perspective};

/// Input to a single agent invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    /// Short label for logs, e.g. `S-1/T2` or `S-1/review/security`.
    pub label: String,
    pub prompt: String,
    pub working_dir: Option<PathBuf>,
}

impl AgentRequest {
    pub fn new(label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            prompt: prompt.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// What an agent reported back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResponse {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    /// Files the invocation actually modified.
    pub files_changed: Vec<String>,
    /// The agent declared its error transient (rate limit, timeout, ...).
    pub transient: bool,
}

impl AgentResponse {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_changed = files;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Text to classify and fingerprint when the invocation failed.
    pub fn failure_text(&self) -> String {
        match &self.error {
            Some(err) if !err.trim().is_empty() => err.clone(),
            _ => self.output.clone(),
        }
    }
}

/// A worker that can be handed a prompt.
///
/// Implementations must be safe to retry with the same request.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse>;
}
