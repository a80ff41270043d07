//! Story orchestration: wires the scheduler, phase executor and task
//! executor to the on-disk stores and runs recommended actions.

pub mod journal;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use crate::agents::{AgentInvoker, AgentRegistry, AgentSpec, CliAgent, CliAgentConfig, DEFAULT_AGENT};
use crate::fingerprint::store::FingerprintStore;
use crate::story::FileStoryStore;
use crate::storyloop_config::StoryloopConfig;
use crate::tasks::FileProgressStore;
use crate::vcs::GitCli;

pub use journal::{ActionJournal, JournalEntry};
pub use runner::{ActionReport, RunnerSettings, StoryRunner, TickResult};

/// Agent configuration for the default CLI agent.
///
/// `agent_cmd` may carry its own arguments (`"claude --print"`); when it does
/// they replace the built-in ones.
pub fn cli_agent_config(config: &StoryloopConfig) -> CliAgentConfig {
    let agent_cmd = config.agent_cmd();
    let mut parts = agent_cmd.split_whitespace();
    let mut cli = CliAgentConfig::default()
        .with_working_dir(config.project_dir.clone())
        .with_timeout(Duration::from_secs(
            config.toml.executor.agent_timeout_secs,
        ));
    if let Some(command) = parts.next() {
        cli = cli.with_command(command);
    }
    let args: Vec<String> = parts.map(str::to_string).collect();
    if !args.is_empty() {
        cli = cli.with_args(args);
    }
    cli
}

/// Registry with the default CLI agent registered under [`DEFAULT_AGENT`].
pub fn build_registry(config: &StoryloopConfig) -> AgentRegistry {
    let cli = cli_agent_config(config);
    AgentRegistry::new().with(DEFAULT_AGENT, move |spec: &AgentSpec| {
        Ok(Arc::new(CliAgent::new(spec.id.clone(), cli.clone())) as Arc<dyn AgentInvoker>)
    })
}

impl StoryRunner {
    /// Runner backed by the project's files, git and the configured agent CLI.
    pub fn from_config(config: &StoryloopConfig) -> Self {
        StoryRunner::new(
            Arc::new(FileStoryStore::new(config.stories_dir())),
            build_registry(config),
            Arc::new(GitCli::new(&config.project_dir)),
            Arc::new(FileProgressStore::new(config.progress_dir())),
            FingerprintStore::new(config.fingerprints_dir()),
            RunnerSettings::from_config(config),
        )
        .with_journal(ActionJournal::new(config.journal_file()))
    }
}
