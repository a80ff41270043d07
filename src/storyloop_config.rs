//! Unified configuration for storyloop.
//!
//! Settings are read from `.storyloop/storyloop.toml` and layered
//! file → environment → CLI. Every section has defaults, so an empty or
//! missing file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! agent_cmd = "claude"
//! stories_dir = "stories"
//! conventions_file = "CONVENTIONS.md"
//!
//! [executor]
//! max_retries_per_task = 2
//! stop_on_first_failure = false
//! commit_after_each_task = true
//! dry_run = false
//! convention_max_chars = 4000
//! agent_timeout_secs = 900
//! unknown_failures_recoverable = true
//!
//! [retries]
//! max_retries = 3
//! max_retries_upper_bound = 999
//!
//! [fingerprint]
//! identical_error_threshold = 3
//!
//! [scheduler]
//! story_priority_weight = 10
//! default_story_priority = 3
//!
//! [[phases.review.groups]]
//! name = "reviewers"
//! composition = "parallel"
//! consensus = "required"
//! max_iterations = 3
//! agents = [
//!   { id = "security", role = "reviewer:security" },
//!   { id = "performance", role = "reviewer:performance" },
//! ]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::agents::AgentRole;
use crate::phase::Phase;
use crate::phase::groups::AgentGroupConfig;

/// Name of the per-project state directory.
pub const STORYLOOP_DIR: &str = ".storyloop";

/// Name of the configuration file inside [`STORYLOOP_DIR`].
pub const CONFIG_FILE: &str = "storyloop.toml";

/// Hard ceiling for any retry count or retry bound.
pub const RETRY_HARD_LIMIT: u32 = 999;

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Command used to launch the agent CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_cmd: Option<String>,
    /// Directory holding story markdown files, relative to the project root.
    #[serde(default = "default_stories_dir")]
    pub stories_dir: String,
    /// Project conventions fed to task agents.
    #[serde(default = "default_conventions_file")]
    pub conventions_file: String,
}

fn default_stories_dir() -> String {
    "stories".to_string()
}

fn default_conventions_file() -> String {
    "CONVENTIONS.md".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            agent_cmd: None,
            stories_dir: default_stories_dir(),
            conventions_file: default_conventions_file(),
        }
    }
}

/// Task dependency executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Retries allowed per task; a task gets this many retries after its first attempt.
    #[serde(default = "default_max_retries_per_task")]
    pub max_retries_per_task: u32,
    #[serde(default)]
    pub stop_on_first_failure: bool,
    #[serde(default = "default_true")]
    pub commit_after_each_task: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_convention_max_chars")]
    pub convention_max_chars: usize,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    /// Retry failures that match no known pattern.
    #[serde(default = "default_true")]
    pub unknown_failures_recoverable: bool,
}

fn default_max_retries_per_task() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_convention_max_chars() -> usize {
    4000
}

fn default_agent_timeout_secs() -> u64 {
    900
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_retries_per_task: default_max_retries_per_task(),
            stop_on_first_failure: false,
            commit_after_each_task: true,
            dry_run: false,
            convention_max_chars: default_convention_max_chars(),
            agent_timeout_secs: default_agent_timeout_secs(),
            unknown_failures_recoverable: true,
        }
    }
}

/// Story-level retry ceiling used by the circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetriesSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_retries_upper_bound")]
    pub max_retries_upper_bound: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_retries_upper_bound() -> u32 {
    RETRY_HARD_LIMIT
}

impl Default for RetriesSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_retries_upper_bound: default_max_retries_upper_bound(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintSection {
    #[serde(default = "default_identical_error_threshold")]
    pub identical_error_threshold: u32,
}

fn default_identical_error_threshold() -> u32 {
    crate::fingerprint::DEFAULT_IDENTICAL_ERROR_THRESHOLD
}

impl Default for FingerprintSection {
    fn default() -> Self {
        Self {
            identical_error_threshold: default_identical_error_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Multiplier applied to a story's declared priority.
    #[serde(default = "default_story_priority_weight")]
    pub story_priority_weight: i64,
    /// Priority assumed for stories that declare none.
    #[serde(default = "default_story_priority")]
    pub default_story_priority: i64,
}

/// Larger weights push effective priorities toward saturation.
pub const MAX_STORY_PRIORITY_WEIGHT: i64 = 1_000_000;

fn default_story_priority_weight() -> i64 {
    10
}

fn default_story_priority() -> i64 {
    3
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            story_priority_weight: default_story_priority_weight(),
            default_story_priority: default_story_priority(),
        }
    }
}

/// Agent groups configured for one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseSection {
    #[serde(default)]
    pub groups: Vec<AgentGroupConfig>,
}

/// Root of `.storyloop/storyloop.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryloopToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub retries: RetriesSection,
    #[serde(default)]
    pub fingerprint: FingerprintSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Keyed by phase name (`refine`, `research`, ..., `review`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub phases: BTreeMap<String, PhaseSection>,
}

impl StoryloopToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse storyloop.toml")
    }

    /// Load `<storyloop_dir>/storyloop.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(storyloop_dir: &Path) -> Result<Self> {
        let config_path = storyloop_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize storyloop.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent command (file → `STORYLOOP_AGENT_CMD` → `claude`).
    pub fn agent_cmd(&self) -> String {
        self.project
            .agent_cmd
            .clone()
            .or_else(|| std::env::var("STORYLOOP_AGENT_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Global retry ceiling; `STORYLOOP_MAX_RETRIES` overrides the file.
    pub fn max_retries(&self) -> u32 {
        std::env::var("STORYLOOP_MAX_RETRIES")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(self.retries.max_retries)
    }

    /// Upper bound for retry ceilings, itself held to [`RETRY_HARD_LIMIT`].
    pub fn max_retries_upper_bound(&self) -> u32 {
        self.retries.max_retries_upper_bound.min(RETRY_HARD_LIMIT)
    }

    /// Dry-run flag; `STORYLOOP_DRY_RUN` overrides the file.
    pub fn dry_run(&self) -> bool {
        match std::env::var("STORYLOOP_DRY_RUN") {
            Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
            Err(_) => self.executor.dry_run,
        }
    }

    /// Configured agent groups for a phase; empty means the default agent.
    pub fn phase_groups(&self, phase: Phase) -> &[AgentGroupConfig] {
        self.phases
            .get(phase.as_str())
            .map(|p| p.groups.as_slice())
            .unwrap_or(&[])
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.fingerprint.identical_error_threshold < 2 {
            warnings.push(format!(
                "identical_error_threshold {} is below 2: every failure will be treated as a loop",
                self.fingerprint.identical_error_threshold
            ));
        }

        if self.retries.max_retries_upper_bound > RETRY_HARD_LIMIT {
            warnings.push(format!(
                "max_retries_upper_bound {} exceeds {} and will be clamped",
                self.retries.max_retries_upper_bound, RETRY_HARD_LIMIT
            ));
        }

        if self.retries.max_retries > self.max_retries_upper_bound() {
            warnings.push(format!(
                "max_retries {} exceeds the upper bound {} and will be clamped",
                self.retries.max_retries,
                self.max_retries_upper_bound()
            ));
        }

        if !(0..=MAX_STORY_PRIORITY_WEIGHT).contains(&self.scheduler.story_priority_weight) {
            warnings.push(format!(
                "story_priority_weight {} is outside [0, {}]",
                self.scheduler.story_priority_weight, MAX_STORY_PRIORITY_WEIGHT
            ));
        }

        for (phase_name, section) in &self.phases {
            if phase_name.parse::<Phase>().is_err() {
                warnings.push(format!("Unknown phase '{}' in [phases]", phase_name));
                continue;
            }
            for group in &section.groups {
                if group.agents.is_empty() {
                    warnings.push(format!(
                        "Group '{}' in phase '{}' has no agents",
                        group.name, phase_name
                    ));
                }
                if group.max_iterations == 0 {
                    warnings.push(format!(
                        "Group '{}' in phase '{}' has max_iterations = 0",
                        group.name, phase_name
                    ));
                }
                for agent in &group.agents {
                    if let AgentRole::Unsupported(role) = AgentRole::parse(&agent.role) {
                        warnings.push(format!(
                            "Agent '{}' in phase '{}' has unsupported role '{}'",
                            agent.id, phase_name, role
                        ));
                    }
                }
            }
        }

        warnings
    }
}

/// Configuration merged from the TOML file, environment and CLI flags.
#[derive(Debug, Clone)]
pub struct StoryloopConfig {
    pub project_dir: PathBuf,
    pub storyloop_dir: PathBuf,
    pub toml: StoryloopToml,
    /// CLI override: verbose logging
    pub verbose: bool,
    /// CLI override: simulate task execution
    pub cli_dry_run: bool,
}

impl StoryloopConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let storyloop_dir = project_dir.join(STORYLOOP_DIR);
        let toml = StoryloopToml::load_or_default(&storyloop_dir)?;

        Ok(Self {
            project_dir,
            storyloop_dir,
            toml,
            verbose: false,
            cli_dry_run: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, dry_run: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_dry_run = dry_run;
        Ok(config)
    }

    pub fn agent_cmd(&self) -> String {
        self.toml.agent_cmd()
    }

    /// Dry run (CLI → env → file).
    pub fn dry_run(&self) -> bool {
        self.cli_dry_run || self.toml.dry_run()
    }

    pub fn config_file(&self) -> PathBuf {
        self.storyloop_dir.join(CONFIG_FILE)
    }

    pub fn stories_dir(&self) -> PathBuf {
        self.project_dir.join(&self.toml.project.stories_dir)
    }

    pub fn conventions_file(&self) -> PathBuf {
        self.project_dir.join(&self.toml.project.conventions_file)
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.storyloop_dir.join("progress")
    }

    pub fn fingerprints_dir(&self) -> PathBuf {
        self.storyloop_dir.join("fingerprints")
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.storyloop_dir.join("plans")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.storyloop_dir.join("logs")
    }

    pub fn journal_file(&self) -> PathBuf {
        self.storyloop_dir.join("journal.log")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::groups::{Composition, ConsensusMode};
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = StoryloopToml::parse("").unwrap();
        assert_eq!(config.executor.max_retries_per_task, 2);
        assert!(!config.executor.stop_on_first_failure);
        assert!(config.executor.commit_after_each_task);
        assert!(config.executor.unknown_failures_recoverable);
        assert_eq!(config.executor.convention_max_chars, 4000);
        assert_eq!(config.retries.max_retries, 3);
        assert_eq!(config.retries.max_retries_upper_bound, 999);
        assert_eq!(config.fingerprint.identical_error_threshold, 3);
        assert_eq!(config.scheduler.story_priority_weight, 10);
        assert_eq!(config.project.stories_dir, "stories");
        assert!(config.phases.is_empty());
    }

    #[test]
    fn test_parse_phase_groups() {
        let content = r#"
[[phases.review.groups]]
name = "reviewers"
composition = "parallel"
consensus = "required"
max_iterations = 2
agents = [
  { id = "security", role = "reviewer:security" },
  { id = "perf", role = "reviewer:performance", agent = "claude-fast" },
]
"#;
        let config = StoryloopToml::parse(content).unwrap();
        let groups = config.phase_groups(Phase::Review);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].composition, Composition::Parallel);
        assert_eq!(groups[0].consensus, ConsensusMode::Required);
        assert_eq!(groups[0].max_iterations, 2);
        assert_eq!(groups[0].agents[1].agent.as_deref(), Some("claude-fast"));
        assert!(config.phase_groups(Phase::Plan).is_empty());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validate_reports_problems() {
        let content = r#"
[fingerprint]
identical_error_threshold = 1

[retries]
max_retries = 5000
max_retries_upper_bound = 5000

[scheduler]
story_priority_weight = -5

[[phases.deploy.groups]]
name = "ops"
agents = []

[[phases.plan.groups]]
name = "planners"
max_iterations = 0
agents = [{ id = "bard", role = "poet" }]
"#;
        let config = StoryloopToml::parse(content).unwrap();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("identical_error_threshold")));
        assert!(warnings.iter().any(|w| w.contains("exceeds 999")));
        assert!(warnings.iter().any(|w| w.contains("Unknown phase 'deploy'")));
        assert!(warnings.iter().any(|w| w.contains("max_iterations = 0")));
        assert!(warnings.iter().any(|w| w.contains("unsupported role 'poet'")));
        assert!(warnings.iter().any(|w| w.contains("story_priority_weight -5")));
        assert_eq!(config.max_retries_upper_bound(), RETRY_HARD_LIMIT);
    }

    #[test]
    fn test_parse_invalid_toml_fails() {
        let result = StoryloopToml::parse("[executor\nmax_retries_per_task = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = StoryloopToml::default();
        config.executor.stop_on_first_failure = true;
        config.retries.max_retries = 7;
        config.save(&path).unwrap();

        let loaded = StoryloopToml::load(&path).unwrap();
        assert!(loaded.executor.stop_on_first_failure);
        assert_eq!(loaded.retries.max_retries, 7);
    }

    #[test]
    fn test_env_overrides_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = StoryloopToml::parse("[retries]\nmax_retries = 4\n").unwrap();

        unsafe { std::env::set_var("STORYLOOP_MAX_RETRIES", "9") };
        assert_eq!(config.max_retries(), 9);
        unsafe { std::env::set_var("STORYLOOP_MAX_RETRIES", "not-a-number") };
        assert_eq!(config.max_retries(), 4);
        unsafe { std::env::remove_var("STORYLOOP_MAX_RETRIES") };
        assert_eq!(config.max_retries(), 4);

        unsafe { std::env::set_var("STORYLOOP_DRY_RUN", "true") };
        assert!(config.dry_run());
        unsafe { std::env::remove_var("STORYLOOP_DRY_RUN") };
        assert!(!config.dry_run());
    }

    #[test]
    fn test_agent_cmd_file_wins_over_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = StoryloopToml::parse("[project]\nagent_cmd = \"my-agent\"\n").unwrap();
        unsafe { std::env::set_var("STORYLOOP_AGENT_CMD", "other") };
        assert_eq!(config.agent_cmd(), "my-agent");
        unsafe { std::env::remove_var("STORYLOOP_AGENT_CMD") };
    }

    #[test]
    fn test_storyloop_config_paths_and_cli_override() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STORYLOOP_DIR)).unwrap();
        std::fs::write(
            dir.path().join(STORYLOOP_DIR).join(CONFIG_FILE),
            "[project]\nstories_dir = \"docs/stories\"\n",
        )
        .unwrap();

        let config = StoryloopConfig::with_cli_args(dir.path().to_path_buf(), true, true).unwrap();
        assert!(config.verbose);
        assert!(config.dry_run());
        assert!(config.stories_dir().ends_with("docs/stories"));
        assert!(config.progress_dir().ends_with(".storyloop/progress"));
        assert!(config.fingerprints_dir().ends_with(".storyloop/fingerprints"));
        assert!(config.plans_dir().ends_with(".storyloop/plans"));
    }
}
