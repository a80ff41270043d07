//! Agent backed by a command-line LLM client (`claude --print` by default).

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{AgentInvoker, AgentRequest, AgentResponse};
use crate::vcs::{GitCli, VersionControl};

const DEFAULT_TIMEOUT_SECS: u64 = 900;

static TRANSIENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)rate.?limit|overloaded|too many requests|\b429\b|\b50[234]\b|timed? ?out|ECONNRESET|ECONNREFUSED|ETIMEDOUT|network error|connection (reset|refused|closed)",
    )
    .expect("transient pattern must compile")
});

/// Whether failure text looks like a provider or network hiccup.
pub fn is_transient_error(text: &str) -> bool {
    TRANSIENT_REGEX.is_match(text)
}

#[derive(Debug, Clone)]
pub struct CliAgentConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    /// Compare dirty-file contents around the invocation to find changed files.
    pub track_changes: bool,
}

impl Default for CliAgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "--print".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            working_dir: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            track_changes: true,
        }
    }
}

impl CliAgentConfig {
    pub fn with_command(mut self, cmd: &str) -> Self {
        self.command = cmd.to_string();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_track_changes(mut self, track: bool) -> Self {
        self.track_changes = track;
        self
    }
}

/// Runs the configured command with the prompt on stdin.
pub struct CliAgent {
    name: String,
    config: CliAgentConfig,
}

impl CliAgent {
    pub fn new(name: impl Into<String>, config: CliAgentConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    async fn snapshot(&self, dir: &Option<PathBuf>) -> Option<Snapshot> {
        if !self.config.track_changes {
            return None;
        }
        let dir = dir.as_ref()?;
        match dirty_digests(dir).await {
            Ok(digests) => Some(digests),
            Err(e) => {
                debug!(agent = %self.name, error = %e, "change tracking unavailable");
                None
            }
        }
    }

    async fn files_changed(&self, dir: &Option<PathBuf>, before: Option<Snapshot>) -> Vec<String> {
        match (before, self.snapshot(dir).await) {
            (Some(before), Some(after)) => touched_between(&before, &after),
            _ => Vec::new(),
        }
    }
}

/// Dirty path to content digest; `None` for deleted paths.
type Snapshot = BTreeMap<String, Option<String>>;

async fn dirty_digests(dir: &Path) -> Result<Snapshot> {
    let mut digests = Snapshot::new();
    for file in GitCli::new(dir).changed_files().await? {
        let digest = tokio::fs::read(dir.join(&file))
            .await
            .ok()
            .map(|bytes| format!("{:x}", Sha256::digest(&bytes)));
        digests.insert(file, digest);
    }
    Ok(digests)
}

/// Paths dirty after the run whose content differs from before it. A file
/// that was already dirty still counts when the run rewrote it.
fn touched_between(before: &Snapshot, after: &Snapshot) -> Vec<String> {
    after
        .iter()
        .filter(|(path, digest)| before.get(*path) != Some(*digest))
        .map(|(path, _)| path.clone())
        .collect()
}

#[async_trait]
impl AgentInvoker for CliAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let working_dir = request
            .working_dir
            .clone()
            .or_else(|| self.config.working_dir.clone());
        let before = self.snapshot(&working_dir).await;

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        if let Some(ref dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(agent = %self.name, label = %request.label, "spawning agent");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn agent command '{}'", self.config.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .context("Failed to write prompt to stdin")?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let mut stdout = child.stdout.take().context("Failed to get stdout")?;
        let mut stderr = child.stderr.take().context("Failed to get stderr")?;

        let run = async {
            let mut out = String::new();
            let mut err = String::new();
            let (out_res, err_res) = tokio::join!(
                stdout.read_to_string(&mut out),
                stderr.read_to_string(&mut err)
            );
            out_res.context("Failed to read agent stdout")?;
            err_res.context("Failed to read agent stderr")?;
            let status = child.wait().await.context("Failed to wait for agent")?;
            Ok::<_, anyhow::Error>((status, out, err))
        };

        let finished = tokio::time::timeout(self.config.timeout, run).await;
        let (status, output, stderr_text) = match finished {
            Ok(result) => result?,
            Err(_) => {
                warn!(agent = %self.name, label = %request.label, "agent timed out");
                if let Err(e) = child.kill().await {
                    debug!(agent = %self.name, error = %e, "failed to kill timed-out agent");
                }
                let files_changed = self.files_changed(&working_dir, before).await;
                return Ok(AgentResponse::failed(format!(
                    "Agent timed out after {}s",
                    self.config.timeout.as_secs()
                ))
                .transient()
                .with_files(files_changed));
            }
        };

        let files_changed = self.files_changed(&working_dir, before).await;

        if status.success() {
            return Ok(AgentResponse::succeeded(output).with_files(files_changed));
        }

        let error = if stderr_text.trim().is_empty() {
            format!(
                "Agent exited with code {}",
                status.code().map_or("unknown".to_string(), |c| c.to_string())
            )
        } else {
            stderr_text.trim().to_string()
        };
        let mut response = AgentResponse::failed(error)
            .with_output(output)
            .with_files(files_changed);
        if is_transient_error(&response.failure_text()) {
            response = response.transient();
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_detection() {
        assert!(is_transient_error("API error: 429 Too Many Requests"));
        assert!(is_transient_error("Overloaded, please retry"));
        assert!(is_transient_error("request timed out"));
        assert!(!is_transient_error("tests failed: 3 assertions"));
    }

    #[test]
    fn test_config_builder() {
        let config = CliAgentConfig::default()
            .with_command("my-agent")
            .with_args(vec!["-p".to_string()])
            .with_timeout(Duration::from_secs(5))
            .with_track_changes(false);
        assert_eq!(config.command, "my-agent");
        assert_eq!(config.args, vec!["-p"]);
        assert_eq!(config.timeout.as_secs(), 5);
        assert!(!config.track_changes);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_echoes_prompt() {
        let agent = CliAgent::new(
            "cat",
            CliAgentConfig::default()
                .with_command("cat")
                .with_args(Vec::new())
                .with_track_changes(false),
        );
        let response = agent
            .invoke(&AgentRequest::new("t", "hello agent"))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.output, "hello agent");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_reports_failure() {
        let agent = CliAgent::new(
            "false",
            CliAgentConfig::default()
                .with_command("false")
                .with_args(Vec::new())
                .with_track_changes(false),
        );
        let response = agent.invoke(&AgentRequest::new("t", "")).await.unwrap();
        assert!(!response.success);
        assert!(response.failure_text().contains("exited with code 1"));
        assert!(!response.transient);
    }

    #[test]
    fn test_touched_between_includes_rewritten_dirty_files() {
        let before = Snapshot::from([
            ("login.ts".to_string(), Some("aaa".to_string())),
            ("notes.md".to_string(), Some("bbb".to_string())),
        ]);
        let after = Snapshot::from([
            ("login.ts".to_string(), Some("ccc".to_string())),
            ("notes.md".to_string(), Some("bbb".to_string())),
            ("old.ts".to_string(), None),
        ]);
        assert_eq!(touched_between(&before, &after), vec!["login.ts", "old.ts"]);
    }

    #[cfg(unix)]
    fn shell_agent(dir: &Path, script: &str) -> CliAgent {
        CliAgent::new(
            "sh",
            CliAgentConfig::default()
                .with_command("sh")
                .with_args(vec!["-c".to_string(), script.to_string()])
                .with_working_dir(dir.to_path_buf()),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_retry_reports_file_dirtied_by_previous_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let status = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());

        let first = shell_agent(dir.path(), "echo one >> login.ts; exit 1")
            .invoke(&AgentRequest::new("t", ""))
            .await
            .unwrap();
        assert!(!first.success);
        assert_eq!(first.files_changed, vec!["login.ts"]);

        let second = shell_agent(dir.path(), "echo two >> login.ts")
            .invoke(&AgentRequest::new("t", ""))
            .await
            .unwrap();
        assert!(second.success);
        assert_eq!(second.files_changed, vec!["login.ts"]);

        let idle = shell_agent(dir.path(), "true")
            .invoke(&AgentRequest::new("t", ""))
            .await
            .unwrap();
        assert!(idle.files_changed.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_reports_files_written_so_far() {
        let dir = tempfile::tempdir().unwrap();
        let status = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());

        let agent = CliAgent::new(
            "slow",
            CliAgentConfig::default()
                .with_command("sh")
                .with_args(vec!["-c".to_string(), "echo x > draft.ts; sleep 5".to_string()])
                .with_working_dir(dir.path().to_path_buf())
                .with_timeout(Duration::from_millis(500)),
        );
        let response = agent.invoke(&AgentRequest::new("t", "")).await.unwrap();
        assert!(!response.success);
        assert!(response.transient);
        assert_eq!(response.files_changed, vec!["draft.ts"]);
    }

    #[tokio::test]
    async fn test_missing_command_is_an_error() {
        let agent = CliAgent::new(
            "missing",
            CliAgentConfig::default()
                .with_command("storyloop-no-such-binary")
                .with_track_changes(false),
        );
        assert!(agent.invoke(&AgentRequest::new("t", "x")).await.is_err());
    }
}
