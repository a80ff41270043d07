//! Version control used to commit completed tasks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// The subset of version control the task executor needs.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Stage exactly these paths.
    async fn add(&self, files: &[String]) -> Result<()>;

    /// Paths currently staged for commit.
    async fn staged_files(&self) -> Result<Vec<String>>;

    /// Remove these paths from the index without touching the working tree.
    async fn unstage(&self, files: &[String]) -> Result<()>;

    /// Commit the index; returns the new commit id.
    async fn commit(&self, message: &str) -> Result<String>;

    /// Paths with uncommitted modifications, staged or not, plus untracked files.
    async fn changed_files(&self) -> Result<Vec<String>>;
}

/// `git` invoked as a subprocess in a working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    work_dir: PathBuf,
}

impl GitCli {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.first().unwrap_or(&"")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn add(&self, files: &[String]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(files.iter().map(String::as_str));
        self.git(&args).await?;
        Ok(())
    }

    async fn staged_files(&self) -> Result<Vec<String>> {
        let out = self.git(&["diff", "--cached", "--name-only"]).await?;
        Ok(non_empty_lines(&out))
    }

    async fn unstage(&self, files: &[String]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["reset", "-q", "--"];
        args.extend(files.iter().map(String::as_str));
        self.git(&args).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String> {
        self.git(&["commit", "-m", message]).await?;
        let head = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(head.trim().to_string())
    }

    async fn changed_files(&self) -> Result<Vec<String>> {
        let out = self
            .git(&["status", "--porcelain", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain(&out))
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Paths from `git status --porcelain` output; renames yield the new path.
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            let path = path.rsplit_once(" -> ").map_or(path, |(_, new)| new);
            path.trim().trim_matches('"').to_string()
        })
        .collect()
}
