//! Task dependency executor.
//!
//! Runs one story's implementation plan to completion: picks the next
//! runnable task, hands it to the implementing agent with a minimal context,
//! classifies the result, persists the new status and commits the task's
//! files. Statuses are written after every transition so a killed run picks
//! up its `in_progress` tasks on the next invocation.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use storyloop_common::{Story, Task, TaskStatus};
use tracing::{debug, info, warn};

use super::classify::{FailureKind, RetryPolicy, TaskOutcome, evaluate_task_result, out_of_scope_files};
use super::context::TaskContext;
use super::graph;
use super::plan::Plan;
use super::progress::TaskProgressStore;
use crate::agents::{AgentInvoker, AgentRequest, AgentResponse};
use crate::errors::OrchestratorError;
use crate::fingerprint::{DEFAULT_IDENTICAL_ERROR_THRESHOLD, FingerprintHistory};
use crate::storyloop_config::StoryloopConfig;
use crate::vcs::VersionControl;

/// Longest failure text kept in progress records and summaries.
const MAX_ERROR_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct TaskExecutorConfig {
    pub max_retries_per_task: u32,
    pub stop_on_first_failure: bool,
    pub commit_after_each_task: bool,
    pub dry_run: bool,
    pub convention_max_chars: usize,
    pub unknown_failures_recoverable: bool,
    pub identical_error_threshold: u32,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries_per_task: 2,
            stop_on_first_failure: false,
            commit_after_each_task: true,
            dry_run: false,
            convention_max_chars: 4000,
            unknown_failures_recoverable: true,
            identical_error_threshold: DEFAULT_IDENTICAL_ERROR_THRESHOLD,
        }
    }
}

impl TaskExecutorConfig {
    pub fn from_config(config: &StoryloopConfig) -> Self {
        let toml = &config.toml;
        Self {
            max_retries_per_task: toml.executor.max_retries_per_task,
            stop_on_first_failure: toml.executor.stop_on_first_failure,
            commit_after_each_task: toml.executor.commit_after_each_task,
            dry_run: config.dry_run(),
            convention_max_chars: toml.executor.convention_max_chars,
            unknown_failures_recoverable: toml.executor.unknown_failures_recoverable,
            identical_error_threshold: toml.fingerprint.identical_error_threshold,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_stop_on_first_failure(mut self, stop: bool) -> Self {
        self.stop_on_first_failure = stop;
        self
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries_per_task: self.max_retries_per_task,
            unknown_failures_recoverable: self.unknown_failures_recoverable,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub task_id: String,
    pub error: String,
    pub attempts: u32,
}

/// What one `run` did.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub story_id: String,
    pub completed: usize,
    pub failed: usize,
    pub remaining: usize,
    pub failures: Vec<TaskFailure>,
    pub agent_invocations: u32,
    /// Commit ids created, in order.
    pub commits: Vec<String>,
    /// Whether `stop_on_first_failure` ended the run early.
    pub halted: bool,
    pub warnings: Vec<String>,
    /// Execution order computed in dry-run mode.
    pub dry_run_order: Vec<String>,
}

impl ExecutionSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.remaining == 0
    }

    /// Single-paragraph description of the failures, for review feedback and
    /// fingerprinting.
    pub fn failure_text(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.task_id, f.error))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, PartialEq)]
enum CommitResult {
    Committed(String),
    NothingToCommit,
    Aborted(Vec<String>),
}

pub struct TaskExecutor {
    agent: Arc<dyn AgentInvoker>,
    vcs: Arc<dyn VersionControl>,
    progress: Arc<dyn TaskProgressStore>,
    config: TaskExecutorConfig,
    working_dir: PathBuf,
}

fn truncate_error(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_CHARS {
        return text.trim().to_string();
    }
    let kept: String = text.chars().take(MAX_ERROR_CHARS).collect();
    format!("{}...", kept.trim_end())
}

fn progress_error(story_id: &str, source: anyhow::Error) -> OrchestratorError {
    OrchestratorError::Progress {
        story_id: story_id.to_string(),
        source,
    }
}

impl TaskExecutor {
    pub fn new(
        agent: Arc<dyn AgentInvoker>,
        vcs: Arc<dyn VersionControl>,
        progress: Arc<dyn TaskProgressStore>,
        config: TaskExecutorConfig,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agent,
            vcs,
            progress,
            config,
            working_dir: working_dir.into(),
        }
    }

    pub fn config(&self) -> &TaskExecutorConfig {
        &self.config
    }

    /// Execute `plan` for `story`.
    ///
    /// Returns `Err` only for structural problems (invalid plan, circular
    /// dependency, progress I/O); task failures are reported in the summary.
    pub async fn run(
        &self,
        story: &Story,
        plan: &Plan,
        conventions: Option<&str>,
    ) -> Result<ExecutionSummary, OrchestratorError> {
        plan.validate()?;
        let story_id = story.id.as_str();

        if self.config.dry_run {
            return self.dry_run(story_id, plan);
        }

        let progress = self
            .progress
            .init_progress(story_id, &plan.task_ids())
            .map_err(|e| progress_error(story_id, e))?;

        let mut tasks: Vec<Task> = plan.tasks.clone();
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut last_error: HashMap<String, String> = HashMap::new();
        for task in &mut tasks {
            if let Some(record) = progress.record(&task.id) {
                task.status = record.status;
                attempts.insert(task.id.clone(), record.attempts);
                if let Some(err) = &record.error {
                    last_error.insert(task.id.clone(), err.clone());
                }
            }
        }

        let mut summary = ExecutionSummary {
            story_id: story_id.to_string(),
            ..Default::default()
        };

        // Failures from an earlier run still block their dependents.
        let already_failed: Vec<String> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.id.clone())
            .collect();
        for id in already_failed {
            self.propagate_failure(story_id, &mut tasks, &id, &mut summary)?;
        }

        let policy = self.config.policy();
        let mut histories: HashMap<String, FingerprintHistory> = HashMap::new();
        // Files touched across all attempts of a task in this run.
        let mut touched: HashMap<String, BTreeSet<String>> = HashMap::new();

        info!(story_id, tasks = tasks.len(), "starting task execution");

        loop {
            let Some(next) = graph::next_or_cycle(story_id, &tasks)? else {
                break;
            };
            let task = next.clone();
            let attempt = attempts.get(&task.id).copied().unwrap_or(0) + 1;
            attempts.insert(task.id.clone(), attempt);

            if task.status == TaskStatus::Pending {
                set_status(&mut tasks, &task.id, TaskStatus::InProgress);
            }
            self.progress
                .update_progress(
                    story_id,
                    &task.id,
                    TaskStatus::InProgress,
                    last_error.get(&task.id).map(String::as_str),
                    attempt - 1,
                )
                .map_err(|e| progress_error(story_id, e))?;

            info!(story_id, task_id = %task.id, attempt, "running task");
            let context = TaskContext::build(
                story,
                &task,
                &self.working_dir,
                conventions,
                self.config.convention_max_chars,
            )
            .with_previous_error(last_error.get(&task.id).cloned());
            let request = AgentRequest::new(format!("{}:{}", story_id, task.id), context.to_prompt())
                .with_working_dir(&self.working_dir);

            let response = match self.agent.invoke(&request).await {
                Ok(response) => response,
                Err(e) => AgentResponse::failed(format!("{:#}", e)),
            };
            summary.agent_invocations += 1;
            touched
                .entry(task.id.clone())
                .or_default()
                .extend(response.files_changed.iter().cloned());

            let mut outcome = evaluate_task_result(&task, &response, attempt, &policy);
            if outcome.is_recoverable() {
                let check = histories
                    .entry(task.id.clone())
                    .or_default()
                    .check_for_identical_errors(&response.failure_text(), self.config.identical_error_threshold);
                if check.is_looping {
                    warn!(story_id, task_id = %task.id, consecutive = check.consecutive, "identical failure repeating");
                    outcome = TaskOutcome::Unrecoverable(FailureKind::RepeatedFailure {
                        consecutive: check.consecutive,
                    });
                }
            }

            match outcome {
                TaskOutcome::Success => {
                    set_status(&mut tasks, &task.id, TaskStatus::Completed);
                    self.progress
                        .update_progress(story_id, &task.id, TaskStatus::Completed, None, attempt)
                        .map_err(|e| progress_error(story_id, e))?;
                    info!(story_id, task_id = %task.id, attempt, "task completed");

                    if self.config.commit_after_each_task {
                        let files: Vec<String> = touched
                            .remove(&task.id)
                            .unwrap_or_default()
                            .into_iter()
                            .collect();
                        self.record_commit(story, &task, &files, &mut summary).await;
                    }
                }
                TaskOutcome::Recoverable(kind) => {
                    let error = truncate_error(&response.failure_text());
                    warn!(story_id, task_id = %task.id, attempt, kind = %kind, "task failed, will retry");
                    self.progress
                        .update_progress(story_id, &task.id, TaskStatus::InProgress, Some(&error), attempt)
                        .map_err(|e| progress_error(story_id, e))?;
                    last_error.insert(task.id.clone(), error);
                }
                TaskOutcome::Unrecoverable(kind) => {
                    let detail = response.failure_text();
                    let error = if detail.trim().is_empty() {
                        kind.to_string()
                    } else {
                        truncate_error(&format!("{}: {}", kind, detail.trim()))
                    };
                    warn!(story_id, task_id = %task.id, attempt, kind = %kind, "task failed");
                    set_status(&mut tasks, &task.id, TaskStatus::Failed);
                    self.progress
                        .update_progress(story_id, &task.id, TaskStatus::Failed, Some(&error), attempt)
                        .map_err(|e| progress_error(story_id, e))?;
                    summary.failures.push(TaskFailure {
                        task_id: task.id.clone(),
                        error,
                        attempts: attempt,
                    });
                    self.propagate_failure(story_id, &mut tasks, &task.id, &mut summary)?;

                    if self.config.stop_on_first_failure {
                        info!(story_id, task_id = %task.id, "stopping on first failure");
                        summary.halted = true;
                        break;
                    }
                }
            }
        }

        summary.completed = count(&tasks, TaskStatus::Completed);
        summary.failed = count(&tasks, TaskStatus::Failed);
        summary.remaining = tasks.len() - summary.completed - summary.failed;

        info!(
            story_id,
            completed = summary.completed,
            failed = summary.failed,
            remaining = summary.remaining,
            invocations = summary.agent_invocations,
            "task execution finished"
        );
        Ok(summary)
    }

    fn dry_run(&self, story_id: &str, plan: &Plan) -> Result<ExecutionSummary, OrchestratorError> {
        let mut tasks = plan.tasks.clone();
        if let Ok(progress) = self.progress.get_progress(story_id) {
            for task in &mut tasks {
                if progress.status_of(&task.id) == Some(TaskStatus::Completed) {
                    task.status = TaskStatus::Completed;
                }
            }
        }
        let order = graph::simulate_order(story_id, &tasks)?;
        let completed = count(&tasks, TaskStatus::Completed);
        info!(story_id, order = ?order, "dry run");
        Ok(ExecutionSummary {
            story_id: story_id.to_string(),
            completed,
            remaining: order.len(),
            dry_run_order: order,
            ..Default::default()
        })
    }

    /// Fail every task waiting on `failed_id` without calling the agent.
    fn propagate_failure(
        &self,
        story_id: &str,
        tasks: &mut [Task],
        failed_id: &str,
        summary: &mut ExecutionSummary,
    ) -> Result<(), OrchestratorError> {
        for id in graph::dependents_of(tasks, failed_id) {
            let error = format!("dependency {} failed", failed_id);
            debug!(story_id, task_id = %id, %error, "propagating failure");
            set_status(tasks, &id, TaskStatus::Failed);
            self.progress
                .update_progress(story_id, &id, TaskStatus::Failed, Some(&error), 0)
                .map_err(|e| progress_error(story_id, e))?;
            summary.failures.push(TaskFailure {
                task_id: id,
                error,
                attempts: 0,
            });
        }
        Ok(())
    }

    async fn record_commit(
        &self,
        story: &Story,
        task: &Task,
        files: &[String],
        summary: &mut ExecutionSummary,
    ) {
        match self.commit_task(story, task, files).await {
            Ok(CommitResult::Committed(id)) => {
                info!(story_id = %story.id, task_id = %task.id, commit = %id, "committed task");
                summary.commits.push(id);
            }
            Ok(CommitResult::NothingToCommit) => {
                debug!(story_id = %story.id, task_id = %task.id, "no changes to commit");
            }
            Ok(CommitResult::Aborted(stray)) => {
                let message = format!(
                    "Commit for task {} aborted: files outside declared scope: {}",
                    task.id,
                    stray.join(", ")
                );
                warn!(story_id = %story.id, task_id = %task.id, "{}", message);
                summary.warnings.push(message);
            }
            Err(e) => {
                let message = format!("Commit for task {} failed: {}", task.id, e);
                warn!(story_id = %story.id, task_id = %task.id, "{}", message);
                summary.warnings.push(message);
            }
        }
    }

    /// Stage and commit exactly the task's changed files.
    async fn commit_task(
        &self,
        story: &Story,
        task: &Task,
        files: &[String],
    ) -> Result<CommitResult, OrchestratorError> {
        let vcs_error = |e: anyhow::Error| OrchestratorError::Vcs(format!("{:#}", e));

        let stray = out_of_scope_files(task, files);
        if !stray.is_empty() {
            return Ok(CommitResult::Aborted(stray));
        }
        if files.is_empty() {
            return Ok(CommitResult::NothingToCommit);
        }

        self.vcs.add(files).await.map_err(vcs_error)?;
        let staged = self.vcs.staged_files().await.map_err(vcs_error)?;
        let stray = out_of_scope_files(task, &staged);
        if !stray.is_empty() {
            self.vcs.unstage(files).await.map_err(vcs_error)?;
            return Ok(CommitResult::Aborted(stray));
        }

        let message = format!(
            "feat({}): Complete task {} - {}",
            story.id, task.id, task.description
        );
        let id = self.vcs.commit(&message).await.map_err(vcs_error)?;
        Ok(CommitResult::Committed(id))
    }
}

fn set_status(tasks: &mut [Task], id: &str, status: TaskStatus) {
    if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
        task.status = status;
    }
}

fn count(tasks: &[Task], status: TaskStatus) -> usize {
    tasks.iter().filter(|t| t.status == status).count()
}
