//! Task result classification.
//!
//! Turns one agent attempt into success, a recoverable failure (retry the
//! task) or an unrecoverable failure (mark it failed). Structural problems win
//! over transient ones: a scope violation that also timed out is still a
//! scope violation.

use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use storyloop_common::Task;

use crate::agents::{AgentResponse, is_transient_error};

static UNMET_DEPENDENCY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(unmet dependenc|dependency .{0,40}(not (been )?(completed|implemented|met)|missing)|requires? task \S+ (to be )?(completed|done) first|blocked by task)",
    )
    .expect("valid regex")
});

static IMPOSSIBLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(impossible|cannot be (done|implemented|completed)|not possible to|contradictory requirements|mutually exclusive|out of scope for this task)",
    )
    .expect("valid regex")
});

static TIMEOUT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(timed? ?out|timeout|deadline exceeded|took too long)").expect("valid regex")
});

static VERIFICATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(tests? (failed|failing)|failing tests?|assertion (failed|error)|lint(ing)? (failed|errors?)|build failed|compil(e|ation) (error|failed)|type ?check(ing)? failed|verification failed)",
    )
    .expect("valid regex")
});

static NEEDS_DEPENDENCY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(needs? (a |an |the )?(package|dependency|module|library)|missing (package|module|dependency)|cannot find module|module not found|no such (module|package)|unresolved import)",
    )
    .expect("valid regex")
});

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The attempt number is past the retry ceiling.
    CeilingExceeded { attempt: u32, max_retries: u32 },
    UnmetDependency,
    Impossible,
    /// Files outside the declared scope were modified.
    ScopeViolation { files: Vec<String> },
    Timeout,
    Transient,
    Verification,
    NeedsDependency,
    Unknown,
    /// The same normalized error repeated past the fingerprint threshold.
    RepeatedFailure { consecutive: u32 },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::CeilingExceeded {
                attempt,
                max_retries,
            } => write!(
                f,
                "retry ceiling exceeded (attempt {} of {} allowed)",
                attempt,
                max_retries + 1
            ),
            FailureKind::UnmetDependency => write!(f, "unmet dependency"),
            FailureKind::Impossible => write!(f, "task is not achievable as specified"),
            FailureKind::ScopeViolation { files } => {
                write!(f, "modified files outside declared scope: {}", files.join(", "))
            }
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Transient => write!(f, "transient provider error"),
            FailureKind::Verification => write!(f, "verification failed"),
            FailureKind::NeedsDependency => write!(f, "needs an unresolved dependency"),
            FailureKind::Unknown => write!(f, "unknown failure"),
            FailureKind::RepeatedFailure { consecutive } => {
                write!(f, "repeating identical failure ({} in a row)", consecutive)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Recoverable(FailureKind),
    Unrecoverable(FailureKind),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success)
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, TaskOutcome::Recoverable(_))
    }

    pub fn kind(&self) -> Option<&FailureKind> {
        match self {
            TaskOutcome::Success => None,
            TaskOutcome::Recoverable(kind) | TaskOutcome::Unrecoverable(kind) => Some(kind),
        }
    }
}

/// Knobs for [`evaluate_task_result`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries_per_task: u32,
    /// Whether failures matching no known pattern are retried.
    pub unknown_failures_recoverable: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_task: 2,
            unknown_failures_recoverable: true,
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches("./");
    trimmed.trim_end_matches('/').replace('\\', "/")
}

/// Whether `file` is covered by one declared scope entry: an exact path, a
/// directory prefix, or a glob pattern.
fn in_scope_entry(file: &str, entry: &str) -> bool {
    let file = normalize_path(file);
    let entry = normalize_path(entry);
    if entry.is_empty() {
        return false;
    }
    if file == entry {
        return true;
    }
    if entry.contains(['*', '?', '[']) {
        return glob::Pattern::new(&entry)
            .map(|p| p.matches_path(Path::new(&file)))
            .unwrap_or(false);
    }
    file.starts_with(&format!("{}/", entry))
}

/// Whether `file` lies within the task's declared scope. A task with no
/// declared files is unrestricted.
pub fn is_in_scope(task: &Task, file: &str) -> bool {
    task.files.is_empty() || task.files.iter().any(|entry| in_scope_entry(file, entry))
}

/// Files in `changed` that fall outside the task's scope.
pub fn out_of_scope_files(task: &Task, changed: &[String]) -> Vec<String> {
    changed
        .iter()
        .filter(|f| !is_in_scope(task, f))
        .cloned()
        .collect()
}

/// Classify one attempt (`attempt` is 1-based).
pub fn evaluate_task_result(
    task: &Task,
    response: &AgentResponse,
    attempt: u32,
    policy: &RetryPolicy,
) -> TaskOutcome {
    // Stray files on a successful run abort the commit, not the task.
    if response.success {
        return TaskOutcome::Success;
    }

    if attempt > policy.max_retries_per_task {
        return TaskOutcome::Unrecoverable(FailureKind::CeilingExceeded {
            attempt,
            max_retries: policy.max_retries_per_task,
        });
    }

    let text = response.failure_text();

    if UNMET_DEPENDENCY_REGEX.is_match(&text) {
        return TaskOutcome::Unrecoverable(FailureKind::UnmetDependency);
    }
    if IMPOSSIBLE_REGEX.is_match(&text) {
        return TaskOutcome::Unrecoverable(FailureKind::Impossible);
    }
    let stray = out_of_scope_files(task, &response.files_changed);
    if !stray.is_empty() {
        return TaskOutcome::Unrecoverable(FailureKind::ScopeViolation { files: stray });
    }

    if TIMEOUT_REGEX.is_match(&text) {
        return TaskOutcome::Recoverable(FailureKind::Timeout);
    }
    if response.transient || is_transient_error(&text) {
        return TaskOutcome::Recoverable(FailureKind::Transient);
    }
    if VERIFICATION_REGEX.is_match(&text) {
        return TaskOutcome::Recoverable(FailureKind::Verification);
    }
    if NEEDS_DEPENDENCY_REGEX.is_match(&text) {
        return TaskOutcome::Recoverable(FailureKind::NeedsDependency);
    }

    if policy.unknown_failures_recoverable {
        TaskOutcome::Recoverable(FailureKind::Unknown)
    } else {
        TaskOutcome::Unrecoverable(FailureKind::Unknown)
    }
}
