//! Task dependency executor: runs a story's implementation plan as a DAG of
//! isolated agent invocations.

pub mod classify;
pub mod context;
pub mod executor;
pub mod graph;
pub mod plan;
pub mod progress;

pub use classify::{FailureKind, RetryPolicy, TaskOutcome, evaluate_task_result};
pub use context::TaskContext;
pub use executor::{ExecutionSummary, TaskExecutor, TaskExecutorConfig, TaskFailure};
pub use graph::get_next_task;
pub use plan::Plan;
pub use progress::{FileProgressStore, StoryProgress, TaskProgressStore, TaskRecord};
