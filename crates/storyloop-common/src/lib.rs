//! Shared domain types for storyloop.
//!
//! These types are the persisted and exchanged data model of the orchestrator:
//! stories and their review history, implementation-plan tasks, and the
//! outputs agents produce during a phase. They carry no I/O; loading and
//! saving live in the `storyloop` crate.

pub mod agent;
pub mod lenient;
pub mod story;
pub mod task;

pub use agent::{AgentOutput, Concern, ConsensusResult, Severity};
pub use story::{ReviewDecision, ReviewEntry, Story, StoryStatus};
pub use task::{Task, TaskStatus};

/// Error returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
