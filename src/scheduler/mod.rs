//! State-assessment scheduler.
//!
//! Reads every story, decides the next action for each from the phase state
//! machine, enforces the review retry circuit breaker and picks the single
//! most urgent action.

pub mod action;
pub mod assess;
pub mod circuit_breaker;
pub mod priority;

pub use action::{ActionKind, RecommendedAction};
pub use assess::{ALERT_PRIORITY, Assessment, Scheduler, SchedulerSettings, StoryAssessment, next_action_kind};
pub use circuit_breaker::{effective_ceiling, sanitize};
pub use priority::PriorityModel;
