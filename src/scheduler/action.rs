use serde::Serialize;
use std::fmt;

use crate::phase::Phase;

/// Kind of work the scheduler can recommend for a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Refine,
    Research,
    Plan,
    PlanReview,
    Implement,
    Review,
    /// Address the latest review's requested changes.
    Rework,
    CreatePr,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refine => "refine",
            Self::Research => "research",
            Self::Plan => "plan",
            Self::PlanReview => "plan_review",
            Self::Implement => "implement",
            Self::Review => "review",
            Self::Rework => "rework",
            Self::CreatePr => "create_pr",
        }
    }

    /// Inherent urgency; lower runs sooner. Work closer to shipping wins.
    pub fn base_priority(&self) -> i64 {
        match self {
            Self::CreatePr => 5,
            Self::Review => 10,
            Self::Rework => 15,
            Self::Implement => 20,
            Self::PlanReview => 30,
            Self::Plan => 35,
            Self::Research => 40,
            Self::Refine => 50,
        }
    }

    pub fn from_phase(phase: Phase) -> Self {
        match phase {
            Phase::Refine => Self::Refine,
            Phase::Research => Self::Research,
            Phase::Plan => Self::Plan,
            Phase::PlanReview => Self::PlanReview,
            Phase::Implement => Self::Implement,
            Phase::Review => Self::Review,
        }
    }

    /// The lifecycle phase this action runs, if it is one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Refine => Some(Phase::Refine),
            Self::Research => Some(Phase::Research),
            Self::Plan => Some(Phase::Plan),
            Self::PlanReview => Some(Phase::PlanReview),
            Self::Implement => Some(Phase::Implement),
            Self::Review => Some(Phase::Review),
            Self::Rework | Self::CreatePr => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendedAction {
    pub story_id: String,
    pub kind: ActionKind,
    /// Effective priority; lower is scheduled sooner.
    pub priority: i64,
    pub reason: String,
    /// Set when the story hit its retry ceiling but could not be blocked, so
    /// a human has to step in.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub blocked_by_max_retries: bool,
}

impl RecommendedAction {
    pub fn new(story_id: impl Into<String>, kind: ActionKind, priority: i64) -> Self {
        Self {
            story_id: story_id.into(),
            kind,
            priority,
            reason: String::new(),
            blocked_by_max_retries: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgency_order() {
        let order = [
            ActionKind::CreatePr,
            ActionKind::Review,
            ActionKind::Rework,
            ActionKind::Implement,
            ActionKind::PlanReview,
            ActionKind::Plan,
            ActionKind::Research,
            ActionKind::Refine,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].base_priority() < pair[1].base_priority());
        }
    }

    #[test]
    fn test_phase_mapping_round_trips() {
        for phase in Phase::ALL {
            assert_eq!(ActionKind::from_phase(phase).phase(), Some(phase));
        }
        assert_eq!(ActionKind::Rework.phase(), None);
    }
}
