//! Story lifecycle phases.
//!
//! Phases run in a fixed linear order. A phase may run only when every
//! earlier phase is complete and it is not; completing it sets its flag.
//! `refine` has no flag of its own: a refined story leaves `backlog`.

pub mod executor;
pub mod groups;
pub mod prompts;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storyloop_common::{Story, StoryStatus, UnknownVariant};

pub use executor::{PhaseExecutor, PhaseOutcome};
pub use groups::{AgentGroupConfig, Composition, ConsensusMode, GroupAgentConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Refine,
    Research,
    Plan,
    PlanReview,
    Implement,
    Review,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Refine,
        Phase::Research,
        Phase::Plan,
        Phase::PlanReview,
        Phase::Implement,
        Phase::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refine => "refine",
            Self::Research => "research",
            Self::Plan => "plan",
            Self::PlanReview => "plan_review",
            Self::Implement => "implement",
            Self::Review => "review",
        }
    }

    fn index(&self) -> usize {
        Self::ALL.iter().position(|p| p == self).unwrap_or(0)
    }

    /// Phases that must be complete before this one may run.
    pub fn predecessors(&self) -> &'static [Phase] {
        &Self::ALL[..self.index()]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "refine" => Ok(Self::Refine),
            "research" => Ok(Self::Research),
            "plan" => Ok(Self::Plan),
            "plan_review" => Ok(Self::PlanReview),
            "implement" => Ok(Self::Implement),
            "review" => Ok(Self::Review),
            other => Err(UnknownVariant::new("phase", other)),
        }
    }
}

pub fn is_complete(story: &Story, phase: Phase) -> bool {
    match phase {
        Phase::Refine => story.status != StoryStatus::Backlog,
        Phase::Research => story.research_complete,
        Phase::Plan => story.plan_complete,
        Phase::PlanReview => story.plan_review_complete,
        Phase::Implement => story.implementation_complete,
        Phase::Review => story.reviews_complete,
    }
}

/// Whether `phase` may run now for this story.
pub fn can_run(story: &Story, phase: Phase) -> bool {
    story.status.is_schedulable()
        && !is_complete(story, phase)
        && phase.predecessors().iter().all(|p| is_complete(story, *p))
}

/// The earliest phase that is not yet complete.
pub fn next_phase(story: &Story) -> Option<Phase> {
    Phase::ALL.into_iter().find(|p| !is_complete(story, *p))
}

/// Record successful completion of a phase.
pub fn mark_complete(story: &mut Story, phase: Phase) {
    match phase {
        Phase::Refine => {
            story.status = StoryStatus::Ready;
            return;
        }
        Phase::Research => story.research_complete = true,
        Phase::Plan => story.plan_complete = true,
        Phase::PlanReview => story.plan_review_complete = true,
        Phase::Implement => story.implementation_complete = true,
        Phase::Review => story.reviews_complete = true,
    }
    if matches!(story.status, StoryStatus::Backlog | StoryStatus::Ready) {
        story.status = StoryStatus::InProgress;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse_and_display() {
        assert_eq!("plan-review".parse::<Phase>().unwrap(), Phase::PlanReview);
        assert_eq!(Phase::PlanReview.to_string(), "plan_review");
        assert!("deploy".parse::<Phase>().is_err());
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
    }

    #[test]
    fn test_linear_gating() {
        let mut story = Story::new("S-1", "Login");
        assert!(can_run(&story, Phase::Refine));
        assert!(!can_run(&story, Phase::Research));
        assert_eq!(next_phase(&story), Some(Phase::Refine));

        mark_complete(&mut story, Phase::Refine);
        assert_eq!(story.status, StoryStatus::Ready);
        assert!(!can_run(&story, Phase::Refine));
        assert!(can_run(&story, Phase::Research));
        assert!(!can_run(&story, Phase::Plan));

        mark_complete(&mut story, Phase::Research);
        assert_eq!(story.status, StoryStatus::InProgress);
        assert_eq!(next_phase(&story), Some(Phase::Plan));
    }

    #[test]
    fn test_out_of_order_flags_run_earliest_phase() {
        let mut story = Story::new("S-1", "Login");
        story.status = StoryStatus::InProgress;
        story.implementation_complete = true;
        assert_eq!(next_phase(&story), Some(Phase::Research));
        assert!(!can_run(&story, Phase::Review));
    }

    #[test]
    fn test_blocked_story_cannot_run() {
        let mut story = Story::new("S-1", "Login");
        story.status = StoryStatus::Blocked;
        story.research_complete = true;
        assert!(!can_run(&story, Phase::Plan));
    }

    #[test]
    fn test_all_complete_has_no_next_phase() {
        let mut story = Story::new("S-1", "Login");
        for phase in Phase::ALL {
            mark_complete(&mut story, phase);
        }
        assert_eq!(next_phase(&story), None);
        assert!(story.all_phases_complete());
    }
}
