//! Priority model.
//!
//! `effective = (action base + weight * story priority) * 1000 - completion score`.
//! The first term is the priority band; within a band the completion score
//! brings more-complete stories forward. Lower numbers run sooner.

use storyloop_common::Story;
use storyloop_common::lenient::clamp_count;

use super::action::ActionKind;
use crate::storyloop_config::{RETRY_HARD_LIMIT, SchedulerSection};

const BAND_WIDTH: i64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct PriorityModel {
    pub story_priority_weight: i64,
    pub default_story_priority: i64,
}

impl Default for PriorityModel {
    fn default() -> Self {
        Self {
            story_priority_weight: 10,
            default_story_priority: 3,
        }
    }
}

impl PriorityModel {
    pub fn from_section(section: &SchedulerSection) -> Self {
        Self {
            story_priority_weight: section.story_priority_weight,
            default_story_priority: section.default_story_priority,
        }
    }

    /// The story's declared priority, clamped into `[0, 999]`.
    pub fn story_priority(&self, story: &Story) -> i64 {
        let raw = story.priority.unwrap_or(self.default_story_priority);
        i64::from(clamp_count(raw, RETRY_HARD_LIMIT))
    }

    /// Saturates instead of overflowing on extreme configured weights.
    pub fn band(&self, kind: ActionKind, story: &Story) -> i64 {
        kind.base_priority()
            .saturating_add(self.story_priority_weight.saturating_mul(self.story_priority(story)))
    }

    pub fn effective_priority(&self, kind: ActionKind, story: &Story) -> i64 {
        self.band(kind, story)
            .saturating_mul(BAND_WIDTH)
            .saturating_sub(i64::from(story.completion_score()))
    }
}
