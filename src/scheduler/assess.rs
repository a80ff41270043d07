//! Workspace assessment: one recommended action per story, then the best one.

use chrono::Utc;
use serde::Serialize;
use storyloop_common::{ReviewDecision, Story, StoryStatus};
use tracing::{debug, error, info};

use super::action::{ActionKind, RecommendedAction};
use super::circuit_breaker::{self, effective_ceiling, is_tripped};
use super::priority::PriorityModel;
use crate::errors::StoreError;
use crate::phase::next_phase;
use crate::story::StoryStore;
use crate::storyloop_config::StoryloopConfig;

/// Priority of the alert emitted when a tripped story could not be blocked.
pub const ALERT_PRIORITY: i64 = i64::MIN / 2;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub global_max_retries: u32,
    pub max_retries_upper_bound: u32,
    pub priority: PriorityModel,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            global_max_retries: 3,
            max_retries_upper_bound: 999,
            priority: PriorityModel::default(),
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &StoryloopConfig) -> Self {
        Self {
            global_max_retries: config.toml.max_retries(),
            max_retries_upper_bound: config.toml.max_retries_upper_bound(),
            priority: PriorityModel::from_section(&config.toml.scheduler),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryAssessment {
    pub story_id: String,
    pub status: StoryStatus,
    pub completion_score: u32,
    pub action: Option<RecommendedAction>,
    /// Set when this scan moved the story to `blocked`.
    pub newly_blocked: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Assessment {
    pub stories: Vec<StoryAssessment>,
    pub best: Option<RecommendedAction>,
}

impl Assessment {
    pub fn warnings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.stories.iter().flat_map(|s| {
            s.warnings
                .iter()
                .map(move |w| (s.story_id.as_str(), w.as_str()))
        })
    }

    pub fn newly_blocked(&self) -> impl Iterator<Item = &StoryAssessment> {
        self.stories.iter().filter(|s| s.newly_blocked.is_some())
    }
}

/// Whether the latest review asked for changes nobody has addressed yet.
fn rework_pending(story: &Story) -> bool {
    story
        .latest_review()
        .is_some_and(|r| r.decision == ReviewDecision::ChangesRequested && !r.addressed)
}

/// What a story needs next, ignoring the circuit breaker.
pub fn next_action_kind(story: &Story) -> Option<ActionKind> {
    if !story.status.is_schedulable() {
        return None;
    }
    if story.all_phases_complete() {
        return Some(ActionKind::CreatePr);
    }
    let phase = next_phase(story)?;
    let kind = ActionKind::from_phase(phase);
    if kind == ActionKind::Review && rework_pending(story) {
        return Some(ActionKind::Rework);
    }
    Some(kind)
}

fn describe(kind: ActionKind, story: &Story) -> String {
    match kind {
        ActionKind::CreatePr => "all phases complete".to_string(),
        ActionKind::Rework => "review requested changes".to_string(),
        _ => match story.retry_count {
            0 => format!("next phase is {}", kind),
            n => format!("next phase is {} (retry {})", kind, n),
        },
    }
}

pub struct Scheduler<'a> {
    store: &'a dyn StoryStore,
    settings: SchedulerSettings,
}

impl<'a> Scheduler<'a> {
    pub fn new(store: &'a dyn StoryStore, settings: SchedulerSettings) -> Self {
        Self { store, settings }
    }

    /// Scan every story. Schedulable stories whose retries are exhausted are
    /// blocked as a side effect, whatever phase they are in.
    pub fn assess(&self) -> Result<Assessment, StoreError> {
        let stories = self.store.list()?;
        let mut assessment = Assessment::default();

        for story in &stories {
            assessment.stories.push(self.assess_story(story));
        }

        assessment.best = assessment
            .stories
            .iter()
            .filter_map(|s| s.action.as_ref())
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.story_id.cmp(&b.story_id))
            })
            .cloned();

        if let Some(best) = &assessment.best {
            info!(story_id = %best.story_id, action = %best.kind, priority = best.priority, "next action");
        }
        Ok(assessment)
    }

    pub fn assess_story(&self, story: &Story) -> StoryAssessment {
        let mut result = StoryAssessment {
            story_id: story.id.clone(),
            status: story.status,
            completion_score: story.completion_score(),
            action: None,
            newly_blocked: None,
            warnings: story.flag_inconsistencies(),
        };

        let Some(kind) = next_action_kind(story) else {
            return result;
        };

        let ceiling = effective_ceiling(
            story,
            self.settings.global_max_retries,
            self.settings.max_retries_upper_bound,
        );
        if is_tripped(story, ceiling) {
            let reason = circuit_breaker::blocked_reason(story, ceiling);
            let mut blocked = story.clone();
            circuit_breaker::block(&mut blocked, &reason, Utc::now());
            match self.store.save(&blocked) {
                Ok(()) => {
                    info!(story_id = %story.id, %reason, "story blocked by circuit breaker");
                    result.status = StoryStatus::Blocked;
                    result.newly_blocked = blocked.blocked_reason;
                }
                Err(e) => {
                    error!(story_id = %story.id, error = %e, "failed to block story at retry ceiling");
                    let mut alert = RecommendedAction::new(&story.id, ActionKind::Review, ALERT_PRIORITY)
                        .with_reason(format!("{} (could not block: {})", reason, e));
                    alert.blocked_by_max_retries = true;
                    result.action = Some(alert);
                }
            }
            return result;
        }

        let priority = self.settings.priority.effective_priority(kind, story);
        debug!(story_id = %story.id, action = %kind, priority, "recommended");
        result.action =
            Some(RecommendedAction::new(&story.id, kind, priority).with_reason(describe(kind, story)));
        result
    }
}
