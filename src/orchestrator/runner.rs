//! Executes one recommended action for one story and writes the result back.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use storyloop_common::{ReviewDecision, ReviewEntry, Story, StoryStatus};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::journal::ActionJournal;
use crate::agents::{AgentInvoker, AgentRegistry, AgentRequest, AgentRole, AgentSpec, DEFAULT_AGENT};
use crate::fingerprint::store::FingerprintStore;
use crate::phase::prompts::build_rework_prompt;
use crate::phase::{AgentGroupConfig, Phase, PhaseExecutor, PhaseOutcome, mark_complete};
use crate::scheduler::circuit_breaker::{self, truncate_chars};
use crate::scheduler::{ActionKind, Assessment, RecommendedAction, Scheduler, SchedulerSettings};
use crate::story::StoryStore;
use crate::storyloop_config::StoryloopConfig;
use crate::tasks::{ExecutionSummary, Plan, TaskExecutor, TaskExecutorConfig, TaskProgressStore};
use crate::vcs::VersionControl;

/// Stream key used for rework failures in the fingerprint store.
const REWORK_STREAM: &str = "rework";

/// Everything the runner reads from configuration.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub working_dir: PathBuf,
    pub plans_dir: PathBuf,
    pub conventions_file: PathBuf,
    pub tasks: TaskExecutorConfig,
    pub scheduler: SchedulerSettings,
    pub identical_error_threshold: u32,
    pub phase_groups: BTreeMap<Phase, Vec<AgentGroupConfig>>,
    pub dry_run: bool,
}

impl RunnerSettings {
    pub fn from_config(config: &StoryloopConfig) -> Self {
        let phase_groups = Phase::ALL
            .into_iter()
            .map(|p| (p, config.toml.phase_groups(p).to_vec()))
            .filter(|(_, groups)| !groups.is_empty())
            .collect();
        Self {
            working_dir: config.project_dir.clone(),
            plans_dir: config.plans_dir(),
            conventions_file: config.conventions_file(),
            tasks: TaskExecutorConfig::from_config(config),
            scheduler: SchedulerSettings::from_config(config),
            identical_error_threshold: config.toml.fingerprint.identical_error_threshold,
            phase_groups,
            dry_run: config.dry_run(),
        }
    }

    pub fn groups_for(&self, phase: Phase) -> &[AgentGroupConfig] {
        self.phase_groups
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn plan_file(&self, story_id: &str) -> PathBuf {
        self.plans_dir.join(format!("{}.json", story_id))
    }
}

/// What executing one action did.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub story_id: String,
    pub kind: ActionKind,
    pub success: bool,
    pub summary: String,
    pub agent_invocations: u32,
    /// Reason, when the story ended up blocked.
    pub blocked: Option<String>,
    pub requires_human_review: bool,
}

impl ActionReport {
    fn new(action: &RecommendedAction) -> Self {
        Self {
            story_id: action.story_id.clone(),
            kind: action.kind,
            success: false,
            summary: String::new(),
            agent_invocations: 0,
            blocked: None,
            requires_human_review: false,
        }
    }

    fn succeeded(mut self, summary: impl Into<String>) -> Self {
        self.success = true;
        self.summary = summary.into();
        self
    }

    fn failed(mut self, summary: impl Into<String>) -> Self {
        self.success = false;
        self.summary = summary.into();
        self
    }
}

/// Result of one scheduler tick.
#[derive(Debug)]
pub struct TickResult {
    pub assessment: Assessment,
    pub report: Option<ActionReport>,
}

pub struct StoryRunner {
    store: Arc<dyn StoryStore>,
    registry: AgentRegistry,
    phases: PhaseExecutor,
    vcs: Arc<dyn VersionControl>,
    progress: Arc<dyn TaskProgressStore>,
    fingerprints: FingerprintStore,
    journal: Option<ActionJournal>,
    settings: RunnerSettings,
}

impl StoryRunner {
    pub fn new(
        store: Arc<dyn StoryStore>,
        registry: AgentRegistry,
        vcs: Arc<dyn VersionControl>,
        progress: Arc<dyn TaskProgressStore>,
        fingerprints: FingerprintStore,
        settings: RunnerSettings,
    ) -> Self {
        let phases = PhaseExecutor::new(registry.clone()).with_working_dir(settings.working_dir.clone());
        Self {
            store,
            registry,
            phases,
            vcs,
            progress,
            fingerprints,
            journal: None,
            settings,
        }
    }

    pub fn with_journal(mut self, journal: ActionJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn assess(&self) -> Result<Assessment> {
        Scheduler::new(self.store.as_ref(), self.settings.scheduler)
            .assess()
            .context("Failed to assess stories")
    }

    /// Assess the workspace and execute the best action, if any.
    pub async fn tick(&self) -> Result<TickResult> {
        let assessment = self.assess()?;
        let report = match &assessment.best {
            Some(action) => Some(self.execute(action).await?),
            None => None,
        };
        Ok(TickResult { assessment, report })
    }

    /// Tick until nothing is left to do, a story could not be blocked, or
    /// `max_actions` actions have run. A dry run stops after one tick since
    /// nothing it does changes the next assessment.
    pub async fn run_loop(&self, max_actions: usize) -> Result<Vec<ActionReport>> {
        let run_id = Uuid::new_v4();
        self.run_actions(max_actions)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_actions(&self, max_actions: usize) -> Result<Vec<ActionReport>> {
        info!(max_actions, dry_run = self.settings.dry_run, "run started");
        let mut reports = Vec::new();
        while reports.len() < max_actions {
            let tick = self.tick().await?;
            let Some(report) = tick.report else {
                info!("no schedulable work left");
                break;
            };
            let alert = tick
                .assessment
                .best
                .as_ref()
                .is_some_and(|a| a.blocked_by_max_retries);
            reports.push(report);
            if alert || self.settings.dry_run {
                break;
            }
        }
        Ok(reports)
    }

    /// Execute one recommended action.
    pub async fn execute(&self, action: &RecommendedAction) -> Result<ActionReport> {
        let mut story = self
            .store
            .load(&action.story_id)
            .with_context(|| format!("Failed to load story {}", action.story_id))?;
        let report = ActionReport::new(action);

        info!(story_id = %story.id, action = %action.kind, "executing action");

        let report = if action.blocked_by_max_retries {
            self.retry_block(&mut story, action, report)
        } else if self.settings.dry_run {
            report.succeeded(format!("dry run: would run {} for {}", action.kind, story.id))
        } else {
            match action.kind {
                ActionKind::CreatePr => self.create_pr(&mut story, report)?,
                ActionKind::Rework => self.rework(&mut story, report).await?,
                ActionKind::Implement => self.implement(&mut story, report).await?,
                kind => match kind.phase() {
                    Some(phase) => self.run_phase(&mut story, phase, report).await?,
                    None => report.failed(format!("unsupported action {}", kind)),
                },
            }
        };

        if let Some(journal) = self.journal.as_ref().filter(|_| !self.settings.dry_run) {
            let outcome = match (&report.blocked, report.success) {
                (Some(reason), _) => format!("blocked: {}", reason),
                (None, true) => "completed".to_string(),
                (None, false) => format!("failed: {}", truncate_chars(&report.summary, 200)),
            };
            if let Err(e) = journal.record(&story.id, action.kind.as_str(), &outcome, report.agent_invocations) {
                warn!(error = %e, "failed to write journal entry");
            }
        }

        Ok(report)
    }

    fn save(&self, story: &Story) -> Result<()> {
        self.store
            .save(story)
            .with_context(|| format!("Failed to save story {}", story.id))
    }

    fn retry_block(
        &self,
        story: &mut Story,
        action: &RecommendedAction,
        mut report: ActionReport,
    ) -> ActionReport {
        let ceiling = circuit_breaker::effective_ceiling(
            story,
            self.settings.scheduler.global_max_retries,
            self.settings.scheduler.max_retries_upper_bound,
        );
        let reason = circuit_breaker::blocked_reason(story, ceiling);
        circuit_breaker::block(story, &reason, Utc::now());
        report.requires_human_review = true;
        match self.save(story) {
            Ok(()) => {
                report.blocked = story.blocked_reason.clone();
                report.failed(reason)
            }
            Err(e) => report.failed(format!("{}; human attention required: {:#}", action.reason, e)),
        }
    }

    fn create_pr(&self, story: &mut Story, report: ActionReport) -> Result<ActionReport> {
        story.status = StoryStatus::Done;
        self.save(story)?;
        self.clear_streams(&story.id);
        Ok(report.succeeded(format!("{} is ready for a pull request", story.id)))
    }

    fn implementer(&self) -> Result<Arc<dyn AgentInvoker>> {
        let (key, id) = self
            .settings
            .groups_for(Phase::Implement)
            .iter()
            .flat_map(|g| g.agents.iter())
            .next()
            .map(|a| (a.registry_key().to_string(), a.id.clone()))
            .unwrap_or_else(|| (DEFAULT_AGENT.to_string(), Phase::Implement.as_str().to_string()));
        self.registry
            .create(&key, &AgentSpec::new(id, AgentRole::Implementer))
    }

    fn conventions(&self) -> Option<String> {
        std::fs::read_to_string(&self.settings.conventions_file).ok()
    }

    async fn rework(&self, story: &mut Story, mut report: ActionReport) -> Result<ActionReport> {
        let agent = self.implementer()?;
        let request = AgentRequest::new(format!("{}/rework", story.id), build_rework_prompt(story))
            .with_working_dir(&self.settings.working_dir);
        report.agent_invocations = 1;

        let response = match agent.invoke(&request).await {
            Ok(response) => response,
            Err(e) => crate::agents::AgentResponse::failed(format!("{:#}", e)),
        };

        if response.success {
            if let Some(entry) = story
                .review_history
                .iter_mut()
                .rev()
                .find(|e| !e.addressed && !e.decision.is_approved())
            {
                entry.addressed = true;
            }
            self.save(story)?;
            self.clear_stream(&story.id, REWORK_STREAM);
            return Ok(report.succeeded("review feedback addressed"));
        }

        let failure = response.failure_text();
        self.record_failure(story, REWORK_STREAM, &failure, &mut report)?;
        Ok(report.failed(failure))
    }

    async fn implement(&self, story: &mut Story, mut report: ActionReport) -> Result<ActionReport> {
        let failure = match Plan::load(&self.settings.plan_file(&story.id)) {
            Err(e) => e.to_string(),
            Ok(plan) => {
                let agent = self.implementer()?;
                let executor = TaskExecutor::new(
                    agent,
                    self.vcs.clone(),
                    self.progress.clone(),
                    self.settings.tasks.clone(),
                    &self.settings.working_dir,
                );
                let conventions = self.conventions();
                match executor.run(story, &plan, conventions.as_deref()).await {
                    Ok(summary) => {
                        report.agent_invocations = summary.agent_invocations;
                        if summary.is_success() {
                            mark_complete(story, Phase::Implement);
                            self.save(story)?;
                            self.clear_stream(&story.id, Phase::Implement.as_str());
                            return Ok(report.succeeded(describe_summary(&summary)));
                        }
                        summary_failure(&summary)
                    }
                    Err(e) => e.to_string(),
                }
            }
        };

        warn!(story_id = %story.id, "implementation failed");
        self.record_failure(story, Phase::Implement.as_str(), &failure, &mut report)?;
        Ok(report.failed(failure))
    }

    fn phase_context(&self, story: &Story, phase: Phase) -> String {
        let plan_file = self.settings.plan_file(&story.id);
        match phase {
            Phase::Plan => {
                let mut context = format!("Plan file: {}", plan_file.display());
                if let Some(entry) = story.latest_review().filter(|e| !e.addressed && !e.decision.is_approved()) {
                    context.push_str(&format!(
                        "\n\nThe previous plan was rejected. Feedback:\n{}",
                        entry.feedback.trim()
                    ));
                }
                context
            }
            Phase::PlanReview | Phase::Review => match std::fs::read_to_string(&plan_file) {
                Ok(plan) => format!("Plan file: {}\n\n```json\n{}\n```", plan_file.display(), plan.trim()),
                Err(_) => String::new(),
            },
            _ => String::new(),
        }
    }

    async fn run_phase(
        &self,
        story: &mut Story,
        phase: Phase,
        mut report: ActionReport,
    ) -> Result<ActionReport> {
        let context = self.phase_context(story, phase);
        let outcome = self
            .phases
            .execute(phase, story, self.settings.groups_for(phase), &context)
            .await
            .with_context(|| format!("Failed to run {} phase for {}", phase, story.id))?;

        report.agent_invocations = outcome.agent_invocations;
        report.requires_human_review = outcome.requires_human_review;

        let outcome = if outcome.success && phase == Phase::Plan {
            self.check_plan(story, outcome)
        } else {
            outcome
        };

        if outcome.success {
            self.apply_success(story, phase, &outcome);
            self.save(story)?;
            self.clear_stream(&story.id, phase.as_str());
            info!(story_id = %story.id, phase = %phase, "phase completed");
            return Ok(report.succeeded(format!("{} complete", phase)));
        }

        let feedback = outcome.feedback();
        match phase {
            Phase::Review | Phase::PlanReview => {
                story.append_review(
                    ReviewEntry::new(ReviewDecision::ChangesRequested, feedback.clone())
                        .with_issues(outcome.concerns()),
                );
                story.retry_count = story.retry_count.saturating_add(1);
                if phase == Phase::PlanReview {
                    story.plan_complete = false;
                }
            }
            _ => {}
        }
        if outcome.requires_human_review {
            warn!(story_id = %story.id, phase = %phase, "consensus not reached on blocking concerns");
        }

        let failure = outcome.failure.clone().unwrap_or_else(|| feedback.clone());
        self.record_failure(story, phase.as_str(), &failure, &mut report)?;
        Ok(report.failed(failure))
    }

    /// A plan phase only counts once a valid plan file exists.
    fn check_plan(&self, story: &Story, mut outcome: PhaseOutcome) -> PhaseOutcome {
        let path = self.settings.plan_file(&story.id);
        let problem = match Plan::load(&path) {
            Ok(plan) if plan.tasks.is_empty() => Some("plan has no tasks".to_string()),
            Ok(plan) => plan.validate().err().map(|e| e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(problem) = problem {
            outcome.success = false;
            outcome.failure = Some(format!("invalid plan: {}", problem));
        }
        outcome
    }

    fn apply_success(&self, story: &mut Story, phase: Phase, outcome: &PhaseOutcome) {
        mark_complete(story, phase);
        match phase {
            Phase::Plan => {
                for entry in story.review_history.iter_mut().filter(|e| !e.addressed) {
                    entry.addressed = true;
                }
            }
            Phase::Review => {
                let summary = outcome
                    .outputs
                    .iter()
                    .map(|o| o.content.trim())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                let mut entry = ReviewEntry::new(ReviewDecision::Approved, summary)
                    .with_issues(outcome.concerns());
                entry.addressed = true;
                story.append_review(entry);
            }
            _ => {}
        }
    }

    /// Record a failure in the story's fingerprint stream and block the story
    /// if the same failure keeps repeating. Saves the story either way.
    fn record_failure(
        &self,
        story: &mut Story,
        stream: &str,
        failure: &str,
        report: &mut ActionReport,
    ) -> Result<()> {
        let key = FingerprintStore::stream_key(&story.id, stream);
        match self
            .fingerprints
            .record(&key, failure, self.settings.identical_error_threshold)
        {
            Ok(check) if check.is_looping => {
                let reason = format!(
                    "Identical failure repeated ({}/{}): {}",
                    check.consecutive,
                    check.threshold,
                    truncate_chars(&circuit_breaker::sanitize(&check.preview), circuit_breaker::REASON_EXCERPT_CHARS)
                );
                warn!(story_id = %story.id, stream, %reason, "blocking looping story");
                circuit_breaker::block(story, &reason, Utc::now());
                report.blocked = story.blocked_reason.clone();
            }
            Ok(check) => {
                info!(story_id = %story.id, stream, consecutive = check.consecutive, "failure recorded");
            }
            Err(e) => warn!(story_id = %story.id, error = %e, "failed to record failure fingerprint"),
        }
        self.save(story)
    }

    fn clear_stream(&self, story_id: &str, stream: &str) {
        let key = FingerprintStore::stream_key(story_id, stream);
        if let Err(e) = self.fingerprints.clear(&key) {
            warn!(story_id, error = %e, "failed to clear fingerprint stream");
        }
    }

    fn clear_streams(&self, story_id: &str) {
        if let Err(e) = self.fingerprints.clear_story(story_id) {
            warn!(story_id, error = %e, "failed to clear fingerprint streams");
        }
    }
}

fn describe_summary(summary: &ExecutionSummary) -> String {
    let mut text = format!(
        "{} task(s) completed, {} commit(s)",
        summary.completed,
        summary.commits.len()
    );
    if !summary.warnings.is_empty() {
        text.push_str(&format!("; {} warning(s)", summary.warnings.len()));
    }
    text
}

fn summary_failure(summary: &ExecutionSummary) -> String {
    let mut text = format!(
        "{} task(s) failed, {} remaining",
        summary.failed, summary.remaining
    );
    let detail = summary.failure_text();
    if !detail.is_empty() {
        text.push('\n');
        text.push_str(&detail);
    }
    text
}
