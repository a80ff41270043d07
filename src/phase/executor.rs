//! Phase executor.
//!
//! Runs the agents configured for one phase of one story. A phase without
//! configured groups runs a single default agent for the phase's role. Groups
//! run in order; the first group that fails ends the phase.

use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use storyloop_common::{AgentOutput, Concern, ConsensusResult, Severity, Story};
use tracing::{debug, info, warn};

use super::groups::{AgentGroupConfig, Composition, ConsensusMode, GroupAgentConfig};
use super::prompts::build_phase_prompt;
use super::{Phase, can_run};
use crate::agents::{
    AgentInvoker, AgentRegistry, AgentRequest, AgentResponse, AgentRole, AgentSpec,
    parse_agent_report,
};
use crate::consensus::{ConsensusEngine, IterationContext};
use crate::errors::PhaseError;

const FAILURE_EXCERPT_CHARS: usize = 500;

/// Result of running one phase.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub success: bool,
    /// Final outputs of every group that ran.
    pub outputs: Vec<AgentOutput>,
    pub consensus: Vec<ConsensusResult>,
    pub requires_human_review: bool,
    pub failure: Option<String>,
    pub agent_invocations: u32,
}

impl PhaseOutcome {
    /// All concerns raised, most severe first.
    pub fn concerns(&self) -> Vec<Concern> {
        let mut concerns: Vec<Concern> = self
            .outputs
            .iter()
            .flat_map(|o| o.concerns.iter().cloned())
            .collect();
        concerns.sort_by_key(|c| c.severity);
        concerns
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.outputs.iter().filter_map(AgentOutput::highest_severity).min()
    }

    /// Human-readable feedback from agents that did not approve.
    pub fn feedback(&self) -> String {
        let parts: Vec<String> = self
            .outputs
            .iter()
            .filter(|o| !o.approved || o.has_blocking_concern())
            .map(|o| {
                let content = o.content.trim();
                if content.is_empty() {
                    format!("{}: did not approve", o.id)
                } else {
                    format!("{}: {}", o.id, content)
                }
            })
            .collect();
        if parts.is_empty() {
            self.failure.clone().unwrap_or_default()
        } else {
            parts.join("\n")
        }
    }
}

struct Member {
    config: GroupAgentConfig,
    role: AgentRole,
    agent: Arc<dyn AgentInvoker>,
}

pub struct PhaseExecutor {
    registry: AgentRegistry,
    working_dir: Option<PathBuf>,
}

impl PhaseExecutor {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            registry,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// The implicit group used when a phase has no configured agents.
    pub fn default_group(phase: Phase) -> AgentGroupConfig {
        AgentGroupConfig::new("default")
            .with_consensus(ConsensusMode::Required)
            .with_max_iterations(1)
            .with_agent(GroupAgentConfig::new(
                phase.as_str(),
                AgentRole::for_phase(phase).to_string(),
            ))
    }

    fn resolve(&self, group: &AgentGroupConfig) -> Result<Vec<Member>, PhaseError> {
        group
            .agents
            .iter()
            .map(|config| {
                let role = config.parsed_role();
                if let AgentRole::Unsupported(tag) = &role {
                    return Err(PhaseError::UnsupportedRole { role: tag.clone() });
                }
                let key = config.registry_key();
                if !self.registry.contains(key) {
                    return Err(PhaseError::AgentNotRegistered {
                        id: key.to_string(),
                    });
                }
                let agent = self
                    .registry
                    .create(key, &AgentSpec::new(&config.id, role.clone()))?;
                Ok(Member {
                    config: config.clone(),
                    role,
                    agent,
                })
            })
            .collect()
    }

    /// Run `phase` for `story` with the given agent groups.
    pub async fn execute(
        &self,
        phase: Phase,
        story: &Story,
        groups: &[AgentGroupConfig],
        extra_context: &str,
    ) -> Result<PhaseOutcome, PhaseError> {
        if !can_run(story, phase) {
            return Err(PhaseError::NotRunnable {
                phase: phase.to_string(),
                story_id: story.id.clone(),
            });
        }

        let groups: Vec<AgentGroupConfig> = if groups.is_empty() {
            vec![Self::default_group(phase)]
        } else {
            groups.to_vec()
        };

        // Resolve everything up front so configuration errors surface before
        // any agent runs.
        let resolved = groups
            .iter()
            .map(|g| self.resolve(g))
            .collect::<Result<Vec<_>, _>>()?;

        let invocations = AtomicU32::new(0);
        let mut outcome = PhaseOutcome {
            phase,
            success: true,
            outputs: Vec::new(),
            consensus: Vec::new(),
            requires_human_review: false,
            failure: None,
            agent_invocations: 0,
        };

        for (group, members) in groups.iter().zip(resolved.iter()) {
            info!(
                story_id = %story.id,
                phase = %phase,
                group = %group.name,
                agents = members.len(),
                "running agent group"
            );

            let initial = self
                .run_group_once(phase, story, group, members, None, extra_context, &invocations)
                .await?;

            let outputs = if group.requires_consensus() {
                let engine = ConsensusEngine::new(group.max_iterations, true);
                let result = engine
                    .run(initial, |ctx| {
                        let invocations = &invocations;
                        async move {
                            self.run_group_once(
                                phase,
                                story,
                                group,
                                members,
                                Some(&ctx),
                                extra_context,
                                invocations,
                            )
                            .await
                            .map_err(anyhow::Error::from)
                        }
                    })
                    .await?;
                outcome.requires_human_review |= result.requires_human_review;
                let outputs = result.outputs.clone();
                outcome.consensus.push(result);
                outputs
            } else {
                initial
            };

            let failure = group_failure(group, &outputs);
            outcome.outputs.extend(outputs);
            if let Some(reason) = failure {
                warn!(story_id = %story.id, phase = %phase, group = %group.name, "agent group failed");
                outcome.success = false;
                outcome.failure = Some(reason);
                break;
            }
        }

        outcome.agent_invocations = invocations.load(Ordering::Relaxed);
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_group_once(
        &self,
        phase: Phase,
        story: &Story,
        group: &AgentGroupConfig,
        members: &[Member],
        iteration: Option<&IterationContext>,
        extra_context: &str,
        invocations: &AtomicU32,
    ) -> Result<Vec<AgentOutput>, PhaseError> {
        match group.composition {
            Composition::Parallel => {
                let futures: Vec<_> = members
                    .iter()
                    .map(|m| self.run_member(phase, story, m, iteration, extra_context, invocations))
                    .collect();
                join_all(futures).await.into_iter().collect()
            }
            Composition::Sequential => {
                let mut outputs = Vec::with_capacity(members.len());
                for member in members {
                    let output = self
                        .run_member(phase, story, member, iteration, extra_context, invocations)
                        .await?;
                    let stop = output.has_blocking_concern() && group.consensus != ConsensusMode::None;
                    outputs.push(output);
                    if stop {
                        debug!(group = %group.name, agent = %member.config.id, "blocking concern, stopping group early");
                        break;
                    }
                }
                Ok(outputs)
            }
        }
    }

    async fn run_member(
        &self,
        phase: Phase,
        story: &Story,
        member: &Member,
        iteration: Option<&IterationContext>,
        extra_context: &str,
        invocations: &AtomicU32,
    ) -> Result<AgentOutput, PhaseError> {
        let prompt = build_phase_prompt(phase, &member.role, story, iteration, extra_context)?;
        let mut request =
            AgentRequest::new(format!("{}/{}/{}", story.id, phase, member.config.id), prompt);
        if let Some(ref dir) = self.working_dir {
            request = request.with_working_dir(dir.clone());
        }

        invocations.fetch_add(1, Ordering::Relaxed);
        let output = match member.agent.invoke(&request).await {
            Ok(response) => translate(&member.config.id, &member.role, response),
            Err(e) => {
                warn!(agent = %member.config.id, error = %e, "agent invocation failed");
                failed_output(&member.config.id, &member.role, &format!("{:#}", e))
            }
        };
        Ok(output)
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= FAILURE_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let mut out: String = trimmed.chars().take(FAILURE_EXCERPT_CHARS).collect();
        out.push_str("...");
        out
    }
}

fn failed_output(id: &str, role: &AgentRole, error: &str) -> AgentOutput {
    AgentOutput::new(id, role.to_string(), false)
        .with_content(excerpt(error))
        .with_concern(Concern::blocker("agent-failure", excerpt(error)))
}

/// Turn an agent response into an output; reviewers' verdicts are parsed.
fn translate(id: &str, role: &AgentRole, response: AgentResponse) -> AgentOutput {
    if !response.success {
        return failed_output(id, role, &response.failure_text());
    }

    if !role.is_reviewer() {
        return AgentOutput::new(id, role.to_string(), true).with_content(response.output);
    }

    match parse_agent_report(&response.output) {
        Ok(report) => {
            let content = if report.summary.is_empty() {
                excerpt(&response.output)
            } else {
                report.summary
            };
            AgentOutput::new(id, role.to_string(), report.approved)
                .with_content(content)
                .with_concerns(report.concerns)
        }
        Err(e) => {
            warn!(agent = %id, error = %e, "could not parse reviewer verdict");
            AgentOutput::new(id, role.to_string(), false)
                .with_content(excerpt(&response.output))
                .with_concern(Concern::new(
                    Severity::Major,
                    "unparseable-verdict",
                    format!("verdict could not be parsed: {}", e),
                ))
        }
    }
}

fn group_failure(group: &AgentGroupConfig, outputs: &[AgentOutput]) -> Option<String> {
    let mut problems = Vec::new();
    for output in outputs {
        for concern in output.blocking_concerns() {
            problems.push(format!("{}: {}", output.id, concern));
        }
        if group.requires_consensus() && !output.approved && !output.has_blocking_concern() {
            problems.push(format!("{}: did not approve", output.id));
        }
    }
    if problems.is_empty() {
        None
    } else {
        Some(format!("group '{}' failed:\n{}", group.name, problems.join("\n")))
    }
}
