//! Consensus engine.
//!
//! Iterates a set of agent outputs toward agreement. Each iteration feeds a
//! summary of the unresolved concerns back to the same agents and replaces
//! the previous outputs with the new ones. Iterations are strictly
//! sequential and bounded.

use anyhow::Result;
use std::future::Future;
use storyloop_common::{AgentOutput, ConsensusResult};
use tracing::{debug, info};

/// What the re-execution callback receives.
#[derive(Debug, Clone)]
pub struct IterationContext {
    /// Number of the iteration about to run (the initial outputs are iteration 1).
    pub iteration: u32,
    pub max_iterations: u32,
    /// Unresolved concerns grouped by originating agent.
    pub summary: String,
    pub previous: Vec<AgentOutput>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsensusEngine {
    max_iterations: u32,
    require_unanimous: bool,
}

impl ConsensusEngine {
    pub fn new(max_iterations: u32, require_unanimous: bool) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            require_unanimous,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Whether these outputs agree.
    pub fn has_agreement(&self, outputs: &[AgentOutput]) -> bool {
        has_agreement(outputs, self.require_unanimous)
    }

    /// Iterate `initial` until agreement or the iteration cap.
    ///
    /// `reexecute` re-runs the same agent set with the iteration context and
    /// returns their new outputs.
    pub async fn run<F, Fut>(&self, initial: Vec<AgentOutput>, mut reexecute: F) -> Result<ConsensusResult>
    where
        F: FnMut(IterationContext) -> Fut,
        Fut: Future<Output = Result<Vec<AgentOutput>>>,
    {
        let mut outputs = initial;
        let mut iterations = 1;

        loop {
            if self.has_agreement(&outputs) {
                info!(iterations, "consensus reached");
                return Ok(ConsensusResult {
                    reached: true,
                    iterations,
                    outputs,
                    requires_human_review: false,
                });
            }

            if iterations >= self.max_iterations {
                let blocked = outputs.iter().any(AgentOutput::has_blocking_concern);
                info!(iterations, blocked, "consensus not reached within iteration budget");
                return Ok(ConsensusResult {
                    reached: false,
                    iterations,
                    outputs,
                    requires_human_review: blocked,
                });
            }

            let context = IterationContext {
                iteration: iterations + 1,
                max_iterations: self.max_iterations,
                summary: summarize_concerns(&outputs),
                previous: outputs.clone(),
            };
            debug!(iteration = context.iteration, "re-executing agents with prior concerns");
            outputs = reexecute(context).await?;
            iterations += 1;
        }
    }
}

/// No output carries a blocking concern and, when unanimity is required,
/// every output approves.
pub fn has_agreement(outputs: &[AgentOutput], require_unanimous: bool) -> bool {
    let no_blockers = !outputs.iter().any(AgentOutput::has_blocking_concern);
    no_blockers && (!require_unanimous || outputs.iter().all(|o| o.approved))
}

/// Markdown summary of unresolved concerns, one section per agent.
pub fn summarize_concerns(outputs: &[AgentOutput]) -> String {
    let mut summary = String::new();
    for output in outputs {
        if output.concerns.is_empty() && output.approved {
            continue;
        }
        summary.push_str(&format!("### {} ({})\n", output.id, output.role));
        if !output.approved {
            summary.push_str("- did not approve\n");
        }
        let mut concerns: Vec<_> = output.concerns.iter().collect();
        concerns.sort_by_key(|c| c.severity);
        for concern in concerns {
            summary.push_str(&format!("- {}\n", concern));
        }
        summary.push('\n');
    }
    summary.trim_end().to_string()
}
