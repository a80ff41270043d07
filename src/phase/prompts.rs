//! Prompt construction for phase agents.

use storyloop_common::Story;

use super::Phase;
use crate::agents::AgentRole;
use crate::consensus::IterationContext;
use crate::errors::PhaseError;

/// JSON shape every reviewing role is asked to answer with.
const VERDICT_FORMAT: &str = r#"## Output Format

Respond with a JSON object:

```json
{
  "approved": true,
  "summary": "One-paragraph summary of your verdict",
  "concerns": [
    {
      "severity": "blocker|critical|major|minor",
      "category": "short-tag",
      "description": "What is wrong and how to fix it"
    }
  ]
}
```

Use `blocker` only for problems that must be fixed before the work can proceed."#;

fn role_instructions(role: &AgentRole) -> Result<String, PhaseError> {
    let text = match role {
        AgentRole::Refiner => "You are refining a backlog story. Tighten the title, \
            clarify the goal, and write testable acceptance criteria as a markdown \
            checklist under an `## Acceptance Criteria` heading. Edit the story file in place."
            .to_string(),
        AgentRole::Researcher => "You are researching how to implement this story. \
            Explore the codebase, identify the files and modules involved, note existing \
            patterns to follow, and list open risks. Write your findings under a \
            `## Research` heading in the story file."
            .to_string(),
        AgentRole::Planner => "You are writing the implementation plan for this story. \
            Break the work into small tasks, each touching a declared set of files, with \
            explicit dependencies between tasks. Write the plan as JSON \
            `{\"tasks\": [{\"id\", \"description\", \"files\", \"depends_on\"}]}` to the \
            plan file named below."
            .to_string(),
        AgentRole::PlanReviewer => "You are reviewing an implementation plan before any \
            code is written. Check that tasks cover every acceptance criterion, that file \
            scopes are accurate, and that the dependency graph has no cycles."
            .to_string(),
        AgentRole::Implementer => "You are implementing this story. Follow the plan, keep \
            changes within the files it declares, and make the tests pass."
            .to_string(),
        AgentRole::Reviewer(perspective) => {
            let focus = perspective
                .focus_areas()
                .iter()
                .map(|area| format!("- {}", area))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "You are a code reviewer focused on **{}** concerns. Review the changes made \
                 for this story.\n\nFocus areas:\n{}",
                perspective.as_str(),
                focus
            )
        }
        AgentRole::Unsupported(tag) => {
            return Err(PhaseError::UnsupportedRole { role: tag.clone() });
        }
    };
    Ok(text)
}

/// Build the prompt for one agent in a phase.
pub fn build_phase_prompt(
    phase: Phase,
    role: &AgentRole,
    story: &Story,
    iteration: Option<&IterationContext>,
    extra_context: &str,
) -> Result<String, PhaseError> {
    let instructions = role_instructions(role)?;

    let mut prompt = format!(
        "# {phase} phase: {id} - {title}\n\n{instructions}\n\n## Story\n\n{body}\n",
        phase = phase,
        id = story.id,
        title = story.title,
        instructions = instructions,
        body = if story.body.trim().is_empty() {
            "(no story body)"
        } else {
            story.body.trim()
        },
    );

    if !extra_context.trim().is_empty() {
        prompt.push_str(&format!("\n## Context\n\n{}\n", extra_context.trim()));
    }

    if let Some(ctx) = iteration {
        prompt.push_str(&format!(
            "\n## Previous Round (iteration {} of {})\n\nThe group did not agree. \
             Address these unresolved concerns or explain why they do not apply:\n\n{}\n",
            ctx.iteration, ctx.max_iterations, ctx.summary
        ));
    }

    if role.is_reviewer() {
        prompt.push('\n');
        prompt.push_str(VERDICT_FORMAT);
        prompt.push('\n');
    }

    Ok(prompt)
}

/// Prompt for the rework action: the implementer addresses review feedback.
pub fn build_rework_prompt(story: &Story) -> String {
    let feedback = story
        .review_history
        .iter()
        .rev()
        .find(|entry| !entry.addressed && !entry.decision.is_approved());

    let mut prompt = format!(
        "# Rework: {} - {}\n\nA review requested changes. Fix every issue below, keeping \
         changes focused on the feedback.\n\n## Story\n\n{}\n",
        story.id,
        story.title,
        story.body.trim()
    );

    if let Some(entry) = feedback {
        prompt.push_str(&format!("\n## Review Feedback\n\n{}\n", entry.feedback.trim()));
        if !entry.issues.is_empty() {
            prompt.push_str("\n## Issues\n\n");
            for issue in &entry.issues {
                prompt.push_str(&format!("- {}\n", issue));
            }
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Perspective;
    use storyloop_common::{Concern, ReviewDecision, ReviewEntry};

    fn story() -> Story {
        Story::new("S-1", "Login").with_body("Users can log in.\n\n## Acceptance Criteria\n- [ ] works")
    }

    #[test]
    fn test_reviewer_prompt_has_focus_and_format() {
        let prompt = build_phase_prompt(
            Phase::Review,
            &AgentRole::Reviewer(Perspective::Security),
            &story(),
            None,
            "",
        )
        .unwrap();
        assert!(prompt.contains("# review phase: S-1 - Login"));
        assert!(prompt.contains("**security**"));
        assert!(prompt.contains("Secrets or credentials"));
        assert!(prompt.contains("\"approved\": true"));
    }

    #[test]
    fn test_non_reviewer_prompt_has_no_verdict_format() {
        let prompt =
            build_phase_prompt(Phase::Plan, &AgentRole::Planner, &story(), None, "Plan file: p.json")
                .unwrap();
        assert!(prompt.contains("implementation plan"));
        assert!(prompt.contains("Plan file: p.json"));
        assert!(!prompt.contains("Output Format"));
    }

    #[test]
    fn test_iteration_context_included() {
        let ctx = IterationContext {
            iteration: 2,
            max_iterations: 3,
            summary: "### sec (reviewer:security)\n- [blocker] leak".to_string(),
            previous: Vec::new(),
        };
        let prompt = build_phase_prompt(
            Phase::Review,
            &AgentRole::Reviewer(Perspective::General),
            &story(),
            Some(&ctx),
            "",
        )
        .unwrap();
        assert!(prompt.contains("iteration 2 of 3"));
        assert!(prompt.contains("[blocker] leak"));
    }

    #[test]
    fn test_unsupported_role_is_rejected() {
        let result = build_phase_prompt(
            Phase::Review,
            &AgentRole::Unsupported("poet".to_string()),
            &story(),
            None,
            "",
        );
        assert!(matches!(result, Err(PhaseError::UnsupportedRole { role }) if role == "poet"));
    }

    #[test]
    fn test_rework_prompt_uses_latest_unaddressed_feedback() {
        let mut story = story();
        let mut old = ReviewEntry::new(ReviewDecision::ChangesRequested, "old feedback");
        old.addressed = true;
        story.append_review(old);
        story.append_review(
            ReviewEntry::new(ReviewDecision::ChangesRequested, "add rate limiting")
                .with_issues(vec![Concern::blocker("security", "no throttling")]),
        );

        let prompt = build_rework_prompt(&story);
        assert!(prompt.contains("add rate limiting"));
        assert!(prompt.contains("[blocker] security: no throttling"));
        assert!(!prompt.contains("old feedback"));
    }
}
