//! Workspace assessment views: `storyloop status` and `storyloop next`.

use anyhow::Result;
use console::style;

use super::super::Cli;
use super::load_config;

fn print_warnings(assessment: &storyloop::scheduler::Assessment) {
    let warnings: Vec<_> = assessment.warnings().collect();
    if warnings.is_empty() {
        return;
    }
    println!("{}", style("Warnings:").yellow().bold());
    for (story_id, warning) in warnings {
        println!("  {} {}", style(story_id).dim(), warning);
    }
    println!();
}

pub fn cmd_status(cli: &Cli, project_dir: &std::path::Path) -> Result<()> {
    use storyloop::orchestrator::StoryRunner;

    let config = load_config(cli, project_dir)?;
    let assessment = StoryRunner::from_config(&config).assess()?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
        return Ok(());
    }

    println!();
    println!("Storyloop Status");
    println!("================");
    println!();

    if assessment.stories.is_empty() {
        println!("No stories found in {}", config.stories_dir().display());
        println!();
        return Ok(());
    }

    println!(
        "{:<14} {:<12} {:>5}  {:<12} Reason",
        "Story", "Status", "Score", "Next"
    );
    println!(
        "{:<14} {:<12} {:>5}  {:<12} ------",
        "-----", "------", "-----", "----"
    );
    for story in &assessment.stories {
        let (next, reason) = match (&story.action, &story.newly_blocked) {
            (_, Some(reason)) => (style("blocked".to_string()).red(), reason.clone()),
            (Some(action), None) => (style(action.kind.to_string()).cyan(), action.reason.clone()),
            (None, None) => (style("-".to_string()).dim(), String::new()),
        };
        println!(
            "{:<14} {:<12} {:>5}  {:<12} {}",
            story.story_id,
            story.status.as_str(),
            story.completion_score,
            next,
            reason
        );
    }
    println!();

    print_warnings(&assessment);

    match &assessment.best {
        Some(best) => println!(
            "Next action: {} {} (priority {})",
            style(&best.kind).green().bold(),
            best.story_id,
            best.priority
        ),
        None => println!("Nothing to do."),
    }
    println!();
    Ok(())
}

pub fn cmd_next(cli: &Cli, project_dir: &std::path::Path) -> Result<()> {
    use storyloop::orchestrator::StoryRunner;

    let config = load_config(cli, project_dir)?;
    let assessment = StoryRunner::from_config(&config).assess()?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&assessment.best)?);
        return Ok(());
    }

    match assessment.best {
        Some(action) if action.blocked_by_max_retries => {
            println!(
                "{} {} needs a human: {}",
                style("ALERT").red().bold(),
                action.story_id,
                action.reason
            );
        }
        Some(action) => {
            println!("{} {}", action.kind, action.story_id);
            println!("  {}", style(&action.reason).dim());
        }
        None => println!("Nothing to do."),
    }
    Ok(())
}
