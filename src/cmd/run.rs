//! Action execution: `storyloop run`, `storyloop phase` and `storyloop implement`.

use anyhow::{Context, Result};
use console::style;
use storyloop::orchestrator::ActionReport;

use super::super::Cli;
use super::load_config;

const SUMMARY_WIDTH: usize = 96;

fn check_initialized(project_dir: &std::path::Path) -> Result<()> {
    if !storyloop::init::is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'storyloop init' first.");
    }
    Ok(())
}

fn print_report(report: &ActionReport) {
    let marker = if report.success {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "{} {} {} ({} agent call(s))",
        marker,
        style(&report.kind).bold(),
        report.story_id,
        report.agent_invocations
    );
    for line in report.summary.lines().filter(|l| !l.trim().is_empty()) {
        for wrapped in textwrap::wrap(line, SUMMARY_WIDTH) {
            println!("    {}", wrapped);
        }
    }
    if let Some(reason) = &report.blocked {
        println!("    {} {}", style("blocked:").red().bold(), reason);
    }
    if report.requires_human_review {
        println!(
            "    {}",
            style("consensus not reached; human review recommended").yellow()
        );
    }
}

fn print_reports(cli: &Cli, reports: &[ActionReport]) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    for report in reports {
        print_report(report);
    }
    Ok(())
}

pub async fn cmd_run(cli: &Cli, project_dir: &std::path::Path, max_actions: usize) -> Result<()> {
    use storyloop::orchestrator::StoryRunner;

    check_initialized(project_dir)?;
    let config = load_config(cli, project_dir)?;
    let runner = StoryRunner::from_config(&config);

    if runner.settings().dry_run && !cli.json {
        println!("{}", style("Dry run: no agents will be invoked").yellow());
    }

    let reports = runner.run_loop(max_actions).await?;
    if reports.is_empty() && !cli.json {
        println!("Nothing to do.");
        return Ok(());
    }
    print_reports(cli, &reports)?;

    if !cli.json && reports.len() == max_actions {
        println!();
        println!(
            "{}",
            style(format!("Stopped after {} action(s).", max_actions)).dim()
        );
    }
    Ok(())
}

pub async fn cmd_phase(
    cli: &Cli,
    project_dir: &std::path::Path,
    story_id: &str,
    phase: &str,
) -> Result<()> {
    use storyloop::orchestrator::StoryRunner;
    use storyloop::phase::Phase;
    use storyloop::scheduler::{ActionKind, RecommendedAction};

    check_initialized(project_dir)?;
    let phase: Phase = phase.parse()?;
    let config = load_config(cli, project_dir)?;
    let runner = StoryRunner::from_config(&config);

    let action = RecommendedAction::new(story_id, ActionKind::from_phase(phase), 0)
        .with_reason("requested from the command line");
    let report = runner
        .execute(&action)
        .await
        .with_context(|| format!("Failed to run {} for {}", phase, story_id))?;
    print_reports(cli, std::slice::from_ref(&report))
}

pub async fn cmd_implement(cli: &Cli, project_dir: &std::path::Path, story_id: &str) -> Result<()> {
    cmd_phase(cli, project_dir, story_id, "implement").await
}
