//! Configuration view and validation commands: `storyloop config`.

use anyhow::Result;

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(
    cli: &Cli,
    project_dir: &std::path::Path,
    command: Option<ConfigCommands>,
) -> Result<()> {
    use storyloop::phase::Phase;
    use storyloop::storyloop_config::{STORYLOOP_DIR, StoryloopToml};

    let config_path = project_dir.join(STORYLOOP_DIR).join("storyloop.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Storyloop Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No storyloop.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = load_config(cli, project_dir)?;
            let toml = &config.toml;

            println!("[project]");
            println!("  stories_dir = \"{}\"", toml.project.stories_dir);
            println!("  conventions_file = \"{}\"", toml.project.conventions_file);
            println!();

            println!("[executor]");
            println!("  max_retries_per_task = {}", toml.executor.max_retries_per_task);
            println!("  stop_on_first_failure = {}", toml.executor.stop_on_first_failure);
            println!("  commit_after_each_task = {}", toml.executor.commit_after_each_task);
            println!("  convention_max_chars = {}", toml.executor.convention_max_chars);
            println!("  agent_timeout_secs = {}", toml.executor.agent_timeout_secs);
            println!(
                "  unknown_failures_recoverable = {}",
                toml.executor.unknown_failures_recoverable
            );
            println!();

            println!("[fingerprint]");
            println!(
                "  identical_error_threshold = {}",
                toml.fingerprint.identical_error_threshold
            );
            println!();

            println!("[scheduler]");
            println!("  story_priority_weight = {}", toml.scheduler.story_priority_weight);
            println!("  default_story_priority = {}", toml.scheduler.default_story_priority);
            println!();

            for phase in Phase::ALL {
                let groups = toml.phase_groups(phase);
                if groups.is_empty() {
                    continue;
                }
                println!("[phases.{}]", phase);
                for group in groups {
                    let agents: Vec<&str> = group.agents.iter().map(|a| a.id.as_str()).collect();
                    println!(
                        "  {} ({:?}, consensus {:?}, max {} iteration(s)): {}",
                        group.name,
                        group.composition,
                        group.consensus,
                        group.max_iterations,
                        agents.join(", ")
                    );
                }
                println!();
            }

            println!("Effective values (with env/CLI overrides):");
            println!("  agent_cmd = \"{}\"", config.agent_cmd());
            println!("  max_retries = {}", toml.max_retries());
            println!("  max_retries_upper_bound = {}", toml.max_retries_upper_bound());
            println!("  dry_run = {}", config.dry_run());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No storyloop.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = StoryloopToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
