use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "storyloop")]
#[command(version, about = "Drive stories through their lifecycle with AI agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Report what would run without invoking agents or touching git
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a storyloop project
    Init,
    /// Assess every story and show what each needs next
    Status,
    /// Show the single highest-priority action
    Next,
    /// Execute recommended actions until nothing is left to do
    Run {
        /// Stop after this many actions
        #[arg(short, long, default_value = "1")]
        max_actions: usize,
    },
    /// Run one phase for one story
    Phase {
        story: String,
        /// refine, research, plan, plan_review, implement or review
        phase: String,
    },
    /// Run a story's implementation plan
    Implement { story: String },
    /// Return a blocked story to work with a fresh retry budget
    Unblock { story: String },
    /// Normalize and fingerprint failure text (stdin when FILE is omitted)
    Fingerprint { file: Option<PathBuf> },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = project_dir
        .join(storyloop::storyloop_config::STORYLOOP_DIR)
        .join("logs");
    let _guard = storyloop::telemetry::init(cli.verbose, Some(&log_dir));

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Status => cmd::cmd_status(&cli, &project_dir)?,
        Commands::Next => cmd::cmd_next(&cli, &project_dir)?,
        Commands::Run { max_actions } => cmd::cmd_run(&cli, &project_dir, *max_actions).await?,
        Commands::Phase { story, phase } => {
            cmd::cmd_phase(&cli, &project_dir, story, phase).await?
        }
        Commands::Implement { story } => cmd::cmd_implement(&cli, &project_dir, story).await?,
        Commands::Unblock { story } => cmd::cmd_unblock(&cli, &project_dir, story)?,
        Commands::Fingerprint { file } => cmd::cmd_fingerprint(&cli, file.as_deref())?,
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}
