//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                          |
//! |-----------------|-------------------------------------------|
//! | `project`       | `Init`                                    |
//! | `status`        | `Status`, `Next`                          |
//! | `run`           | `Run`, `Phase`, `Implement`               |
//! | `story`         | `Unblock`                                 |
//! | `fingerprint`   | `Fingerprint`                             |
//! | `config`        | `Config`                                  |

pub mod config;
pub mod fingerprint;
pub mod project;
pub mod run;
pub mod status;
pub mod story;

pub use config::cmd_config;
pub use fingerprint::cmd_fingerprint;
pub use project::cmd_init;
pub use run::{cmd_implement, cmd_phase, cmd_run};
pub use status::{cmd_next, cmd_status};
pub use story::cmd_unblock;

use anyhow::Result;
use storyloop::storyloop_config::StoryloopConfig;

use super::Cli;

/// Load configuration with the global CLI overrides applied.
pub fn load_config(cli: &Cli, project_dir: &std::path::Path) -> Result<StoryloopConfig> {
    StoryloopConfig::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.dry_run)
}
