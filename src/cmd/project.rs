//! Project initialization: `storyloop init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use storyloop::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized storyloop project at {}",
            result.storyloop_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .storyloop/");
        println!("  ├── storyloop.toml  # Configuration");
        println!("  ├── plans/          # <story-id>.json implementation plans");
        println!("  ├── progress/       # Task progress per story");
        println!("  ├── fingerprints/   # Failure fingerprint histories");
        println!("  └── logs/           # Daily JSON logs");
        println!();
        println!("Stories directory: {}", result.stories_dir.display());
        println!();
        println!("Next steps:");
        println!("  1. Add story markdown files with YAML front matter");
        println!("  2. Run `storyloop status` to see what each story needs");
        println!("  3. Run `storyloop run` to start working");
    } else {
        println!(
            "Storyloop project already initialized at {}",
            result.storyloop_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
