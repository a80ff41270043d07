//! Integration tests for the storyloop CLI.
//!
//! These drive the binary against temporary projects. None of them invoke a
//! real agent: they cover assessment, blocking, dry runs and maintenance
//! commands.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn storyloop(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("storyloop");
    cmd.current_dir(dir.path())
        .env_remove("STORYLOOP_MAX_RETRIES")
        .env_remove("STORYLOOP_DRY_RUN")
        .env_remove("STORYLOOP_AGENT_CMD")
        .env_remove("STORYLOOP_LOG")
        .env_remove("RUST_LOG");
    cmd
}

fn init_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    storyloop(&dir).arg("init").assert().success();
    dir
}

fn write_story(dir: &TempDir, file: &str, front_matter: &str) {
    let content = format!("---\n{}---\n# Story\n\n## Acceptance Criteria\n- [ ] it works\n", front_matter);
    fs::write(dir.path().join("stories").join(file), content).unwrap();
}

fn read_story(dir: &TempDir, file: &str) -> String {
    fs::read_to_string(dir.path().join("stories").join(file)).unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        cargo_bin_cmd!("storyloop").arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("storyloop").arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = TempDir::new().unwrap();
        storyloop(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized storyloop project"));

        let root = dir.path().join(".storyloop");
        assert!(root.join("storyloop.toml").is_file());
        assert!(root.join("plans").is_dir());
        assert!(root.join("progress").is_dir());
        assert!(root.join("fingerprints").is_dir());
        assert!(root.join("logs").is_dir());
        assert!(dir.path().join("stories").is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = init_project();
        storyloop(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_run_requires_init() {
        let dir = TempDir::new().unwrap();
        storyloop(&dir)
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("storyloop init"));
    }
}

// =============================================================================
// Assessment
// =============================================================================

mod assessment {
    use super::*;

    #[test]
    fn test_status_empty_project() {
        let dir = init_project();
        storyloop(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No stories found"));
    }

    #[test]
    fn test_status_lists_stories_and_next_action() {
        let dir = init_project();
        write_story(&dir, "S-1.md", "id: S-1\ntitle: Login\nstatus: ready\n");
        write_story(&dir, "S-2.md", "id: S-2\ntitle: Signup\nstatus: done\n");

        storyloop(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("S-1"))
            .stdout(predicate::str::contains("S-2"))
            .stdout(predicate::str::contains("Next action: research S-1"));
    }

    #[test]
    fn test_next_prefers_review_over_research() {
        let dir = init_project();
        write_story(&dir, "S-1.md", "id: S-1\nstatus: ready\n");
        write_story(
            &dir,
            "S-2.md",
            "id: S-2\nstatus: in-progress\nresearch_complete: true\nplan_complete: true\nplan_review_complete: true\nimplementation_complete: true\n",
        );

        storyloop(&dir)
            .arg("next")
            .assert()
            .success()
            .stdout(predicate::str::starts_with("review S-2"));
    }

    #[test]
    fn test_next_json() {
        let dir = init_project();
        write_story(&dir, "S-1.md", "id: S-1\nstatus: backlog\n");

        let output = storyloop(&dir).args(["next", "--json"]).output().unwrap();
        assert!(output.status.success());
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["story_id"], "S-1");
        assert_eq!(value["kind"], "refine");
    }

    #[test]
    fn test_status_blocks_story_at_retry_ceiling() {
        let dir = init_project();
        write_story(
            &dir,
            "S-1.md",
            "id: S-1\nstatus: in-progress\nresearch_complete: true\nplan_complete: true\nplan_review_complete: true\nimplementation_complete: true\nretry_count: 3\n",
        );

        storyloop(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Max review retries (3/3) reached"));

        let content = read_story(&dir, "S-1.md");
        assert!(content.contains("status: blocked"));
        assert!(content.contains("blocked_at:"));
        assert!(content.contains("# Story"));
    }

    #[test]
    fn test_env_raises_retry_ceiling() {
        let dir = init_project();
        write_story(
            &dir,
            "S-1.md",
            "id: S-1\nstatus: in-progress\nresearch_complete: true\nplan_complete: true\nplan_review_complete: true\nimplementation_complete: true\nretry_count: 3\n",
        );

        storyloop(&dir)
            .env("STORYLOOP_MAX_RETRIES", "5")
            .arg("next")
            .assert()
            .success()
            .stdout(predicate::str::starts_with("review S-1"));
        assert!(read_story(&dir, "S-1.md").contains("status: in-progress"));
    }

    #[test]
    fn test_malformed_story_is_skipped() {
        let dir = init_project();
        fs::write(dir.path().join("stories/broken.md"), "no front matter here").unwrap();
        write_story(&dir, "S-1.md", "id: S-1\nstatus: ready\n");

        storyloop(&dir)
            .arg("next")
            .assert()
            .success()
            .stdout(predicate::str::contains("research S-1"));
    }
}

// =============================================================================
// Execution
// =============================================================================

mod execution {
    use super::*;

    #[test]
    fn test_dry_run_changes_nothing() {
        let dir = init_project();
        write_story(&dir, "S-1.md", "id: S-1\nstatus: ready\n");
        let before = read_story(&dir, "S-1.md");

        storyloop(&dir)
            .args(["run", "--dry-run", "--max-actions", "3"])
            .assert()
            .success()
            .stdout(predicate::str::contains("dry run: would run research for S-1"));

        assert_eq!(read_story(&dir, "S-1.md"), before);
    }

    #[test]
    fn test_run_with_nothing_to_do() {
        let dir = init_project();
        write_story(&dir, "S-1.md", "id: S-1\nstatus: done\n");
        storyloop(&dir)
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to do."));
    }

    #[test]
    fn test_phase_rejects_unknown_phase() {
        let dir = init_project();
        write_story(&dir, "S-1.md", "id: S-1\nstatus: ready\n");
        storyloop(&dir)
            .args(["phase", "S-1", "deploy"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid phase 'deploy'"));
    }

    #[test]
    fn test_create_pr_marks_story_done() {
        let dir = init_project();
        write_story(
            &dir,
            "S-1.md",
            "id: S-1\nstatus: in-progress\nresearch_complete: true\nplan_complete: true\nplan_review_complete: true\nimplementation_complete: true\nreviews_complete: true\n",
        );

        storyloop(&dir)
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("create_pr"));
        assert!(read_story(&dir, "S-1.md").contains("status: done"));
        let journal = fs::read_to_string(dir.path().join(".storyloop/journal.log")).unwrap();
        assert!(journal.starts_with("S-1|create_pr|completed|0|"));
    }
}

// =============================================================================
// Maintenance
// =============================================================================

mod maintenance {
    use super::*;

    #[test]
    fn test_unblock_resets_story() {
        let dir = init_project();
        write_story(
            &dir,
            "S-1.md",
            "id: S-1\nstatus: blocked\nretry_count: 3\nblocked_reason: \"Max review retries (3/3) reached: unknown\"\nblocked_at: 2024-01-15T10:00:00Z\n",
        );
        fs::write(
            dir.path().join(".storyloop/fingerprints/S-1-review.json"),
            r#"{"entries": []}"#,
        )
        .unwrap();

        storyloop(&dir)
            .args(["unblock", "S-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Unblocked"))
            .stdout(predicate::str::contains("cleared 1 fingerprint stream(s)"));

        let content = read_story(&dir, "S-1.md");
        assert!(content.contains("status: in-progress"));
        assert!(content.contains("retry_count: 0"));
        assert!(!content.contains("blocked_reason"));
        assert!(!dir.path().join(".storyloop/fingerprints/S-1-review.json").exists());
    }

    #[test]
    fn test_unblock_ignores_unblocked_story() {
        let dir = init_project();
        write_story(&dir, "S-1.md", "id: S-1\nstatus: ready\n");
        storyloop(&dir)
            .args(["unblock", "S-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("is not blocked"));
    }

    #[test]
    fn test_unblock_unknown_story_fails() {
        let dir = init_project();
        storyloop(&dir).args(["unblock", "S-404"]).assert().failure();
    }

    #[test]
    fn test_fingerprint_ignores_volatile_details() {
        let dir = TempDir::new().unwrap();
        let first = storyloop(&dir)
            .args(["fingerprint", "--json"])
            .write_stdin("Error at /home/alice/app/src/main.ts:42:7 at 2024-01-15T10:30:00Z")
            .output()
            .unwrap();
        let second = storyloop(&dir)
            .args(["fingerprint", "--json"])
            .write_stdin("Error at /Users/bob/work/src/main.ts:99:1 at 2025-03-02T08:00:00Z")
            .output()
            .unwrap();

        let a: serde_json::Value = serde_json::from_slice(&first.stdout).unwrap();
        let b: serde_json::Value = serde_json::from_slice(&second.stdout).unwrap();
        assert_eq!(a["fingerprint"], b["fingerprint"]);
        assert_eq!(a["fingerprint"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_fingerprint_from_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("failure.txt");
        fs::write(&file, "build started\nerror: cannot find module 'x'\n").unwrap();
        storyloop(&dir)
            .arg("fingerprint")
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("preview:     error: cannot find module 'x'"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        storyloop(&dir)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("No storyloop.toml found"))
            .stdout(predicate::str::contains("max_retries = 3"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = init_project();
        fs::write(
            dir.path().join(".storyloop/storyloop.toml"),
            "[retries]\nmax_retries = 5000\n",
        )
        .unwrap();
        storyloop(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"));
    }

    #[test]
    fn test_invalid_config_fails() {
        let dir = init_project();
        fs::write(dir.path().join(".storyloop/storyloop.toml"), "not = [valid").unwrap();
        storyloop(&dir).arg("status").assert().failure();
    }
}
