//! CLI integration tests for the Stratus command-line interface.
//!
//! Every test points `--config-dir` and the working directory at temp dirs so
//! the user's real config and log directory are never touched.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A stratus command isolated in its own config and working directory.
fn stratus(dirs: &(TempDir, TempDir)) -> Command {
    let mut cmd = Command::cargo_bin("stratus").unwrap();
    cmd.current_dir(dirs.1.path())
        .env_remove("STRATUS_CONFIG_DIR")
        .arg("--config-dir")
        .arg(dirs.0.path());
    cmd
}

fn isolated() -> (TempDir, TempDir) {
    (TempDir::new().unwrap(), TempDir::new().unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dirs = isolated();
    stratus(&dirs)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("drill"));
}

#[test]
fn test_version_displays() {
    let dirs = isolated();
    stratus(&dirs)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stratus"));
}

#[test]
fn test_unknown_subcommand_fails() {
    let dirs = isolated();
    stratus(&dirs).arg("serve").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_defaults() {
    let dirs = isolated();
    stratus(&dirs)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No config files loaded"))
        .stdout(predicate::str::contains("SessionRepo"));
}

#[test]
fn test_config_init_then_which() {
    let dirs = isolated();
    stratus(&dirs)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));
    assert!(dirs.0.path().join("config.toml").is_file());

    stratus(&dirs)
        .args(["config", "which"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 config file(s) loaded"));

    stratus(&dirs)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_project_config_shows_in_json() {
    let dirs = isolated();
    std::fs::write(
        dirs.1.path().join("stratus.toml"),
        "[session]\ncache_name = \"checkout\"\n",
    )
    .unwrap();

    stratus(&dirs)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cache_name\": \"checkout\""));
}

#[test]
fn test_invalid_config_is_reported() {
    let dirs = isolated();
    std::fs::write(
        dirs.1.path().join("stratus.toml"),
        "[session]\ncache_name = \"\"\n",
    )
    .unwrap();

    stratus(&dirs)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("session.cache_name"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Drill Command Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_drill_with_locking_reports_no_lost_updates() {
    let dirs = isolated();
    std::fs::write(
        dirs.1.path().join("stratus.toml"),
        "[session]\nlock_retry_interval_ms = 1\n",
    )
    .unwrap();

    stratus(&dirs)
        .args(["--json", "drill", "--workers", "3", "--rounds", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"increments\": 15"))
        .stdout(predicate::str::contains("\"lost_updates\": 0"));
}

#[test]
fn test_drill_without_locking_runs() {
    let dirs = isolated();
    stratus(&dirs)
        .args(["drill", "-w", "2", "-r", "3", "--no-locking"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Locking: off"));
}

#[test]
fn test_drill_rejects_zero_workers() {
    let dirs = isolated();
    stratus(&dirs)
        .args(["drill", "--workers", "0"])
        .assert()
        .failure();
}
