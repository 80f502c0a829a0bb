//! Integration tests for the buildbay CLI
//!
//! These run the real binary against temporary project and state directories.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a buildbay Command isolated from the caller's environment
fn buildbay(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("buildbay");
    cmd.current_dir(dir.path())
        .env_remove("BUILDBAY_CONFIG")
        .env_remove("BUILDBAY_PORT")
        .env_remove("RUST_LOG")
        .env("BUILDBAY_PROJECTS_DIR", dir.path().join("projects"))
        .env("BUILDBAY_STATE_DIR", dir.path().join("state"));
    cmd
}

/// Helper to create a workspace with one buildable and one bare project
fn create_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let app = dir.path().join("projects/MyApp");
    fs::create_dir_all(&app).unwrap();
    fs::write(app.join("gradlew"), "#!/bin/sh\n").unwrap();
    fs::create_dir_all(dir.path().join("projects/NotGradle")).unwrap();
    dir
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        buildbay(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("projects"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        buildbay(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let dir = TempDir::new().unwrap();
        buildbay(&dir).arg("launch").assert().failure();
    }
}

// =============================================================================
// State Inspection
// =============================================================================

mod inspection {
    use super::*;

    #[test]
    fn test_projects_lists_only_buildable() {
        let dir = create_workspace();
        buildbay(&dir)
            .arg("projects")
            .assert()
            .success()
            .stdout(predicate::str::contains("MyApp"))
            .stdout(predicate::str::contains("NotGradle").not());
    }

    #[test]
    fn test_projects_with_missing_base_dir() {
        let dir = TempDir::new().unwrap();
        buildbay(&dir)
            .arg("projects")
            .assert()
            .success()
            .stdout(predicate::str::contains("No buildable projects"));
    }

    #[test]
    fn test_status_defaults_to_not_started() {
        let dir = create_workspace();
        buildbay(&dir)
            .args(["status", "MyApp"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"not_started\""));
    }

    #[test]
    fn test_status_reads_persisted_record() {
        let dir = create_workspace();
        write(
            &dir.path().join("state/status/MyApp.json"),
            r#"{"project":"MyApp","status":"done","progress":100,"timestamp":1700000000,"artifact":"/artifacts/MyApp/app-debug.apk","terminal":true}"#,
        );
        buildbay(&dir)
            .args(["status", "MyApp"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"done\""))
            .stdout(predicate::str::contains("/artifacts/MyApp/app-debug.apk"));
    }

    #[test]
    fn test_status_rejects_traversal() {
        let dir = create_workspace();
        buildbay(&dir)
            .args(["status", "../projects"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid project"));
    }

    #[test]
    fn test_logs_prints_latest_output() {
        let dir = create_workspace();
        write(&dir.path().join("state/logs/MyApp.log"), "BUILD SUCCESSFUL in 12s");
        buildbay(&dir)
            .args(["logs", "MyApp"])
            .assert()
            .success()
            .stdout(predicate::str::contains("BUILD SUCCESSFUL in 12s"));
    }

    #[test]
    fn test_logs_missing_is_an_error() {
        let dir = create_workspace();
        buildbay(&dir)
            .args(["logs", "MyApp"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No logs available"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_reflects_env_overrides() {
        let dir = TempDir::new().unwrap();
        buildbay(&dir)
            .args(["config", "show"])
            .env("BUILDBAY_PORT", "9123")
            .assert()
            .success()
            .stdout(predicate::str::contains("[paths]"))
            .stdout(predicate::str::contains("port = 9123"))
            .stdout(predicate::str::contains("not found, using defaults"));
    }

    #[test]
    fn test_config_init_writes_once() {
        let dir = TempDir::new().unwrap();
        buildbay(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote default configuration"));

        let written = fs::read_to_string(dir.path().join("buildbay.toml")).unwrap();
        assert!(written.contains("[toolchain]"));
        assert!(written.contains("entry_point = \"gradlew\""));

        buildbay(&dir)
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_file_is_used() {
        let dir = create_workspace();
        write(
            &dir.path().join("custom.toml"),
            "[jobs]\nlog_line_limit = 50\n",
        );
        buildbay(&dir)
            .args(["--config", "custom.toml", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("log_line_limit = 50"));
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("buildbay.toml"), "[paths\n");
        buildbay(&dir)
            .arg("projects")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse"));
    }
}
