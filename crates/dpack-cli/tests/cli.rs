//! The `dpack` binary end to end.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn dpack() -> Command {
    let mut cmd = Command::cargo_bin("dpack").unwrap();
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

/// A project with a page and no dependencies.
fn empty_project() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("package.json"), r#"{"name":"app"}"#).unwrap();
    fs::write(
        temp.path().join("index.html"),
        "<!doctype html><html><body><h1>hi</h1></body></html>",
    )
    .unwrap();
    temp
}

#[test]
fn test_help_lists_commands() {
    dpack()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dev"))
        .stdout(predicate::str::contains("optimize"));
}

#[test]
fn test_version() {
    dpack()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("dpack "));
}

#[test]
fn test_unknown_command_fails() {
    dpack().arg("build").assert().failure();
}

#[test]
fn test_dev_rejects_missing_root() {
    let temp = TempDir::new().unwrap();
    dpack()
        .arg("dev")
        .arg(temp.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid root directory"));
}

#[test]
fn test_optimize_with_missing_config_file() {
    let project = empty_project();
    dpack()
        .current_dir(project.path())
        .args(["optimize", "--config", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_optimize_without_dependencies() {
    let project = empty_project();
    dpack()
        .arg("optimize")
        .arg(project.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("No dependencies to optimize"));

    assert!(
        project
            .path()
            .join("node_modules/.dpack/deps/_metadata.json")
            .is_file()
    );

    // second run reuses the metadata unless forced
    dpack()
        .arg("optimize")
        .arg(project.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("up to date"));

    dpack()
        .args(["optimize", "--force"])
        .arg(project.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("No dependencies to optimize"));
}
