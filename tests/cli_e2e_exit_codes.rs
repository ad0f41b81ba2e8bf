//! End-to-end tests for the CLI surface shared by all commands: help
//! output, version reporting, argument validation and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a Command for the dork binary
fn dork_cmd() -> Command {
    Command::cargo_bin("dork").unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    dork_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains("boot"));
}

#[test]
fn test_version() {
    dork_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dork"));
}

#[test]
fn test_unknown_subcommand_fails() {
    dork_cmd()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_create_help_shows_image_flag() {
    dork_cmd()
        .arg("create")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--image"));
}

#[test]
fn test_create_image_requires_a_value() {
    dork_cmd()
        .arg("create")
        .arg("--image")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--image"));
}

#[test]
fn test_update_help_shows_full_flag() {
    dork_cmd()
        .arg("update")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--full"));
}

#[test]
fn test_build_help_shows_tag_flags() {
    dork_cmd()
        .arg("build")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--tags"))
        .stdout(predicate::str::contains("--skip-tags"));
}

#[test]
fn test_unknown_log_level_falls_back() {
    let temp = assert_fs::TempDir::new().unwrap();

    dork_cmd()
        .arg("status")
        .arg("-d")
        .arg(temp.path())
        .arg("--log-level")
        .arg("chatty")
        .assert()
        .success()
        .stderr(predicate::str::contains("Unknown log level"));
}
