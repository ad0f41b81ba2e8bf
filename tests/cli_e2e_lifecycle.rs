//! End-to-end tests for the lifecycle commands against real repositories.
//!
//! These tests invoke the actual CLI binary on freshly initialized git
//! working trees. They need `git` on the PATH and a reachable container
//! engine for the listing calls, so they are gated behind the
//! `integration-tests` feature.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_fs::prelude::*;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

fn git(directory: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(directory)
        .status()
        .expect("git is available");
    assert!(
        status.success(),
        "git {:?} failed in {}",
        args,
        directory.display()
    );
}

/// Creates a git repository with one commit under `root`.
fn init_repository(root: &Path, relative: &str) -> PathBuf {
    let directory = root.join(relative);
    std::fs::create_dir_all(&directory).unwrap();
    git(&directory, &["init", "-b", "main"]);
    git(&directory, &["config", "user.email", "dork@example.com"]);
    git(&directory, &["config", "user.name", "dork"]);
    std::fs::write(directory.join("README.md"), "# demo\n").unwrap();
    git(&directory, &["add", "README.md"]);
    git(&directory, &["commit", "-m", "initial", "--no-gpg-sign"]);
    directory
}

/// Writes a configuration file pointing the source root at `root`.
fn write_config(temp: &assert_fs::TempDir) -> PathBuf {
    let config = temp.child("dork.ini");
    config
        .write_str(&format!(
            "[dork]\nhost_source_directory = {}\n",
            temp.path().display()
        ))
        .unwrap();
    config.path().to_path_buf()
}

/// Test that status renders one table row per discovered workspace
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_status_shows_workstation_row() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_repository(temp.path(), "demo");
    let config = write_config(&temp);

    let mut cmd = cargo_bin_cmd!("dork");
    cmd.arg("status")
        .arg("-d")
        .arg(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("--color")
        .arg("never")
        .assert()
        .success()
        .stdout(predicate::str::contains("NAME"))
        .stdout(predicate::str::contains("demo"))
        .stdout(predicate::str::contains("WORKSTATION"))
        .stdout(predicate::str::contains("REPOSITORY"))
        .stdout(predicate::str::contains("NEW"));
}

/// Test that info prints the repository details block
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_info_shows_repository_details() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_repository(temp.path(), "demo");
    let config = write_config(&temp);

    let mut cmd = cargo_bin_cmd!("dork");
    cmd.arg("info")
        .arg("-d")
        .arg(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("--color")
        .arg("never")
        .assert()
        .success()
        .stdout(predicate::str::contains("directory:"))
        .stdout(predicate::str::contains("main (head"))
        .stdout(predicate::str::contains("WORKSTATION"));
}

/// Test that inventory prints nothing while no container is running
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_inventory_is_empty_without_running_containers() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_repository(temp.path(), "demo");
    let config = write_config(&temp);

    let mut cmd = cargo_bin_cmd!("dork");
    cmd.arg("inventory")
        .arg("-d")
        .arg(temp.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

/// Test that stop succeeds for a workspace without any container
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_stop_without_container_succeeds() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_repository(temp.path(), "demo");
    let config = write_config(&temp);

    let mut cmd = cargo_bin_cmd!("dork");
    cmd.arg("stop")
        .arg("-d")
        .arg(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("--color")
        .arg("never")
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] demo"));
}

/// Test that commit refuses a workspace without a container
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_commit_requires_a_container() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_repository(temp.path(), "demo");
    let config = write_config(&temp);

    let mut cmd = cargo_bin_cmd!("dork");
    cmd.arg("commit")
        .arg("-d")
        .arg(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("--color")
        .arg("never")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no matching container"));
}
