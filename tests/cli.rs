//! Integration tests for the `surek` CLI boundary (spec §6/§7): exit codes
//! and error text for the common misuse paths, driven through the real
//! binary rather than the library internals.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn surek_cmd() -> Command {
    Command::cargo_bin("surek").expect("surek binary not found")
}

#[test]
fn missing_top_level_config_exits_nonzero() {
    let dir = TempDir::new().unwrap();

    surek_cmd()
        .current_dir(dir.path())
        .args(["list"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("file not found"));
}

#[test]
fn deploy_without_stack_or_system_flag_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("surek.yml"),
        "root_domain: example.com\ndefault_auth: admin:s3cret\n",
    )
    .unwrap();

    surek_cmd()
        .current_dir(dir.path())
        .args(["deploy"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("stack name is required"));
}

#[test]
fn list_reports_no_stacks_found() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("surek.yml"),
        "root_domain: example.com\ndefault_auth: admin:s3cret\n",
    )
    .unwrap();
    std::fs::create_dir_all(dir.path().join("stacks")).unwrap();

    surek_cmd()
        .current_dir(dir.path())
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no stacks found"));
}

#[test]
fn backup_commands_require_backup_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("surek.yml"),
        "root_domain: example.com\ndefault_auth: admin:s3cret\n",
    )
    .unwrap();

    surek_cmd()
        .current_dir(dir.path())
        .args(["backup", "list"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("backup is not configured"));
}

#[test]
fn help_lists_subcommands() {
    surek_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("backup"));
}
