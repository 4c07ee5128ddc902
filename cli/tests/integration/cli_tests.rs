//! CLI structure, argument parsing and the configuration-free commands.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

pub fn spotdeploy() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("spotdeploy"));
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_no_args_shows_help() {
    // clap with arg_required_else_help shows help on stderr and exits 2
    spotdeploy()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("per-workspace spot VMs"));
}

#[test]
fn test_cli_help_lists_commands() {
    spotdeploy()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("teardown"));
}

#[test]
fn test_cli_version_flag_shows_version() {
    spotdeploy()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("spotdeploy"));
}

#[test]
fn test_names_prints_derived_names() {
    spotdeploy()
        .args(["names", "Alice", "My_Blog"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vm-alice-myblog"))
        .stdout(predicate::str::contains("ctx-alice-myblog"))
        .stdout(predicate::str::contains("myblog"));
}

#[test]
fn test_names_json_is_machine_readable() {
    let output = spotdeploy()
        .args(["--json", "names", "alice", "blog"])
        .output()
        .expect("run spotdeploy");
    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(value["vm_name"], "vm-alice-blog");
    assert_eq!(value["context_name"], "ctx-alice-blog");
    assert_eq!(value["project_name"], "blog");
    assert_eq!(value["key"], "alice/blog");
}

#[test]
fn test_names_requires_tenant_and_workspace() {
    spotdeploy()
        .args(["names", "alice"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("<WORKSPACE>"));
}

#[test]
fn test_routes_generate_rejects_malformed_ports() {
    spotdeploy()
        .args(["routes", "generate", "alice", "blog", "--port", "web"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("SERVICE=PORT"));
}
