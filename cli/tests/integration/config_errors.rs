//! Commands that need configuration fail cleanly without it.

#![allow(clippy::expect_used)]

use predicates::prelude::*;

use crate::cli_tests::spotdeploy;

fn unconfigured() -> assert_cmd::Command {
    let mut cmd = spotdeploy();
    for (key, _) in std::env::vars() {
        if key.starts_with("SPOTDEPLOY_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn test_missing_configuration_lists_required_keys() {
    unconfigured()
        .args(["vm", "info", "alice", "blog"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error: missing required configuration"))
        .stderr(predicate::str::contains("subscription_id"));
}

#[test]
fn test_missing_configuration_as_json() {
    let output = unconfigured()
        .args(["--json", "teardown", "alice", "blog"])
        .output()
        .expect("run spotdeploy");
    assert_eq!(output.status.code(), Some(1));
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(value["error"], true);
    assert_eq!(value["code"], "config");
}

#[test]
fn test_unreadable_config_file_is_named() {
    unconfigured()
        .args(["--config", "/nonexistent/spotdeploy.yaml", "vm", "info", "alice", "blog"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("/nonexistent/spotdeploy.yaml"));
}
