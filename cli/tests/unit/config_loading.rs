//! Configuration file loading.

#![allow(clippy::unwrap_used)]

use std::path::Path;

use spotdeploy_cli::infra::config::load_from;
use spotdeploy_common::ConfigError;
use tempfile::TempDir;

fn write(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("spotdeploy.yaml");
    std::fs::write(&path, text).unwrap();
    path
}

fn no_vars() -> Vec<(String, String)> {
    Vec::new()
}

#[test]
fn file_fields_override_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(
        dir.path(),
        "subscription_id: sub\n\
         resource_group: rg\n\
         vnet_resource_group: net-rg\n\
         vnet_name: vnet\n\
         subnet_name: apps\n\
         base_domain: apps.example.com\n\
         reserved_hosts: 10\n",
    );
    let config = load_from(Some(path.as_path()), no_vars()).unwrap();
    assert_eq!(config.vnet_resource_group(), "net-rg");
    assert_eq!(config.base_domain, "apps.example.com");
    assert_eq!(config.reserved_hosts, 10);
}

#[test]
fn file_missing_required_keys_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "subscription_id: sub\n");
    let err = load_from(Some(path.as_path()), no_vars()).unwrap_err();
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::Missing(keys)) => {
            assert!(keys.contains(&"resource_group"));
            assert!(!keys.contains(&"subscription_id"));
        }
        other => panic!("expected missing keys, got {other:?}"),
    }
}

#[test]
fn malformed_file_names_the_file() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "subscription_id: [unclosed\n");
    let err = load_from(Some(path.as_path()), no_vars()).unwrap_err();
    assert!(err.to_string().contains("spotdeploy.yaml"), "{err}");
}
