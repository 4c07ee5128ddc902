use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Returned by [`OrchestratorConfig::validate`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Orchestrator configuration.
///
/// Loaded from a YAML file or from `SPOTDEPLOY_*` environment variables.
/// Required cloud coordinates default to empty and are checked by
/// [`OrchestratorConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub resource_group: String,
    /// Resource group holding the virtual network (default: `resource_group`).
    #[serde(default)]
    pub vnet_resource_group: Option<String>,
    #[serde(default)]
    pub vnet_name: String,
    #[serde(default)]
    pub subnet_name: String,

    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_vm_size")]
    pub default_vm_size: String,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// Inline public key. When unset the key is fetched from the cloud secrets store.
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    #[serde(default = "default_ssh_key_resource")]
    pub ssh_key_resource: String,

    /// Leading subnet hosts never handed out as static IPs.
    #[serde(default = "default_reserved_hosts")]
    pub reserved_hosts: u32,
    #[serde(default = "default_base_domain")]
    pub base_domain: String,
    #[serde(default = "default_routes_dir")]
    pub routes_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_fluentd_address")]
    pub fluentd_address: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_running_timeout_secs")]
    pub running_timeout_secs: u64,
    #[serde(default = "default_recreate_grace_secs")]
    pub recreate_grace_secs: u64,
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,
    #[serde(default = "default_readiness_interval_secs")]
    pub readiness_interval_secs: u64,
    /// Upper bound on a single cloud CLI invocation.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Upper bound on a compose build.
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
}

fn default_location() -> String {
    "eastus".to_string()
}

fn default_vm_size() -> String {
    "Standard_B2ats_v2".to_string()
}

fn default_admin_username() -> String {
    "azureuser".to_string()
}

fn default_ssh_key_resource() -> String {
    "spot_vm_key".to_string()
}

fn default_reserved_hosts() -> u32 {
    10
}

fn default_base_domain() -> String {
    "localhost".to_string()
}

fn default_routes_dir() -> PathBuf {
    PathBuf::from("/etc/traefik/dynamic")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/spotdeploy")
}

fn default_fluentd_address() -> String {
    "localhost:24224".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_running_timeout_secs() -> u64 {
    300
}

fn default_recreate_grace_secs() -> u64 {
    30
}

fn default_readiness_attempts() -> u32 {
    15
}

fn default_readiness_interval_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    600
}

fn default_build_timeout_secs() -> u64 {
    1800
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            resource_group: String::new(),
            vnet_resource_group: None,
            vnet_name: String::new(),
            subnet_name: String::new(),
            location: default_location(),
            default_vm_size: default_vm_size(),
            admin_username: default_admin_username(),
            ssh_public_key: None,
            ssh_key_resource: default_ssh_key_resource(),
            reserved_hosts: default_reserved_hosts(),
            base_domain: default_base_domain(),
            routes_dir: default_routes_dir(),
            state_dir: default_state_dir(),
            fluentd_address: default_fluentd_address(),
            poll_interval_secs: default_poll_interval_secs(),
            running_timeout_secs: default_running_timeout_secs(),
            recreate_grace_secs: default_recreate_grace_secs(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_secs: default_readiness_interval_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            build_timeout_secs: default_build_timeout_secs(),
        }
    }
}

impl OrchestratorConfig {
    /// Check that every required key is set and every bound is usable.
    ///
    /// All missing keys are reported together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        for (key, value) in [
            ("subscription_id", &self.subscription_id),
            ("resource_group", &self.resource_group),
            ("vnet_name", &self.vnet_name),
            ("subnet_name", &self.subnet_name),
            ("base_domain", &self.base_domain),
        ] {
            if value.trim().is_empty() {
                missing.push(key);
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        if self.readiness_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "readiness_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn vnet_resource_group(&self) -> &str {
        self.vnet_resource_group
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.resource_group)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn running_timeout(&self) -> Duration {
        Duration::from_secs(self.running_timeout_secs)
    }

    #[must_use]
    pub fn recreate_grace(&self) -> Duration {
        Duration::from_secs(self.recreate_grace_secs)
    }

    #[must_use]
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}
