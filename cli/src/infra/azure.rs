//! Infrastructure implementation of the cloud provisioner port traits.
//!
//! `AzCliProvisioner<R>` routes every control-plane call through the `az`
//! CLI via a `CommandRunner`. All calls request JSON output; parsing happens
//! in the application layer.

use std::io::Write;
use std::process::Output;

use anyhow::{Context, Result};
use spotdeploy_common::OrchestratorConfig;

use crate::application::ports::{CloudNetwork, CloudRunCommand, CloudVm, CommandRunner, VmSpec};

/// Where VMs and their network live.
#[derive(Debug, Clone)]
pub struct AzureTarget {
    pub subscription_id: String,
    pub resource_group: String,
    pub vnet_resource_group: String,
    pub vnet_name: String,
    pub subnet_name: String,
    pub location: String,
}

impl From<&OrchestratorConfig> for AzureTarget {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            subscription_id: config.subscription_id.clone(),
            resource_group: config.resource_group.clone(),
            vnet_resource_group: config.vnet_resource_group().to_string(),
            vnet_name: config.vnet_name.clone(),
            subnet_name: config.subnet_name.clone(),
            location: config.location.clone(),
        }
    }
}

/// Image used for new VMs.
pub const VM_IMAGE: &str = "Canonical:0001-com-ubuntu-server-jammy:22_04-lts-gen2:latest";

/// Generic over `R: CommandRunner` so tests can inject a recording runner.
pub struct AzCliProvisioner<R: CommandRunner> {
    runner: R,
    target: AzureTarget,
}

impl<R: CommandRunner> AzCliProvisioner<R> {
    pub fn new(runner: R, target: AzureTarget) -> Self {
        Self { runner, target }
    }

    async fn az(&self, args: &[&str], what: &str) -> Result<Output> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend_from_slice(&[
            "--subscription",
            self.target.subscription_id.as_str(),
            "--output",
            "json",
        ]);
        self.runner
            .run("az", &full)
            .await
            .with_context(|| format!("az {what}"))
    }

    fn rg(&self) -> &str {
        &self.target.resource_group
    }
}

impl<R: CommandRunner> CloudVm for AzCliProvisioner<R> {
    async fn show(&self, name: &str) -> Result<Output> {
        self.az(&["vm", "show", "-g", self.rg(), "-n", name], "vm show")
            .await
    }

    async fn instance_view(&self, name: &str) -> Result<Output> {
        self.az(
            &["vm", "get-instance-view", "-g", self.rg(), "-n", name],
            "vm get-instance-view",
        )
        .await
    }

    async fn create(&self, spec: &VmSpec<'_>) -> Result<Output> {
        // the CLI reads custom data from a file
        let mut custom_data = tempfile::NamedTempFile::new().context("creating custom data file")?;
        custom_data
            .write_all(spec.custom_data.as_bytes())
            .context("writing custom data file")?;
        let custom_data_path = custom_data.path().to_string_lossy().into_owned();

        self.az(
            &[
                "vm",
                "create",
                "-g",
                self.rg(),
                "-n",
                spec.name,
                "--location",
                self.target.location.as_str(),
                "--size",
                spec.size,
                "--image",
                VM_IMAGE,
                "--admin-username",
                spec.admin_username,
                "--ssh-key-values",
                spec.ssh_public_key,
                "--authentication-type",
                "ssh",
                "--nics",
                spec.nic_name,
                "--storage-sku",
                "Premium_LRS",
                "--priority",
                "Spot",
                "--eviction-policy",
                "Deallocate",
                "--max-price",
                "-1",
                "--custom-data",
                custom_data_path.as_str(),
            ],
            "vm create",
        )
        .await
    }

    async fn start(&self, name: &str) -> Result<Output> {
        self.az(&["vm", "start", "-g", self.rg(), "-n", name], "vm start")
            .await
    }

    async fn deallocate(&self, name: &str) -> Result<Output> {
        self.az(
            &["vm", "deallocate", "-g", self.rg(), "-n", name],
            "vm deallocate",
        )
        .await
    }

    async fn delete(&self, name: &str) -> Result<Output> {
        self.az(
            &["vm", "delete", "-g", self.rg(), "-n", name, "--yes"],
            "vm delete",
        )
        .await
    }
}

impl<R: CommandRunner> CloudNetwork for AzCliProvisioner<R> {
    async fn subnet(&self) -> Result<Output> {
        self.az(
            &[
                "network",
                "vnet",
                "subnet",
                "show",
                "-g",
                self.target.vnet_resource_group.as_str(),
                "--vnet-name",
                self.target.vnet_name.as_str(),
                "-n",
                self.target.subnet_name.as_str(),
            ],
            "network vnet subnet show",
        )
        .await
    }

    async fn create_nic(&self, nic_name: &str, subnet_id: &str, private_ip: &str) -> Result<Output> {
        self.az(
            &[
                "network",
                "nic",
                "create",
                "-g",
                self.rg(),
                "-n",
                nic_name,
                "--location",
                self.target.location.as_str(),
                "--subnet",
                subnet_id,
                "--private-ip-address",
                private_ip,
            ],
            "network nic create",
        )
        .await
    }

    async fn show_nic(&self, nic_name: &str) -> Result<Output> {
        self.az(
            &["network", "nic", "show", "-g", self.rg(), "-n", nic_name],
            "network nic show",
        )
        .await
    }

    async fn delete_nic(&self, nic_name: &str) -> Result<Output> {
        self.az(
            &["network", "nic", "delete", "-g", self.rg(), "-n", nic_name],
            "network nic delete",
        )
        .await
    }

    async fn delete_disk(&self, disk_name: &str) -> Result<Output> {
        self.az(
            &["disk", "delete", "-g", self.rg(), "-n", disk_name, "--yes"],
            "disk delete",
        )
        .await
    }
}

impl<R: CommandRunner> CloudRunCommand for AzCliProvisioner<R> {
    async fn run_shell(&self, name: &str, script: &str) -> Result<Output> {
        self.az(
            &[
                "vm",
                "run-command",
                "invoke",
                "-g",
                self.rg(),
                "-n",
                name,
                "--command-id",
                "RunShellScript",
                "--scripts",
                script,
            ],
            "vm run-command invoke",
        )
        .await
    }
}
