//! VM provisioner operations: inspect, create, start, stop, delete and
//! out-of-band command execution.
//!
//! Interprets the raw cloud CLI output returned by the port traits.
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::process::Output;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use spotdeploy_common::{OrchestratorConfig, PriorityClass, VmRecord, VmStatus};
use tokio_util::sync::CancellationToken;

use super::pause;
use crate::application::ports::{
    CloudNetwork, CloudProvisioner, CloudRunCommand, CloudVm, SecretsResolver, VmSpec,
};
use crate::domain::bootstrap;
use crate::domain::error::VmError;
use crate::domain::network::{StaticIp, assign_static_ip};

/// Outcome of a failed cloud call.
enum CallFailure {
    NotFound,
    Other(String),
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn failure(output: &Output) -> CallFailure {
    let stderr = stderr_of(output);
    if stderr.contains("ResourceNotFound")
        || stderr.contains("was not found")
        || stderr.contains("could not be found")
    {
        CallFailure::NotFound
    } else {
        CallFailure::Other(stderr)
    }
}

fn parse_json(output: &Output, what: &str) -> Result<Value> {
    serde_json::from_slice(&output.stdout).with_context(|| format!("parsing {what} output"))
}

fn info_unavailable(name: &str, reason: impl Into<String>) -> VmError {
    VmError::InfoUnavailable {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Last path segment of a cloud resource id.
fn resource_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Check if the VM exists.
///
/// # Errors
///
/// Returns [`VmError::InfoUnavailable`] when the cloud cannot be queried.
pub async fn exists(cloud: &impl CloudVm, name: &str) -> Result<bool, VmError> {
    Ok(get_status(cloud, name).await?.is_some())
}

/// Current power state, or `None` when the VM does not exist.
///
/// # Errors
///
/// Returns [`VmError::InfoUnavailable`] on any failure other than not-found.
pub async fn get_status(cloud: &impl CloudVm, name: &str) -> Result<Option<VmStatus>, VmError> {
    let output = cloud
        .instance_view(name)
        .await
        .map_err(|e| info_unavailable(name, format!("{e:#}")))?;
    if !output.status.success() {
        return match failure(&output) {
            CallFailure::NotFound => Ok(None),
            CallFailure::Other(reason) => Err(info_unavailable(name, reason)),
        };
    }
    let view = parse_json(&output, "instance view").map_err(|e| info_unavailable(name, format!("{e:#}")))?;
    Ok(Some(power_state(&view)))
}

fn power_state(view: &Value) -> VmStatus {
    let statuses = view
        .pointer("/instanceView/statuses")
        .or_else(|| view.get("statuses"))
        .and_then(Value::as_array);
    let codes: Vec<&str> = statuses
        .into_iter()
        .flatten()
        .filter_map(|s| s.get("code").and_then(Value::as_str))
        .collect();
    if let Some(code) = codes.iter().find(|c| c.starts_with("PowerState/")) {
        return VmStatus::from_power_state(code);
    }
    if codes
        .iter()
        .any(|c| c.eq_ignore_ascii_case("ProvisioningState/creating"))
    {
        return VmStatus::Provisioning;
    }
    VmStatus::Unknown
}

/// Parts of the VM document needed beyond the record itself.
struct VmDocument {
    record: VmRecord,
    nic_name: Option<String>,
    os_disk: Option<String>,
}

async fn show(cloud: &impl CloudVm, name: &str) -> Result<Option<Value>, VmError> {
    let output = cloud
        .show(name)
        .await
        .map_err(|e| info_unavailable(name, format!("{e:#}")))?;
    if !output.status.success() {
        return match failure(&output) {
            CallFailure::NotFound => Ok(None),
            CallFailure::Other(reason) => Err(info_unavailable(name, reason)),
        };
    }
    parse_json(&output, "vm show")
        .map(Some)
        .map_err(|e| info_unavailable(name, format!("{e:#}")))
}

async fn nic_ip(cloud: &impl CloudNetwork, name: &str, nic_name: &str) -> Result<String, VmError> {
    let output = cloud
        .show_nic(nic_name)
        .await
        .map_err(|e| info_unavailable(name, format!("{e:#}")))?;
    if !output.status.success() {
        return Err(info_unavailable(name, stderr_of(&output)));
    }
    let nic = parse_json(&output, "nic show").map_err(|e| info_unavailable(name, format!("{e:#}")))?;
    nic.pointer("/ipConfigurations/0/privateIPAddress")
        .or_else(|| nic.pointer("/ipConfigurations/0/privateIpAddress"))
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| info_unavailable(name, format!("no private IP on {nic_name}")))
}

async fn document(
    cloud: &impl CloudProvisioner,
    config: &OrchestratorConfig,
    name: &str,
) -> Result<Option<VmDocument>, VmError> {
    let Some(vm) = show(cloud, name).await? else {
        return Ok(None);
    };
    let Some(status) = get_status(cloud, name).await? else {
        // deleted between the two calls
        return Ok(None);
    };

    let nic_id = vm
        .pointer("/networkProfile/networkInterfaces/0/id")
        .and_then(Value::as_str);
    let nic_name = nic_id.map(|id| resource_name(id).to_string());
    let private_ip = match &nic_name {
        Some(nic) => nic_ip(cloud, name, nic).await?,
        None => String::new(),
    };
    let text = |pointer: &str| vm.pointer(pointer).and_then(Value::as_str).map(String::from);
    let created_at = text("/timeCreated")
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map_or_else(Utc::now, |t| t.with_timezone(&Utc));

    let record = VmRecord {
        vm_name: name.to_string(),
        resource_id: text("/id").unwrap_or_default(),
        resource_group: config.resource_group.clone(),
        location: text("/location").unwrap_or_else(|| config.location.clone()),
        size: text("/hardwareProfile/vmSize").unwrap_or_default(),
        private_ip,
        status,
        priority: text("/priority").map_or(PriorityClass::Regular, |p| PriorityClass::parse(&p)),
        created_at,
        nic_id: nic_id.map(String::from),
    };
    Ok(Some(VmDocument {
        record,
        os_disk: text("/storageProfile/osDisk/name"),
        nic_name,
    }))
}

/// Full VM record, or `None` when the VM does not exist.
///
/// # Errors
///
/// Returns [`VmError::InfoUnavailable`] on any failure other than not-found.
pub async fn get_details(
    cloud: &impl CloudProvisioner,
    config: &OrchestratorConfig,
    name: &str,
) -> Result<Option<VmRecord>, VmError> {
    Ok(document(cloud, config, name).await?.map(|d| d.record))
}

/// Poll the power state until `running`. Failed lookups are retried until
/// the deadline.
///
/// # Errors
///
/// Returns [`VmError::Timeout`] when the configured bound elapses,
/// [`VmError::Cancelled`] when `cancel` fires, or the last inspection error
/// if it fails at the deadline.
pub async fn wait_for_running(
    cloud: &impl CloudVm,
    config: &OrchestratorConfig,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(), VmError> {
    let deadline = tokio::time::Instant::now() + config.running_timeout();
    loop {
        let status = match get_status(cloud, name).await {
            Ok(status) => status,
            Err(VmError::InfoUnavailable { reason, .. }) if tokio::time::Instant::now() < deadline => {
                tracing::warn!(vm = %name, %reason, "VM status unavailable, retrying");
                pause(config.poll_interval(), cancel).await?;
                continue;
            }
            Err(e) => return Err(e),
        };
        if status == Some(VmStatus::Running) {
            tracing::info!(vm = %name, "VM is running");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(VmError::Timeout {
                name: name.to_string(),
                secs: config.running_timeout_secs,
            });
        }
        tracing::debug!(vm = %name, ?status, "waiting for VM to run");
        pause(config.poll_interval(), cancel).await?;
    }
}

/// Create a spot VM with a deterministic static IP and wait for it to run.
///
/// An existing VM is returned as-is. A missing `ssh_key` is resolved from
/// the secrets store.
///
/// # Errors
///
/// Returns [`VmError::CreationFailed`] wrapping the cause for any cloud
/// failure, [`VmError::Timeout`] if the VM never reaches `running`.
pub async fn create(
    cloud: &impl CloudProvisioner,
    secrets: &impl SecretsResolver,
    config: &OrchestratorConfig,
    name: &str,
    size: &str,
    ssh_key: Option<&str>,
    cancel: &CancellationToken,
) -> Result<VmRecord, VmError> {
    if let Some(existing) = get_details(cloud, config, name).await? {
        tracing::warn!(vm = %name, "VM already exists, returning its details");
        return Ok(existing);
    }

    let creation_failed = |source: anyhow::Error| VmError::CreationFailed {
        name: name.to_string(),
        source,
    };

    let ssh_key = match ssh_key {
        Some(key) => key.to_string(),
        None => secrets
            .ssh_public_key()
            .await
            .context("resolving SSH public key")
            .map_err(creation_failed)?,
    };

    let (subnet_id, prefix) = subnet(cloud).await.map_err(creation_failed)?;
    let private_ip = match assign_static_ip(name, &prefix, config.reserved_hosts) {
        StaticIp::Derived(ip) => ip,
        StaticIp::Fallback { ip, reason } => {
            tracing::warn!(vm = %name, %ip, %reason, "subnet unusable, using fallback address");
            ip
        }
    }
    .to_string();

    let nic_name = format!("{name}-nic");
    tracing::info!(vm = %name, nic = %nic_name, ip = %private_ip, "creating network interface");
    let output = cloud
        .create_nic(&nic_name, &subnet_id, &private_ip)
        .await
        .map_err(creation_failed)?;
    if !output.status.success() {
        return Err(creation_failed(anyhow::anyhow!(
            "network interface creation failed: {}",
            stderr_of(&output)
        )));
    }

    tracing::info!(vm = %name, %size, "creating spot VM");
    let custom_data = bootstrap::cloud_init(&config.admin_username);
    let spec = VmSpec {
        name,
        size,
        admin_username: &config.admin_username,
        ssh_public_key: &ssh_key,
        nic_name: &nic_name,
        custom_data: &custom_data,
    };
    let created = match cloud.create(&spec).await {
        Ok(o) if o.status.success() => Ok(()),
        Ok(o) => Err(anyhow::anyhow!("VM creation failed: {}", stderr_of(&o))),
        Err(e) => Err(e),
    };
    if let Err(e) = created {
        // The NIC holds the static IP; leaving it would block the next create.
        delete_nic(cloud, name, &nic_name).await;
        return Err(creation_failed(e));
    }

    wait_for_running(cloud, config, name, cancel).await?;

    let record = get_details(cloud, config, name)
        .await?
        .ok_or_else(|| creation_failed(anyhow::anyhow!("VM vanished after creation")))?;
    tracing::info!(vm = %name, ip = %record.private_ip, "spot VM created");
    Ok(record)
}

async fn subnet(cloud: &impl CloudNetwork) -> Result<(String, String)> {
    let output = cloud.subnet().await?;
    anyhow::ensure!(
        output.status.success(),
        "subnet lookup failed: {}",
        stderr_of(&output)
    );
    let subnet = parse_json(&output, "subnet show")?;
    let id = subnet
        .get("id")
        .and_then(Value::as_str)
        .context("subnet has no id")?
        .to_string();
    let prefix = subnet
        .get("addressPrefix")
        .and_then(Value::as_str)
        .or_else(|| subnet.pointer("/addressPrefixes/0").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    Ok((id, prefix))
}

/// Start a stopped or deallocated VM and wait until it runs.
///
/// # Errors
///
/// Returns [`VmError::OperationFailed`] if the start call fails, or any
/// error from [`wait_for_running`].
pub async fn start(
    cloud: &impl CloudVm,
    config: &OrchestratorConfig,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(), VmError> {
    tracing::info!(vm = %name, "starting VM");
    let output = cloud
        .start(name)
        .await
        .map_err(|e| operation_failed("start", name, format!("{e:#}")))?;
    if !output.status.success() {
        return Err(operation_failed("start", name, stderr_of(&output)));
    }
    wait_for_running(cloud, config, name, cancel).await
}

/// Deallocate the VM. Returns `false` when it does not exist.
///
/// # Errors
///
/// Returns [`VmError::OperationFailed`] if the cloud rejects the call.
pub async fn stop(cloud: &impl CloudVm, name: &str) -> Result<bool, VmError> {
    if !exists(cloud, name).await? {
        tracing::info!(vm = %name, "VM does not exist, nothing to stop");
        return Ok(false);
    }
    tracing::info!(vm = %name, "deallocating VM");
    let output = cloud
        .deallocate(name)
        .await
        .map_err(|e| operation_failed("deallocate", name, format!("{e:#}")))?;
    if !output.status.success() {
        return Err(operation_failed("deallocate", name, stderr_of(&output)));
    }
    Ok(true)
}

/// Delete the VM, then its OS disk and NIC. Returns `false` when the VM
/// does not exist; a NIC left behind by a failed create is still removed.
///
/// Disk and NIC removal are independent and best-effort.
///
/// # Errors
///
/// Returns [`VmError::OperationFailed`] if the VM itself cannot be deleted.
pub async fn delete(
    cloud: &impl CloudProvisioner,
    config: &OrchestratorConfig,
    name: &str,
) -> Result<bool, VmError> {
    let Some(doc) = document(cloud, config, name).await? else {
        let nic = format!("{name}-nic");
        if cloud.show_nic(&nic).await.is_ok_and(|o| o.status.success()) {
            tracing::info!(vm = %name, %nic, "VM does not exist, removing orphaned network interface");
            delete_nic(cloud, name, &nic).await;
        } else {
            tracing::info!(vm = %name, "VM does not exist, nothing to delete");
        }
        return Ok(false);
    };

    tracing::info!(vm = %name, "deleting VM");
    let output = cloud
        .delete(name)
        .await
        .map_err(|e| operation_failed("delete", name, format!("{e:#}")))?;
    if !output.status.success() {
        return Err(operation_failed("delete", name, stderr_of(&output)));
    }

    if let Some(disk) = &doc.os_disk {
        match cloud.delete_disk(disk).await {
            Ok(o) if o.status.success() => tracing::info!(vm = %name, %disk, "deleted OS disk"),
            Ok(o) => tracing::warn!(vm = %name, %disk, error = %stderr_of(&o), "failed to delete OS disk"),
            Err(e) => tracing::warn!(vm = %name, %disk, error = %e, "failed to delete OS disk"),
        }
    }
    let nic = doc.nic_name.unwrap_or_else(|| format!("{name}-nic"));
    delete_nic(cloud, name, &nic).await;
    Ok(true)
}

/// Best-effort NIC removal.
async fn delete_nic(cloud: &impl CloudNetwork, name: &str, nic: &str) {
    match cloud.delete_nic(nic).await {
        Ok(o) if o.status.success() => tracing::info!(vm = %name, %nic, "deleted network interface"),
        Ok(o) => tracing::warn!(vm = %name, %nic, error = %stderr_of(&o), "failed to delete network interface"),
        Err(e) => tracing::warn!(vm = %name, %nic, error = %e, "failed to delete network interface"),
    }
}

/// Run `script` through the cloud command API and return its stdout.
///
/// Returns `None` when the command could not be run.
pub async fn run_command(cloud: &impl CloudRunCommand, name: &str, script: &str) -> Option<String> {
    let output = match cloud.run_shell(name, script).await {
        Ok(o) if o.status.success() => o,
        Ok(o) => {
            tracing::warn!(vm = %name, %script, error = %stderr_of(&o), "run-command failed");
            return None;
        }
        Err(e) => {
            tracing::warn!(vm = %name, %script, error = %e, "run-command failed");
            return None;
        }
    };
    let result = serde_json::from_slice::<Value>(&output.stdout).ok()?;
    let message = result.pointer("/value/0/message").and_then(Value::as_str)?;
    Some(run_command_stdout(message))
}

/// Extract the `[stdout]` section of a run-command message.
fn run_command_stdout(message: &str) -> String {
    let Some((_, after)) = message.split_once("[stdout]") else {
        return message.trim().to_string();
    };
    let stdout = after.split_once("[stderr]").map_or(after, |(out, _)| out);
    stdout.trim().to_string()
}

fn operation_failed(operation: &'static str, name: &str, reason: String) -> VmError {
    VmError::OperationFailed {
        operation,
        name: name.to_string(),
        reason,
    }
}
