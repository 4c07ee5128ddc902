//! Application service - remote execution context binding.
//!
//! Maps a workspace to a named container-runtime endpoint reached over SSH.
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::process::Output;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::application::ports::{ContextStore, KnownHosts, WorkspaceStore};
use crate::domain::error::ContextError;
use crate::domain::identity::WorkspaceIdentity;

/// A bound context: its name and the VM address it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundContext {
    pub context_name: String,
    pub ip: String,
}

fn ssh_host(admin_username: &str, ip: &str) -> String {
    format!("ssh://{admin_username}@{ip}")
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Docker endpoint recorded in `context inspect` output.
fn inspected_host(output: &Output) -> Option<String> {
    let doc: Value = serde_json::from_slice(&output.stdout).ok()?;
    doc.pointer("/0/Endpoints/docker/Host")
        .and_then(Value::as_str)
        .map(String::from)
}

/// Make sure a context for the workspace exists and points at its VM.
///
/// Stale host keys for the VM address are purged first, since a recreated
/// VM reuses the address with a new key. A context pointing elsewhere is
/// replaced.
///
/// # Errors
///
/// Returns [`ContextError::NotFound`] when no VM is recorded for the
/// workspace and [`ContextError::ContextSetFailed`] when the context cannot
/// be created. The persisted VM record is never modified.
pub async fn ensure_context(
    store: &impl WorkspaceStore,
    runtime: &impl ContextStore,
    known_hosts: &impl KnownHosts,
    admin_username: &str,
    id: &WorkspaceIdentity,
) -> Result<BoundContext> {
    let record = store
        .vm_record(id)
        .await
        .context("reading VM record")?
        .ok_or_else(|| ContextError::NotFound(id.to_string()))?;
    let context_name = id.context_name();
    let host = ssh_host(admin_username, &record.private_ip);

    match known_hosts.purge(&record.private_ip).await {
        Ok(0) => {}
        Ok(n) => tracing::info!(ip = %record.private_ip, removed = n, "purged stale host keys"),
        Err(e) => tracing::warn!(ip = %record.private_ip, error = %e, "failed to purge host keys"),
    }

    let set_failed = |reason: String| ContextError::ContextSetFailed {
        context: context_name.clone(),
        reason,
    };

    let inspected = runtime
        .inspect_context(&context_name)
        .await
        .map_err(|e| set_failed(format!("{e:#}")))?;
    if inspected.status.success() {
        match inspected_host(&inspected) {
            Some(current) if current != host => {
                tracing::info!(context = %context_name, %current, wanted = %host, "context points elsewhere, replacing");
                let removed = runtime
                    .remove_context(&context_name)
                    .await
                    .map_err(|e| set_failed(format!("{e:#}")))?;
                if !removed.status.success() {
                    return Err(set_failed(stderr_of(&removed)).into());
                }
            }
            _ => {
                tracing::debug!(context = %context_name, "context already exists");
                return Ok(BoundContext {
                    context_name,
                    ip: record.private_ip,
                });
            }
        }
    }

    tracing::info!(context = %context_name, %host, "creating context");
    let description = format!("Workspace {id}");
    let created = runtime
        .create_context(&context_name, &host, &description)
        .await
        .map_err(|e| set_failed(format!("{e:#}")))?;
    if !created.status.success() {
        let reason = stderr_of(&created);
        tracing::error!(context = %context_name, %reason, "failed to create context");
        return Err(set_failed(reason).into());
    }
    Ok(BoundContext {
        context_name,
        ip: record.private_ip,
    })
}

/// Remove the workspace's context. Returns `false` when there was none.
///
/// # Errors
///
/// Returns an error if an existing context cannot be removed.
pub async fn remove_context(runtime: &impl ContextStore, id: &WorkspaceIdentity) -> Result<bool> {
    let context_name = id.context_name();
    let inspected = runtime.inspect_context(&context_name).await?;
    if !inspected.status.success() {
        tracing::debug!(context = %context_name, "context does not exist");
        return Ok(false);
    }
    let removed = runtime.remove_context(&context_name).await?;
    anyhow::ensure!(
        removed.status.success(),
        "failed to remove context {context_name}: {}",
        stderr_of(&removed)
    );
    tracing::info!(context = %context_name, "context removed");
    Ok(true)
}
