//! Application service - publish and withdraw a deployment's routes.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::{Context, Result};
use serde::Serialize;
use spotdeploy_common::{RoutingEntry, ServicePorts};

use crate::application::ports::RouteStore;
use crate::domain::identity::WorkspaceIdentity;
use crate::domain::routing::{
    generate_entries, parse_route_file, removed_hostnames, render_route_file, route_file_owner,
};

/// Outcome of [`publish`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published {
        entries: Vec<RoutingEntry>,
        /// Hostnames served by the previous file and dropped by this one.
        removed: Vec<String>,
    },
    /// The deployment's file belongs to another workspace.
    Refused { owner: String },
}

/// Outcome of [`unpublish`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Unpublished {
    Removed,
    Absent,
    Refused { owner: String },
}

/// Check that an existing routing file may be replaced by `id`.
fn foreign_owner(contents: &str, id: &WorkspaceIdentity) -> Option<String> {
    route_file_owner(contents)
        .filter(|owner| !owner.eq_ignore_ascii_case(&id.key()))
        .map(String::from)
}

/// Generate the routing entries for `ports` and replace the deployment's
/// routing file with them.
///
/// # Errors
///
/// Returns an error if the file cannot be rendered, read or written.
pub async fn publish(
    routes: &impl RouteStore,
    base_domain: &str,
    id: &WorkspaceIdentity,
    private_ip: &str,
    ports: &ServicePorts,
) -> Result<PublishOutcome> {
    let deployment = id.project_name();
    let entries = generate_entries(&deployment, private_ip, ports, base_domain);

    let mut removed = Vec::new();
    if let Some(previous) = routes.read(&deployment).await? {
        if let Some(owner) = foreign_owner(&previous, id) {
            tracing::warn!(%deployment, %owner, workspace = %id, "routing file owned by another workspace, not publishing");
            return Ok(PublishOutcome::Refused { owner });
        }
        match parse_route_file(&previous) {
            Ok(config) => removed = removed_hostnames(&config, &entries),
            Err(e) => tracing::warn!(%deployment, error = %e, "previous routing file unreadable, replacing"),
        }
    }
    for hostname in &removed {
        tracing::info!(%deployment, %hostname, "route removed");
    }

    let contents = render_route_file(&id.key(), &entries).context("rendering routing file")?;
    routes.write(&deployment, &contents).await?;
    tracing::info!(%deployment, routes = entries.len(), "routes published");
    Ok(PublishOutcome::Published { entries, removed })
}

/// Delete the deployment's routing file if `id` owns it.
///
/// # Errors
///
/// Returns an error if the store cannot be read or the file cannot be
/// removed.
pub async fn unpublish(routes: &impl RouteStore, id: &WorkspaceIdentity) -> Result<Unpublished> {
    let deployment = id.project_name();
    let Some(contents) = routes.read(&deployment).await? else {
        return Ok(Unpublished::Absent);
    };
    if let Some(owner) = foreign_owner(&contents, id) {
        tracing::warn!(%deployment, %owner, workspace = %id, "routing file owned by another workspace, not removing");
        return Ok(Unpublished::Refused { owner });
    }
    routes.remove(&deployment).await?;
    tracing::info!(%deployment, "routes removed");
    Ok(Unpublished::Removed)
}
