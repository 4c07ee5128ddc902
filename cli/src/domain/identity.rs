//! Workspace identity derivation.
//!
//! Every cloud-visible name is derived from `(tenant, workspace)` by the
//! functions below. The scheme is fixed: existing VMs, contexts and routing
//! files are located by recomputing these names, so any change orphans them.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Maximum length of any derived name (cloud VM name limit).
pub const MAX_NAME_LEN: usize = 64;

/// A tenant's workspace, the unit that owns one VM and one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceIdentity {
    pub tenant: String,
    pub workspace: String,
}

impl WorkspaceIdentity {
    #[must_use]
    pub fn new(tenant: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            workspace: workspace.into(),
        }
    }

    /// Cloud VM name, e.g. `vm-alice-blog`.
    #[must_use]
    pub fn vm_name(&self) -> String {
        bounded(&format!(
            "vm-{}-{}",
            slug(&self.tenant),
            slug(&self.workspace)
        ))
    }

    /// Remote execution context name, e.g. `ctx-alice-blog`.
    #[must_use]
    pub fn context_name(&self) -> String {
        bounded(&format!(
            "ctx-{}-{}",
            slug(&self.tenant),
            slug(&self.workspace)
        ))
    }

    /// Compose project name. Also the deployment name used for routing.
    #[must_use]
    pub fn project_name(&self) -> String {
        let name = bounded(&slug(&self.workspace));
        if name.is_empty() {
            let digest = Sha256::digest(self.workspace.as_bytes());
            let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
            format!("ws-{hex}")
        } else {
            name
        }
    }

    /// Lock/store key. Workspace lookups are case-insensitive.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.tenant.to_lowercase(),
            self.workspace.to_lowercase()
        )
    }

    #[must_use]
    pub fn names(&self) -> DerivedNames {
        DerivedNames {
            vm_name: self.vm_name(),
            context_name: self.context_name(),
            project_name: self.project_name(),
            key: self.key(),
        }
    }
}

/// Every name derived from one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedNames {
    pub vm_name: String,
    pub context_name: String,
    pub project_name: String,
    pub key: String,
}

impl std::fmt::Display for WorkspaceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant, self.workspace)
    }
}

/// ASCII-lowercase `s` and keep only `[a-z0-9-]`.
#[must_use]
pub fn slug(s: &str) -> String {
    s.chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

fn bounded(s: &str) -> String {
    // slug output is ASCII, so byte truncation is char truncation
    let cut = &s[..s.len().min(MAX_NAME_LEN)];
    cut.trim_end_matches('-').to_string()
}
