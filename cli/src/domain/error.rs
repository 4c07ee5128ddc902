//! Typed domain error enums.
//!
//! All error types implement `thiserror::Error` and convert to
//! `anyhow::Error` via the `?` operator. The job runner downcasts them back
//! to decide what the caller is told.

use spotdeploy_common::Stage;
use thiserror::Error;

// ── VM errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum VmError {
    #[error("VM not found for workspace {0}")]
    NotFound(String),

    #[error("VM information unavailable for '{name}': {reason}")]
    InfoUnavailable { name: String, reason: String },

    #[error("failed to create VM '{name}'")]
    CreationFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("VM '{name}' did not reach running within {secs}s")]
    Timeout { name: String, secs: u64 },

    #[error("{operation} failed for VM '{name}': {reason}")]
    OperationFailed {
        operation: &'static str,
        name: String,
        reason: String,
    },

    #[error("VM '{name}' not ready after {attempts} attempts")]
    NotReady { name: String, attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,
}

impl VmError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::NotReady { .. } => Stage::Readiness,
            _ => Stage::Allocate,
        }
    }
}

// ── Context errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no VM recorded for workspace {0}")]
    NotFound(String),

    #[error("failed to create context '{context}': {reason}")]
    ContextSetFailed { context: String, reason: String },
}

// ── Deploy errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("no compose file found in {0}")]
    ComposeFileMissing(String),

    #[error("invalid compose file: {0}")]
    InvalidCompose(String),

    #[error("no externally reachable ports found in the compose file")]
    NoExposedPorts,

    #[error("build failed: {output}")]
    BuildFailed {
        output: String,
        class: FailureClass,
    },

    #[error("deploy failed: {0}")]
    DeployFailed(String),

    /// Logged by the best-effort stages, never returned from a deploy.
    #[error("cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl DeployError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Context(_) => Stage::Context,
            Self::ComposeFileMissing(_) | Self::InvalidCompose(_) | Self::NoExposedPorts => {
                Stage::Ports
            }
            Self::BuildFailed { .. } | Self::Cancelled => Stage::Build,
            Self::DeployFailed(_) => Stage::Deploy,
            Self::CleanupFailed(_) => Stage::Cleanup,
        }
    }
}

/// Who is to blame for a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The platform (disk, network, registry, daemon).
    Infrastructure,
    /// The user's project.
    Project,
}
