use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally reachable ports per compose service, ordered by service name.
pub type ServicePorts = BTreeMap<String, Vec<u16>>;

/// Lifecycle state of a workspace VM as reported by the cloud provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Provisioning,
    Running,
    Stopped,
    Deallocated,
    Evicted,
    Deleted,
    #[default]
    Unknown,
}

impl VmStatus {
    /// Map a cloud power-state code (`PowerState/running`, `deallocated`, ...)
    /// onto a status. Transitional states collapse onto their destination.
    #[must_use]
    pub fn from_power_state(code: &str) -> Self {
        let state = code.rsplit('/').next().unwrap_or(code);
        match state.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "starting" | "creating" => Self::Provisioning,
            "stopped" | "stopping" => Self::Stopped,
            "deallocated" | "deallocating" => Self::Deallocated,
            "evicted" => Self::Evicted,
            "deleting" | "deleted" => Self::Deleted,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// Stopped, deallocated and evicted VMs can be brought back with a start call.
    #[must_use]
    pub fn is_startable(self) -> bool {
        matches!(self, Self::Stopped | Self::Deallocated | Self::Evicted)
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deallocated => "deallocated",
            Self::Evicted => "evicted",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Billing priority of a VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    #[default]
    Spot,
    Regular,
    Low,
}

impl PriorityClass {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "regular" => Self::Regular,
            "low" => Self::Low,
            _ => Self::Spot,
        }
    }
}

/// Mirror of a cloud VM, persisted onto the owning workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmRecord {
    pub vm_name: String,
    /// Full cloud resource id.
    pub resource_id: String,
    pub resource_group: String,
    pub location: String,
    pub size: String,
    pub private_ip: String,
    pub status: VmStatus,
    #[serde(default)]
    pub priority: PriorityClass,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nic_id: Option<String>,
}

/// What `allocate_or_reuse` hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmAllocation {
    pub private_ip: String,
    pub vm_name: String,
    pub status: VmStatus,
}

impl From<&VmRecord> for VmAllocation {
    fn from(record: &VmRecord) -> Self {
        Self {
            private_ip: record.private_ip.clone(),
            vm_name: record.vm_name.clone(),
            status: record.status,
        }
    }
}

/// Pipeline stage identifiers, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Allocate,
    Readiness,
    Cleanup,
    Context,
    Ports,
    Logging,
    Build,
    Deploy,
    Routing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allocate => "allocate",
            Self::Readiness => "readiness",
            Self::Cleanup => "cleanup",
            Self::Context => "context",
            Self::Ports => "ports",
            Self::Logging => "logging",
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Routing => "routing",
        };
        f.write_str(s)
    }
}

/// Outcome of a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Succeeded {
        stage: Stage,
        message: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        metadata: BTreeMap<String, serde_json::Value>,
    },
    Failed {
        stage: Stage,
        message: String,
        error: String,
    },
}

impl StageResult {
    #[must_use]
    pub fn succeeded(stage: Stage, message: impl Into<String>) -> Self {
        Self::Succeeded {
            stage,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn failed(stage: Stage, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failed {
            stage,
            message: message.into(),
            error: error.into(),
        }
    }

    /// Attach a metadata entry. No-op on a failed result.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let Self::Succeeded { metadata, .. } = &mut self {
            metadata.insert(key.to_string(), value.into());
        }
        self
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Succeeded { stage, .. } | Self::Failed { stage, .. } => *stage,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Succeeded { message, .. } | Self::Failed { message, .. } => message,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Succeeded { .. } => None,
        }
    }
}

/// One published hostname → backend binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingEntry {
    /// Router/service key, e.g. `api1`.
    pub service_name: String,
    pub port: u16,
    pub hostname: String,
    /// `ip:port` of the backend on the private network.
    pub backend: String,
}

impl RoutingEntry {
    #[must_use]
    pub fn backend_url(&self) -> String {
        format!("http://{}", self.backend)
    }

    #[must_use]
    pub fn external_url(&self) -> String {
        format!("https://{}", self.hostname)
    }
}

/// Status values understood by the external job tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Caller-facing job metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobMetadata {
    /// VM allocated (and ready, when readiness was awaited).
    Allocated { vm: VmAllocation },
    /// Deployment went live; `urls` lists every published endpoint.
    Deployed {
        project_name: String,
        private_ip: String,
        urls: Vec<String>,
    },
    /// Known failure attributable to the user's project or request.
    Failed { stage: Stage, message: String },
    /// Known failure attributed to the platform's infrastructure.
    ServerError { stage: Stage, message: String },
    /// Anything unclassified. Detail is only logged.
    InternalError { message: String },
}

impl JobMetadata {
    pub const INTERNAL_ERROR_MESSAGE: &'static str = "internal error, retry later";

    #[must_use]
    pub fn internal() -> Self {
        Self::InternalError {
            message: Self::INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ServerError { .. })
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Allocated { .. } | Self::Deployed { .. })
    }
}

/// A single progress report sent to the job tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobUpdate {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
}
