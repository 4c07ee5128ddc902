//! Local implementations of the classifier ports.
//!
//! Port and build-failure classification are external services in
//! production deployments. These implementations answer the same questions
//! with a compose-file heuristic and a keyword match, so the CLI works
//! without one.

use std::sync::LazyLock;

use anyhow::Result;
use regex::RegexSet;
use spotdeploy_common::ServicePorts;

use crate::application::ports::{BuildFailureClassifier, PortClassifier};
use crate::domain::compose::published_ports;
use crate::domain::error::FailureClass;

/// Ports published on all interfaces in the compose file.
pub struct ComposePortClassifier;

impl PortClassifier for ComposePortClassifier {
    async fn classify(&self, compose: &serde_yaml::Value) -> Result<ServicePorts> {
        Ok(published_ports(compose)?)
    }
}

/// Build output fragments that point at the platform rather than the project.
const INFRASTRUCTURE_PATTERNS: &[&str] = &[
    r"(?i)no space left on device",
    r"(?i)connection refused",
    r"(?i)connection reset by peer",
    r"(?i)i/o timeout",
    r"(?i)tls handshake timeout",
    r"(?i)toomanyrequests",
    r"(?i)cannot connect to the docker daemon",
    r"(?i)context deadline exceeded",
    r"(?i)temporary failure in name resolution",
    r"(?i)unexpected eof",
    r"(?i)error during connect",
    r"(?i)^ssh: ",
];

static INFRASTRUCTURE: LazyLock<Option<RegexSet>> = LazyLock::new(|| {
    RegexSet::new(INFRASTRUCTURE_PATTERNS.iter().map(|p| format!("(?m){p}"))).ok()
});

/// Classifies by matching known infrastructure failure messages.
pub struct KeywordFailureClassifier;

impl KeywordFailureClassifier {
    #[must_use]
    pub fn classify_sync(build_output: &str) -> FailureClass {
        match INFRASTRUCTURE.as_ref() {
            Some(set) if set.is_match(build_output) => FailureClass::Infrastructure,
            _ => FailureClass::Project,
        }
    }
}

impl BuildFailureClassifier for KeywordFailureClassifier {
    async fn classify(&self, build_output: &str) -> Result<FailureClass> {
        let class = Self::classify_sync(build_output);
        tracing::debug!(?class, "classified build failure");
        Ok(class)
    }
}
