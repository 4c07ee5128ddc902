//! Application service - job runner.
//!
//! Wraps a unit of work with status reports to the job tracker and turns
//! its error into caller-facing metadata. Typed errors map to their stage;
//! anything else is logged and reported as an internal error.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::future::Future;

use anyhow::Result;
use spotdeploy_common::{JobMetadata, JobStatus, JobUpdate, Stage, StageResult};

use crate::application::ports::{JobStatusSink, StageObserver};
use crate::domain::error::{ContextError, DeployError, FailureClass, VmError};

/// Characters of build output kept in caller-facing metadata.
const OUTPUT_TAIL: usize = 2000;

async fn send(sink: &impl JobStatusSink, update: JobUpdate) {
    if let Err(e) = sink.update(&update).await {
        tracing::warn!(job = %update.job_id, status = ?update.status, error = %e, "failed to report job status");
    }
}

/// Run `work` as job `job_id`: report pending, running, then completed or
/// failed with the resulting metadata. Job tracker failures are logged and
/// never affect the work.
pub async fn run_job<F>(sink: &impl JobStatusSink, job_id: &str, work: F) -> JobMetadata
where
    F: Future<Output = Result<JobMetadata>>,
{
    let update = |status: JobStatus, metadata: Option<JobMetadata>| JobUpdate {
        job_id: job_id.to_string(),
        status,
        stage: None,
        metadata,
    };
    send(sink, update(JobStatus::Pending, None)).await;
    send(sink, update(JobStatus::Running, None)).await;

    let (status, metadata) = match work.await {
        Ok(metadata) => {
            tracing::info!(job = %job_id, "job completed");
            (JobStatus::Completed, metadata)
        }
        Err(e) => {
            let metadata = classify_error(&e);
            tracing::warn!(job = %job_id, ?metadata, "job failed");
            (JobStatus::Failed, metadata)
        }
    };
    send(sink, update(status, Some(metadata.clone()))).await;
    metadata
}

/// Map an error to what the caller is told.
///
/// Infrastructure-side failures become `ServerError`, failures attributable
/// to the request or project become `Failed`. Unknown errors are logged in
/// full and reported only as an internal error.
#[must_use]
pub fn classify_error(error: &anyhow::Error) -> JobMetadata {
    if let Some(e) = error.downcast_ref::<DeployError>() {
        return match e {
            DeployError::BuildFailed { output, class } => {
                let message = tail(output);
                match class {
                    FailureClass::Infrastructure => JobMetadata::ServerError {
                        stage: Stage::Build,
                        message,
                    },
                    FailureClass::Project => JobMetadata::Failed {
                        stage: Stage::Build,
                        message,
                    },
                }
            }
            other => JobMetadata::Failed {
                stage: other.stage(),
                message: other.to_string(),
            },
        };
    }
    if let Some(e) = error.downcast_ref::<VmError>() {
        return match e {
            VmError::NotFound(_) | VmError::Cancelled => JobMetadata::Failed {
                stage: e.stage(),
                message: e.to_string(),
            },
            VmError::InfoUnavailable { .. }
            | VmError::CreationFailed { .. }
            | VmError::Timeout { .. }
            | VmError::OperationFailed { .. }
            | VmError::NotReady { .. } => JobMetadata::ServerError {
                stage: e.stage(),
                message: e.to_string(),
            },
        };
    }
    if let Some(e) = error.downcast_ref::<ContextError>() {
        return JobMetadata::Failed {
            stage: Stage::Context,
            message: e.to_string(),
        };
    }
    tracing::error!(error = %format!("{error:#}"), "internal error");
    JobMetadata::internal()
}

/// Last [`OUTPUT_TAIL`] characters, on a char boundary.
fn tail(output: &str) -> String {
    let count = output.chars().count();
    if count <= OUTPUT_TAIL {
        return output.to_string();
    }
    output.chars().skip(count - OUTPUT_TAIL).collect()
}

/// Forwards every stage result to the job tracker.
pub struct JobStageObserver<'a, S: JobStatusSink> {
    pub sink: &'a S,
    pub job_id: &'a str,
}

impl<S: JobStatusSink> StageObserver for JobStageObserver<'_, S> {
    async fn stage(&self, result: &StageResult) {
        send(
            self.sink,
            JobUpdate {
                job_id: self.job_id.to_string(),
                status: JobStatus::Running,
                stage: Some(result.clone()),
                metadata: None,
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::test_support::MemoryJobs;

    fn statuses(jobs: &MemoryJobs) -> Vec<JobStatus> {
        jobs.updates.lock().unwrap().iter().map(|u| u.status).collect()
    }

    #[tokio::test]
    async fn successful_job_reports_completed_with_metadata() {
        let jobs = MemoryJobs::default();
        let meta = run_job(&jobs, "job-1", async {
            Ok(JobMetadata::Deployed {
                project_name: "blog".into(),
                private_ip: "10.0.0.95".into(),
                urls: vec!["https://blog-web.apps.example.com".into()],
            })
        })
        .await;
        assert!(meta.is_success());
        assert_eq!(
            statuses(&jobs),
            [JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
        );
        assert_eq!(jobs.updates.lock().unwrap()[2].metadata, Some(meta));
    }

    #[tokio::test]
    async fn infrastructure_build_failure_is_server_error() {
        let jobs = MemoryJobs::default();
        let meta = run_job(&jobs, "job-2", async {
            Err(DeployError::BuildFailed {
                output: "no space left on device".into(),
                class: FailureClass::Infrastructure,
            }
            .into())
        })
        .await;
        assert_eq!(
            meta,
            JobMetadata::ServerError {
                stage: Stage::Build,
                message: "no space left on device".into()
            }
        );
        assert_eq!(statuses(&jobs).last(), Some(&JobStatus::Failed));
    }

    #[test]
    fn project_build_failure_is_plain_failure() {
        let err = anyhow::Error::from(DeployError::BuildFailed {
            output: "npm ERR! missing script: build".into(),
            class: FailureClass::Project,
        });
        assert!(matches!(
            classify_error(&err),
            JobMetadata::Failed {
                stage: Stage::Build,
                ..
            }
        ));
    }

    #[test]
    fn typed_errors_keep_their_stage_through_context() {
        let err = anyhow::Error::from(VmError::NotReady {
            name: "vm-a-b".into(),
            attempts: 15,
        })
        .context("waiting for VM");
        assert_eq!(
            classify_error(&err),
            JobMetadata::ServerError {
                stage: Stage::Readiness,
                message: "VM 'vm-a-b' not ready after 15 attempts".into()
            }
        );
        let err = anyhow::Error::from(DeployError::NoExposedPorts);
        assert!(matches!(
            classify_error(&err),
            JobMetadata::Failed {
                stage: Stage::Ports,
                ..
            }
        ));
    }

    #[test]
    fn unknown_errors_hide_detail() {
        let err = anyhow::anyhow!("disk /dev/sda1 exploded at 0xdeadbeef");
        assert_eq!(classify_error(&err), JobMetadata::internal());
    }

    #[test]
    fn long_output_is_truncated_to_its_tail() {
        let output = format!("{}END", "x".repeat(5000));
        let t = tail(&output);
        assert_eq!(t.chars().count(), OUTPUT_TAIL);
        assert!(t.ends_with("END"));
    }
}
