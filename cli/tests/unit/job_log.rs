//! The job runner writing to the on-disk job log.

#![allow(clippy::unwrap_used)]

use spotdeploy_cli::application::services::job::run_job;
use spotdeploy_cli::domain::error::{DeployError, FailureClass};
use spotdeploy_cli::infra::jobs::JsonlJobSink;
use spotdeploy_common::{JobMetadata, JobStatus, JobUpdate, Stage};
use tempfile::TempDir;

fn read_log(dir: &TempDir, job_id: &str) -> Vec<JobUpdate> {
    let path = dir.path().join("jobs").join(format!("{job_id}.jsonl"));
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn failed_build_is_logged_with_its_stage() {
    let dir = TempDir::new().unwrap();
    let sink = JsonlJobSink::in_dir(dir.path());
    let metadata = run_job(&sink, "job-7", async {
        Err::<JobMetadata, _>(anyhow::Error::from(DeployError::BuildFailed {
            output: "npm ERR! missing script: build".into(),
            class: FailureClass::Project,
        }))
    })
    .await;
    assert_eq!(
        metadata,
        JobMetadata::Failed {
            stage: Stage::Build,
            message: "npm ERR! missing script: build".into(),
        }
    );

    let log = read_log(&dir, "job-7");
    let statuses: Vec<JobStatus> = log.iter().map(|u| u.status).collect();
    assert_eq!(
        statuses,
        [JobStatus::Pending, JobStatus::Running, JobStatus::Failed]
    );
    assert_eq!(log[2].metadata.as_ref(), Some(&metadata));
}

#[tokio::test]
async fn unknown_errors_are_reported_generically() {
    let dir = TempDir::new().unwrap();
    let sink = JsonlJobSink::in_dir(dir.path());
    let metadata = run_job(&sink, "job-8", async {
        Err::<JobMetadata, _>(anyhow::anyhow!("database password is hunter2"))
    })
    .await;
    assert_eq!(metadata, JobMetadata::internal());
    let log = read_log(&dir, "job-8");
    let text = serde_json::to_string(&log).unwrap();
    assert!(!text.contains("hunter2"));
}

#[tokio::test]
async fn an_unwritable_log_does_not_fail_the_job() {
    let dir = TempDir::new().unwrap();
    // a file where the jobs directory should be
    std::fs::write(dir.path().join("jobs"), "").unwrap();
    let sink = JsonlJobSink::in_dir(dir.path());
    let metadata = run_job(&sink, "job-9", async {
        Ok::<_, anyhow::Error>(JobMetadata::Deployed {
            project_name: "blog".into(),
            private_ip: "10.0.0.95".into(),
            urls: vec!["https://blog-web.apps.example.com".into()],
        })
    })
    .await;
    assert!(metadata.is_success());
}
