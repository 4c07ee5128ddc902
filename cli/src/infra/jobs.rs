//! Infrastructure implementation of the `JobStatusSink` port.
//!
//! Appends one JSON line per update to `<state_dir>/jobs/<job_id>.jsonl`,
//! where the job tracker (or an operator) can follow it.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use spotdeploy_common::JobUpdate;

use crate::application::ports::JobStatusSink;

pub struct JsonlJobSink {
    dir: PathBuf,
}

impl JsonlJobSink {
    #[must_use]
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("jobs"),
        }
    }

    fn path(&self, job_id: &str) -> Result<PathBuf> {
        anyhow::ensure!(
            !job_id.is_empty()
                && job_id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "invalid job id: {job_id:?}"
        );
        Ok(self.dir.join(format!("{job_id}.jsonl")))
    }
}

impl JobStatusSink for JsonlJobSink {
    async fn update(&self, update: &JobUpdate) -> Result<()> {
        let path = self.path(&update.job_id)?;
        let mut line = serde_json::to_string(update).context("serializing job update")?;
        line.push('\n');
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            file.write_all(line.as_bytes())
                .with_context(|| format!("appending to {}", path.display()))
        })
        .await
        .context("job update task panicked")?
    }
}
