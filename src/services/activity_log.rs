//! Activity log writer (§6/§7 supplement).
//!
//! Per-task activity log: a text file appended with one line per
//! sub-command attempt. When the job directory the log would live in
//! doesn't exist yet, falls back to a suite-wide log — never fatal,
//! per §7's "absent job directory" error kind.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::domain::TaskId;
use crate::services::process_pool::ProcessContext;

/// Appends activity-log lines for one task, falling back to a
/// suite-level log file if the task's own job directory is absent.
pub struct ActivityLog {
    job_log_dir: PathBuf,
    suite_log_path: PathBuf,
}

impl ActivityLog {
    pub fn new(job_log_dir: impl Into<PathBuf>, suite_log_path: impl Into<PathBuf>) -> Self {
        Self {
            job_log_dir: job_log_dir.into(),
            suite_log_path: suite_log_path.into(),
        }
    }

    fn target_path(&self, task: &TaskId, submit_num: u64) -> (PathBuf, bool) {
        let dir = self
            .job_log_dir
            .join(&task.cycle_point)
            .join(&task.name)
            .join(format!("{submit_num:02}"));
        if dir.is_dir() {
            (dir.join("job-activity.log"), false)
        } else {
            (self.suite_log_path.clone(), true)
        }
    }

    /// Append one process-context result line, plus an optional error
    /// message when the overall retrieval/dispatch was only partially
    /// successful.
    pub async fn append_result(
        &self,
        task: &TaskId,
        submit_num: u64,
        ctx: &ProcessContext,
        partial_error: Option<&str>,
    ) {
        let (path, fell_back) = self.target_path(task, submit_num);
        if fell_back {
            warn!(task = %task, "job log directory absent, falling back to suite log");
        }
        let mut line = ctx.to_string();
        if let Some(err) = partial_error {
            line.push_str(&format!(" error={err}"));
        }
        self.append_line(&path, &line).await;
    }

    async fn append_line(&self, path: &Path, line: &str) {
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(mut file) => {
                let _ = file.write_all(line.as_bytes()).await;
                let _ = file.write_all(b"\n").await;
            }
            Err(e) => warn!(error = %e, path = %path.display(), "failed to append activity log line"),
        }
    }
}
