//! Job-log retrieval driver (C7): a single rsync-over-ssh per
//! host+user group, per §4.5/§6.

use std::collections::BTreeSet;
use std::path::Path;

use crate::domain::error::DriverError;
use crate::services::process_pool::CommandContext;

/// One task submission contributing include patterns to a retrieval
/// group.
#[derive(Debug, Clone)]
pub struct JobLogsEntry {
    pub point: String,
    pub name: String,
    pub submit_num: u64,
    /// The event this retrieval was set up for — `succeeded` skips the
    /// `job.err` existence requirement in the post-transfer check.
    pub event: String,
}

pub struct JobLogsDriver {
    pub rsync_command: String,
    pub ssh_command: String,
    pub user_at_host: String,
    pub remote_job_log_dir: String,
    pub local_job_log_dir: String,
    pub max_size: Option<String>,
    pub verbose: bool,
}

impl JobLogsDriver {
    fn includes(entries: &[JobLogsEntry]) -> Vec<String> {
        let mut set = BTreeSet::new();
        for e in entries {
            let submit = format!("{:02}", e.submit_num);
            set.insert(format!("/{}", e.point));
            set.insert(format!("/{}/{}", e.point, e.name));
            set.insert(format!("/{}/{}/{}", e.point, e.name, submit));
            set.insert(format!("/{}/{}/{}/**", e.point, e.name, submit));
        }
        set.into_iter().collect()
    }

    pub fn build_group_command(&self, entries: &[JobLogsEntry]) -> Result<CommandContext, DriverError> {
        if entries.is_empty() {
            return Err(DriverError::CommandFailed("empty job-logs group".to_string()));
        }
        let mut argv = vec![self.rsync_command.clone()];
        argv.push(format!("--rsh={}", self.ssh_command));
        if self.verbose {
            argv.push("-v".to_string());
        }
        if let Some(max_size) = &self.max_size {
            argv.push(format!("--max-size={max_size}"));
        }
        for include in Self::includes(entries) {
            argv.push(format!("--include={include}"));
        }
        argv.push("--exclude=/**".to_string());
        argv.push(format!("{}:{}/", self.user_at_host, self.remote_job_log_dir));
        argv.push(format!("{}/", self.local_job_log_dir));

        let mut ctx = CommandContext::new(format!("logs/{}", self.user_at_host), argv);
        ctx.shell = false;
        Ok(ctx)
    }

    /// Post-transfer success check: `job.out` must exist; `job.err`
    /// too, unless the event was `succeeded`. Returns the missing
    /// filenames, empty on full success.
    pub fn check_retrieved(local_submit_dir: &Path, event: &str) -> Vec<String> {
        let mut missing = Vec::new();
        if !local_submit_dir.join("job.out").exists() {
            missing.push("job.out".to_string());
        }
        if event != "succeeded" && !local_submit_dir.join("job.err").exists() {
            missing.push("job.err".to_string());
        }
        missing
    }
}
