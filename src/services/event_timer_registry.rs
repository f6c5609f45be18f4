//! Event Timer Registry & Scheduler (C5).
//!
//! Process-wide map from a [`TimerKey`] to an `ActionTimer` + context.
//! One tick (`process_events`) promotes ready timers and hands work to
//! the handler drivers (C7), which submit to the external process pool
//! and report back success/failure.
//!
//! Locking discipline mirrors the host's `EventScheduler::start`: the
//! registry lock is held only to snapshot state or to flip `waiting`
//! flags, and is always dropped before an `await` that dispatches to
//! the process pool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::event_timer::{HandlerKind, TimerContext, TimerEntry, TimerKey};
use crate::services::activity_log::ActivityLog;
use crate::services::handler_drivers::custom::CustomHandlerDriver;
use crate::services::handler_drivers::job_logs::{JobLogsDriver, JobLogsEntry};
use crate::services::handler_drivers::mail::{MailDriver, MailEntry};
use crate::services::handler_drivers::{HandlerData, HandlerDriver};
use crate::services::process_pool::{CommandContext, ProcessPool};

/// Registers deferred handler actions and drives them to completion on
/// each `process_events` tick.
pub struct EventTimerRegistry {
    entries: RwLock<HashMap<TimerKey, TimerEntry>>,
    next_mail_time: RwLock<Option<DateTime<Utc>>>,
    mail_interval: Duration,
    pool: Arc<dyn ProcessPool>,
    activity_log: Arc<ActivityLog>,
    mail_driver: MailDriver,
    job_logs_local_dir: PathBuf,
}

/// Summary of one tick, for tests and logging.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub exhausted: Vec<TimerKey>,
    pub dispatched_custom: usize,
    pub dispatched_mail_groups: usize,
    pub dispatched_log_groups: usize,
}

impl EventTimerRegistry {
    pub fn new(
        pool: Arc<dyn ProcessPool>,
        activity_log: Arc<ActivityLog>,
        mail_driver: MailDriver,
        mail_interval: Duration,
        job_logs_local_dir: PathBuf,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_mail_time: RwLock::new(None),
            mail_interval,
            pool,
            activity_log,
            mail_driver,
            job_logs_local_dir,
        }
    }

    /// Register a new timer entry, unless one already exists for this
    /// key (callers are expected to check "no timer already exists for
    /// that key" before setting up logs/mail per §4.7, but duplicate
    /// registration is harmless here — the existing entry wins).
    pub async fn register(&self, key: TimerKey, delays: Vec<u64>, context: TimerContext) {
        let mut entries = self.entries.write().await;
        entries.entry(key.clone()).or_insert_with(|| TimerEntry::new(key, delays, context));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains_key(&self, key: &TimerKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// One scheduler tick, per the numbered steps of §4.5.
    pub async fn process_events(&self, now: DateTime<Utc>, stopping: bool) -> TickSummary {
        let mut summary = TickSummary::default();
        let next_mail_time = *self.next_mail_time.read().await;

        // Step 1: snapshot, advance timers, collect ready keys.
        let ready_keys: Vec<TimerKey> = {
            let mut entries = self.entries.write().await;
            let mut exhausted = Vec::new();
            let mut ready = Vec::new();

            for (key, entry) in entries.iter_mut() {
                if entry.timer.is_waiting() {
                    continue;
                }
                if !entry.timer.is_timeout_set() {
                    match entry.timer.next(now, false) {
                        None => {
                            warn!(%key.task, event = %key.event, kind = ?key.kind, "handler timer exhausted");
                            exhausted.push(key.clone());
                            continue;
                        }
                        Some(delay) => {
                            info!(%key.task, event = %key.event, delay, "handler timer scheduled");
                        }
                    }
                }
                if !entry.timer.is_delay_done(now) {
                    continue;
                }
                if entry.context.kind() == HandlerKind::Mail && !stopping {
                    if let Some(next_mail) = next_mail_time {
                        if now < next_mail {
                            continue;
                        }
                    }
                }
                ready.push(key.clone());
            }

            for key in &exhausted {
                entries.remove(key);
            }
            summary.exhausted = exhausted;

            // Step 2: mark ready entries waiting.
            for key in &ready {
                if let Some(entry) = entries.get_mut(key) {
                    entry.timer.set_waiting();
                }
            }
            ready
        };

        if ready_keys.is_empty() {
            return summary;
        }

        // Group by handler kind for step 2/3 dispatch.
        let mut custom_keys = Vec::new();
        let mut mail_keys = Vec::new();
        let mut logs_keys = Vec::new();
        for key in ready_keys {
            match key.kind {
                HandlerKind::Custom => custom_keys.push(key),
                HandlerKind::Mail => mail_keys.push(key),
                HandlerKind::JobLogsRetrieve => logs_keys.push(key),
            }
        }

        self.dispatch_custom(&custom_keys, &mut summary).await;
        self.dispatch_mail_groups(&mail_keys, now, &mut summary).await;
        self.dispatch_logs_groups(&logs_keys, &mut summary).await;

        summary
    }

    /// Custom handlers are independent per-key dispatches (§4.5 step
    /// 2: "dispatch individually"), so unlike the mail/logs groups they
    /// have no cross-entry coordination and can run concurrently
    /// against the process pool — each still sees at most one in-flight
    /// invocation per its own `waiting` flag.
    async fn dispatch_custom(&self, keys: &[TimerKey], summary: &mut TickSummary) {
        if keys.is_empty() {
            return;
        }
        let dispatches = keys.iter().map(|key| self.dispatch_one_custom(key));
        let attempted = futures::future::join_all(dispatches).await;
        summary.dispatched_custom += attempted.into_iter().filter(|&ok| ok).count();
    }

    async fn dispatch_one_custom(&self, key: &TimerKey) -> bool {
        let context = {
            let entries = self.entries.read().await;
            entries.get(key).map(|e| e.context.clone())
        };
        let Some(TimerContext::CustomHandler { command, event, task, message }) = context else {
            return false;
        };
        let data = HandlerData {
            event: event.clone(),
            suite: self.mail_driver.suite.clone(),
            id: task.clone(),
            message: message.clone(),
            ..Default::default()
        };
        let driver = CustomHandlerDriver {
            label: key.event.clone(),
            handler_string: command,
            data,
        };
        match driver.build_command() {
            Ok(cmd) => {
                let result = self.pool.put_command(cmd).await;
                let mut entries = self.entries.write().await;
                if result.succeeded() {
                    entries.remove(key);
                } else if let Some(entry) = entries.get_mut(key) {
                    entry.timer.unset_waiting();
                    entry.timer.reset_for_retry();
                }
                drop(entries);
                self.activity_log
                    .append_result(&entries_task_id(&task), 0, &result, None)
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "custom handler template substitution failed, skipping");
                let mut entries = self.entries.write().await;
                entries.remove(key);
            }
        }
        true
    }

    async fn dispatch_mail_groups(&self, keys: &[TimerKey], now: DateTime<Utc>, summary: &mut TickSummary) {
        if keys.is_empty() {
            return;
        }
        let groups = {
            let entries = self.entries.read().await;
            group_mail(keys, &entries)
        };

        for group_keys in groups {
            let mail_entries: Vec<MailEntry> = {
                let entries = self.entries.read().await;
                group_keys
                    .iter()
                    .filter_map(|k| match entries.get(k).map(|e| &e.context) {
                        Some(TimerContext::Mail { event, task, .. }) => Some(MailEntry {
                            task_id_str: task.clone(),
                            event: event.clone(),
                        }),
                        _ => None,
                    })
                    .collect()
            };

            let Ok(cmd) = self.mail_driver.build_group_command(&mail_entries) else {
                continue;
            };
            *self.next_mail_time.write().await = Some(now + self.mail_interval);
            let result = self.pool.put_command(cmd).await;

            let mut entries = self.entries.write().await;
            if result.succeeded() {
                for key in &group_keys {
                    entries.remove(key);
                }
            } else {
                for key in &group_keys {
                    if let Some(entry) = entries.get_mut(key) {
                        entry.timer.unset_waiting();
                        entry.timer.reset_for_retry();
                    }
                }
            }
            drop(entries);

            for entry in &mail_entries {
                self.activity_log
                    .append_result(&parse_task_id(&entry.task_id_str), 0, &result, None)
                    .await;
            }
            summary.dispatched_mail_groups += 1;
        }
    }

    async fn dispatch_logs_groups(&self, keys: &[TimerKey], summary: &mut TickSummary) {
        if keys.is_empty() {
            return;
        }
        let groups = {
            let entries = self.entries.read().await;
            group_logs(keys, &entries)
        };

        for group_keys in groups {
            let (logs_entries, platform, remote_dir): (Vec<JobLogsEntry>, String, String) = {
                let entries = self.entries.read().await;
                let mut platform = String::new();
                let mut remote_dir = String::new();
                let logs_entries = group_keys
                    .iter()
                    .filter_map(|k| match entries.get(k).map(|e| &e.context) {
                        Some(TimerContext::JobLogsRetrieve { task, submit_num, platform: p, remote_log_dir }) => {
                            platform = p.clone();
                            remote_dir = remote_log_dir.clone();
                            let (point, name) = split_task(task);
                            Some(JobLogsEntry {
                                point,
                                name,
                                submit_num: *submit_num,
                                event: k.event.clone(),
                            })
                        }
                        _ => None,
                    })
                    .collect();
                (logs_entries, platform, remote_dir)
            };

            let driver = JobLogsDriver {
                rsync_command: "rsync".to_string(),
                ssh_command: "ssh".to_string(),
                user_at_host: platform,
                remote_job_log_dir: remote_dir,
                local_job_log_dir: self.job_logs_local_dir.to_string_lossy().into_owned(),
                max_size: None,
                verbose: false,
            };
            let Ok(cmd) = driver.build_group_command(&logs_entries) else {
                continue;
            };
            let result = self.pool.put_command(cmd.clone()).await;

            let mut missing_overall = Vec::new();
            if result.succeeded() {
                for le in &logs_entries {
                    let submit_dir = self
                        .job_logs_local_dir
                        .join(&le.point)
                        .join(&le.name)
                        .join(format!("{:02}", le.submit_num));
                    let missing = JobLogsDriver::check_retrieved(&submit_dir, &le.event);
                    if !missing.is_empty() {
                        missing_overall.extend(missing);
                    }
                }
            }

            let mut entries = self.entries.write().await;
            if result.succeeded() && missing_overall.is_empty() {
                for key in &group_keys {
                    entries.remove(key);
                }
            } else {
                for key in &group_keys {
                    if let Some(entry) = entries.get_mut(key) {
                        entry.timer.unset_waiting();
                        entry.timer.reset_for_retry();
                    }
                }
            }
            drop(entries);

            let error = (!missing_overall.is_empty())
                .then(|| format!("File(s) not retrieved: {}", missing_overall.join(", ")));
            for le in &logs_entries {
                let task_id = crate::domain::TaskId::new(&le.name, &le.point);
                self.activity_log
                    .append_result(&task_id, le.submit_num, &result, error.as_deref())
                    .await;
            }
            summary.dispatched_log_groups += 1;
        }
    }
}

fn split_task(task_id_str: &str) -> (String, String) {
    match task_id_str.split_once('.') {
        Some((name, point)) => (point.to_string(), name.to_string()),
        None => (String::new(), task_id_str.to_string()),
    }
}

fn parse_task_id(s: &str) -> crate::domain::TaskId {
    // `<point>/<name>/<submit>` — see MailEntry::task_id_str.
    let parts: Vec<&str> = s.splitn(2, '/').collect();
    if parts.len() == 2 {
        let rest = parts[1];
        let name = rest.split('/').next().unwrap_or(rest);
        crate::domain::TaskId::new(name, parts[0])
    } else {
        crate::domain::TaskId::new(s, "")
    }
}

fn entries_task_id(task_id_str: &str) -> crate::domain::TaskId {
    match task_id_str.split_once('.') {
        Some((name, point)) => crate::domain::TaskId::new(name, point),
        None => crate::domain::TaskId::new(task_id_str, ""),
    }
}

/// Group mail keys whose contexts share `(event, subject-relevant
/// fields)` — here approximated by the context's own grouping key,
/// per §3's "identical `MailCtx` field-equality are groupable".
fn group_mail(keys: &[TimerKey], entries: &HashMap<TimerKey, TimerEntry>) -> Vec<Vec<TimerKey>> {
    let mut groups: HashMap<String, Vec<TimerKey>> = HashMap::new();
    for key in keys {
        if let Some(entry) = entries.get(key) {
            if let Some((event, subject)) = entry.context.mail_group_key() {
                groups.entry(format!("{event}\u{0}{subject}")).or_default().push(key.clone());
            }
        }
    }
    groups.into_values().collect()
}

/// Group job-log keys by `(platform, remote_log_dir)` — one rsync per
/// host+user group.
fn group_logs(keys: &[TimerKey], entries: &HashMap<TimerKey, TimerEntry>) -> Vec<Vec<TimerKey>> {
    let mut groups: HashMap<String, Vec<TimerKey>> = HashMap::new();
    for key in keys {
        if let Some(entry) = entries.get(key) {
            if let TimerContext::JobLogsRetrieve { platform, remote_log_dir, .. } = &entry.context {
                groups
                    .entry(format!("{platform}\u{0}{remote_log_dir}"))
                    .or_default()
                    .push(key.clone());
            }
        }
    }
    groups.into_values().collect()
}
