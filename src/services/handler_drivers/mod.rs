//! Handler Drivers (C7).
//!
//! Three concrete drivers turn a ready timer (or group of timers) into
//! a sub-command for the process pool: mail batcher, job-log
//! retriever, custom handler. They share no base type — per DESIGN
//! NOTES §9 this is modeled as a tagged sum type
//! ([`crate::domain::HandlerKind`]) with the dispatcher in the Event
//! Timer Registry matching on the tag, not as a trait-object hierarchy.
//! The `HandlerDriver` trait below exists only so each driver exposes
//! the same `build_command` shape for testing; the registry itself
//! dispatches by matching `HandlerKind`, never via `dyn HandlerDriver`.

pub mod custom;
pub mod job_logs;
pub mod mail;

use std::collections::HashMap;

use crate::domain::error::DriverError;
use crate::services::process_pool::CommandContext;

/// The handler-data dictionary a custom handler template (or classic
/// invocation) is built from, per §4.7.
#[derive(Debug, Clone, Default)]
pub struct HandlerData {
    pub event: String,
    pub suite: String,
    pub point: String,
    pub name: String,
    pub submit_num: u64,
    pub id: String,
    pub message: Option<String>,
    pub batch_sys_name: Option<String>,
    pub batch_sys_job_id: Option<String>,
    pub submit_time: Option<String>,
    pub start_time: Option<String>,
    pub finish_time: Option<String>,
    pub user_at_host: Option<String>,
    /// Flattened suite config (`suite_<key>`, `URL` aliased to `suite_url`).
    pub suite_config: HashMap<String, String>,
    /// Task metadata (`URL` aliased to `task_url`).
    pub task_meta: HashMap<String, String>,
}

impl HandlerData {
    /// Flatten into the string-keyed map a template substitution or
    /// classic invocation draws from.
    pub fn as_map(&self) -> HashMap<String, Option<String>> {
        let mut map = HashMap::new();
        map.insert("event".to_string(), Some(self.event.clone()));
        map.insert("suite".to_string(), Some(self.suite.clone()));
        map.insert("point".to_string(), Some(self.point.clone()));
        map.insert("name".to_string(), Some(self.name.clone()));
        map.insert("submit_num".to_string(), Some(self.submit_num.to_string()));
        map.insert("id".to_string(), Some(self.id.clone()));
        map.insert("message".to_string(), self.message.clone());
        map.insert("batch_sys_name".to_string(), self.batch_sys_name.clone());
        map.insert("batch_sys_job_id".to_string(), self.batch_sys_job_id.clone());
        map.insert("submit_time".to_string(), self.submit_time.clone());
        map.insert("start_time".to_string(), self.start_time.clone());
        map.insert("finish_time".to_string(), self.finish_time.clone());
        map.insert("user@host".to_string(), self.user_at_host.clone());

        for (k, v) in &self.suite_config {
            let key = if k.eq_ignore_ascii_case("url") {
                "suite_url".to_string()
            } else {
                format!("suite_{k}")
            };
            map.insert(key, Some(v.clone()));
        }
        for (k, v) in &self.task_meta {
            let key = if k.eq_ignore_ascii_case("url") {
                "task_url".to_string()
            } else {
                k.clone()
            };
            map.insert(key, Some(v.clone()));
        }
        map
    }
}

/// Substitute every `${key}` placeholder in `template` with the
/// shell-quoted value from `data`. Missing keys are an error rather
/// than a silent blank, per §7's "template substitution failure" error
/// kind.
pub fn substitute_template(
    template: &str,
    data: &HashMap<String, Option<String>>,
    handler_label: &str,
) -> Result<String, DriverError> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            result.push_str(rest);
            return Ok(result);
        };
        let key = &rest[start + 2..start + end];
        result.push_str(&rest[..start]);
        match data.get(key) {
            Some(value) => result.push_str(&crate::services::shell_quote::quote_value(value.as_deref())),
            None => {
                return Err(DriverError::TemplateSubstitutionFailed {
                    handler: handler_label.to_string(),
                    key: key.to_string(),
                })
            }
        }
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

/// `true` iff substitution changed the string — the equality-check
/// detection §9 specifies for "is this a template, or a classic
/// callable".
pub fn is_template(original: &str, substituted: &str) -> bool {
    original != substituted
}

/// Shared shape every driver exposes, purely so tests can exercise all
/// three uniformly. The registry dispatches on `HandlerKind`, not
/// through this trait.
pub trait HandlerDriver {
    fn build_command(&self) -> Result<CommandContext, DriverError>;
}
