//! Event Timer Registry key/context types (C5).
//!
//! The registry itself (the tick loop that drives these timers forward
//! and dispatches handlers) lives in `services::event_timer_registry`;
//! this module defines only the data it keys and groups by, since those
//! types are shared with the Message Reconciler and the handler
//! drivers.

use serde::{Deserialize, Serialize};

use super::action_timer::ActionTimer;
use super::task_state::TaskId;

/// Which kind of deferred action a timer entry drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Custom,
    Mail,
    JobLogsRetrieve,
}

/// Identifies one scheduled timer entry: which handler, for which
/// event, on which task/submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub kind: HandlerKind,
    pub event: String,
    pub task: TaskId,
    pub submit_num: u64,
}

impl TimerKey {
    pub fn new(kind: HandlerKind, event: impl Into<String>, task: TaskId, submit_num: u64) -> Self {
        Self {
            kind,
            event: event.into(),
            task,
            submit_num,
        }
    }
}

/// Per-handler-invocation context, tagged so `serde_json` can carry it
/// opaquely through the DB adapter / activity log without the registry
/// needing to know each variant's shape ahead of time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum TimerContext {
    /// A custom event handler command (template or classic form).
    CustomHandler {
        command: String,
        event: String,
        task: String,
        message: Option<String>,
    },
    /// A mail notification. Contexts with identical `(event, subject)`
    /// are grouped into a single message by the mail driver's batching
    /// pass.
    Mail {
        event: String,
        subject: String,
        task: String,
        message: Option<String>,
    },
    /// Remote job log retrieval for one task submission.
    JobLogsRetrieve {
        task: String,
        submit_num: u64,
        platform: String,
        remote_log_dir: String,
    },
}

impl TimerContext {
    pub const fn kind(&self) -> HandlerKind {
        match self {
            TimerContext::CustomHandler { .. } => HandlerKind::Custom,
            TimerContext::Mail { .. } => HandlerKind::Mail,
            TimerContext::JobLogsRetrieve { .. } => HandlerKind::JobLogsRetrieve,
        }
    }

    /// Grouping key used by the mail driver to batch contexts that
    /// would otherwise send one email each. Only `Mail` contexts with
    /// the same key are ever batched together.
    pub fn mail_group_key(&self) -> Option<(String, String)> {
        match self {
            TimerContext::Mail { event, subject, .. } => Some((event.clone(), subject.clone())),
            _ => None,
        }
    }
}

/// One live entry in the registry: the key, its retry clock, and the
/// context the eventual handler call needs.
#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub key: TimerKey,
    pub timer: ActionTimer,
    pub context: TimerContext,
}

impl TimerEntry {
    pub fn new(key: TimerKey, delays: Vec<u64>, context: TimerContext) -> Self {
        Self {
            key,
            timer: ActionTimer::new(delays),
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskId {
        TaskId::new("foo", "20260101T00")
    }

    #[test]
    fn timer_key_distinguishes_by_submit_num() {
        let a = TimerKey::new(HandlerKind::Mail, "failed", task(), 1);
        let b = TimerKey::new(HandlerKind::Mail, "failed", task(), 2);
        assert_ne!(a, b);
    }

    #[test]
    fn mail_contexts_with_same_event_and_subject_group_together() {
        let m1 = TimerContext::Mail {
            event: "failed".into(),
            subject: "task failed".into(),
            task: "foo.20260101T00".into(),
            message: None,
        };
        let m2 = TimerContext::Mail {
            event: "failed".into(),
            subject: "task failed".into(),
            task: "bar.20260101T00".into(),
            message: None,
        };
        assert_eq!(m1.mail_group_key(), m2.mail_group_key());
    }

    #[test]
    fn non_mail_contexts_have_no_group_key() {
        let c = TimerContext::JobLogsRetrieve {
            task: "foo.20260101T00".into(),
            submit_num: 1,
            platform: "localhost".into(),
            remote_log_dir: "/tmp/job".into(),
        };
        assert_eq!(c.mail_group_key(), None);
        assert_eq!(c.kind(), HandlerKind::JobLogsRetrieve);
    }

    #[test]
    fn tagged_context_round_trips_through_json() {
        let c = TimerContext::CustomHandler {
            command: "echo ${event}".into(),
            event: "succeeded".into(),
            task: "foo.20260101T00".into(),
            message: None,
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"type\":\"custom_handler\""));
        let back: TimerContext = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
