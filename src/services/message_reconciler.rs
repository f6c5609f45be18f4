//! Message Reconciler (C6).
//!
//! Accepts an incoming or polled status message, decides accept /
//! ignore / confirm-by-poll, and dispatches into the state machine
//! (C4). Never raises: every outcome — transition, ignore, or deferral
//! — is reported through [`ReconcileOutcome`], per §7's propagation
//! policy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::domain::status::Status;
use crate::domain::task_state::{TaskId, TaskState, TransitionOutcome};
use crate::services::db_adapter::{DbAdapter, TaskEventRow, TaskJobDelta};

/// Severity of an incoming message, mirroring the source's
/// `WARNING`/`CRITICAL`/`CUSTOM`/`INFO` levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Custom,
}

impl Severity {
    const fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Custom => "custom",
        }
    }

    /// `true` for severities that additionally trigger
    /// `setup_event_handlers` on the severity itself, per §4.6.
    const fn triggers_handler_setup(self) -> bool {
        matches!(self, Severity::Warning | Severity::Critical | Severity::Custom)
    }
}

/// The parsed shape of a message, per §4.6's message grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Submitted,
    Started,
    Succeeded,
    SubmissionFailed,
    Failed { signal: Option<String> },
    Aborted { reason: String },
    Vacated { host: String },
    Unknown(String),
}

/// Parse a raw message string into its grammar kind. Custom-output
/// matching is done by the caller (it needs the task's output set), so
/// anything not recognised here comes back as `Unknown` for the caller
/// to re-check against outputs before giving up on it.
pub fn parse_message(message: &str) -> MessageKind {
    if let Some(rest) = message.strip_prefix("CYLC_JOB_FAILED:") {
        return MessageKind::Failed {
            signal: Some(rest.to_string()),
        };
    }
    if let Some(rest) = message.strip_prefix("CYLC_JOB_ABORTED:") {
        return MessageKind::Aborted {
            reason: rest.to_string(),
        };
    }
    if let Some(rest) = message.strip_prefix("CYLC_JOB_VACATED:") {
        return MessageKind::Vacated {
            host: rest.to_string(),
        };
    }
    match message {
        "submitted" => MessageKind::Submitted,
        "started" => MessageKind::Started,
        "succeeded" => MessageKind::Succeeded,
        "submission failed" => MessageKind::SubmissionFailed,
        "failed" => MessageKind::Failed { signal: None },
        other => MessageKind::Unknown(other.to_string()),
    }
}

/// Outcome of one `process_message` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A state transition was applied.
    Transitioned {
        outcome: TransitionOutcome,
        event_name: String,
        /// Additional handler-setup events triggered by severity
        /// (§4.6's severity mapping), to be set up by the caller via
        /// the Event Timer Registry / Config Lookup.
        severity_handler_event: Option<String>,
    },
    /// Stale pre-resubmission message: dropped, logged once.
    IgnoredStale { incoming: u64, current: u64 },
    /// An apparent backward move was deferred to poll confirmation.
    DeferredToPoll { reason: String },
    /// Matched an unsatisfied custom output; raised `pflag`, no
    /// transition.
    OutputOnly { output: String, pflag_raised: bool },
    /// Message not recognised by the grammar; recorded, no transition.
    Unhandled { severity: Severity, message: String },
}

/// Reconciles incoming/polled messages against one task's state,
/// dispatching into `TaskState` and recording to the DB adapter.
pub struct MessageReconciler {
    db: Arc<dyn DbAdapter>,
}

impl MessageReconciler {
    pub fn new(db: Arc<dyn DbAdapter>) -> Self {
        Self { db }
    }

    /// The natural forward-progress status a message names, used only
    /// to detect apparent backward moves for the confirm-by-poll check.
    /// `failed`/`submission failed`/`vacated` are exempted: their
    /// retry-branch targets legitimately sit at a lower lattice index
    /// than the current status and are not regressions.
    fn natural_target(kind: &MessageKind) -> Option<Status> {
        match kind {
            MessageKind::Submitted => Some(Status::Submitted),
            MessageKind::Started => Some(Status::Running),
            MessageKind::Succeeded => Some(Status::Succeeded),
            _ => None,
        }
    }

    #[instrument(skip(self, task, poll_fn), fields(task = %task_id, message = %message))]
    #[allow(clippy::too_many_arguments)]
    pub async fn process_message(
        &self,
        task: &mut TaskState,
        task_id: &TaskId,
        severity: Severity,
        message: &str,
        mut poll_fn: impl FnMut(&TaskId, &str),
        incoming_time: Option<DateTime<Utc>>,
        poll_time: Option<DateTime<Utc>>,
        submit_num: Option<u64>,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let effective_now = incoming_time.or(poll_time).unwrap_or(now);

        // Ignore rule: stale pre-resubmission message.
        if incoming_time.is_some() {
            if let Some(incoming) = submit_num {
                if incoming != task.submit_num {
                    warn!(incoming, current = task.submit_num, "stale message, submit_num mismatch");
                    return ReconcileOutcome::IgnoredStale {
                        incoming,
                        current: task.submit_num,
                    };
                }
            }
        }

        let kind = parse_message(message);

        // Output-only messages: an as-yet-unsatisfied custom output.
        if let MessageKind::Unknown(ref raw) = kind {
            if !crate::domain::output_set::OutputSet::is_standard(raw) && !task.outputs.is_completed(raw) {
                let pflag_raised = task.outputs.set_msg_trg_completion(raw, true);
                return ReconcileOutcome::OutputOnly {
                    output: raw.clone(),
                    pflag_raised,
                };
            }
        }

        // Confirm-by-poll: an apparent backward move, unless the task
        // is already in "believe the next message" mode.
        if !task.confirming_with_poll {
            if let Some(target) = Self::natural_target(&kind) {
                if task.status().is_gt(target) {
                    let reason = format!(
                        "late '{}' message while task is already {}",
                        message,
                        task.status()
                    );
                    poll_fn(task_id, &reason);
                    task.confirming_with_poll = true;
                    return ReconcileOutcome::DeferredToPoll { reason };
                }
            }
        } else {
            task.confirming_with_poll = false;
        }

        let severity_handler_event = severity
            .triggers_handler_setup()
            .then(|| severity.as_str().to_string());

        match kind {
            MessageKind::Submitted => {
                let outcome = if task.status() == Status::Ready {
                    task.on_submission_succeeded(effective_now)
                } else {
                    task.on_message_submitted(effective_now)
                };
                self.record_event(task_id, "submitted", None, effective_now).await;
                ReconcileOutcome::Transitioned {
                    outcome,
                    event_name: "submitted".to_string(),
                    severity_handler_event,
                }
            }
            MessageKind::Started => {
                let outcome = task.on_message_started(effective_now);
                self.record_event(task_id, "started", None, effective_now).await;
                ReconcileOutcome::Transitioned {
                    outcome,
                    event_name: "started".to_string(),
                    severity_handler_event,
                }
            }
            MessageKind::Succeeded => {
                let outcome = task.on_message_succeeded(effective_now);
                self.record_event(task_id, "succeeded", None, effective_now).await;
                self.record_job_update(
                    task_id,
                    task.submit_num,
                    TaskJobDelta {
                        run_status: Some(0),
                        time_run_exit: Some(effective_now),
                        ..Default::default()
                    },
                )
                .await;
                ReconcileOutcome::Transitioned {
                    outcome,
                    event_name: "succeeded".to_string(),
                    severity_handler_event,
                }
            }
            MessageKind::SubmissionFailed => {
                let outcome = task.on_submit_failed(effective_now);
                let event_name = match outcome {
                    TransitionOutcome::Changed { to: Status::SubmitFailed, .. } => "submit-failed",
                    _ => "submit-retrying",
                };
                self.record_event(task_id, event_name, None, effective_now).await;
                ReconcileOutcome::Transitioned {
                    outcome,
                    event_name: event_name.to_string(),
                    severity_handler_event,
                }
            }
            MessageKind::Failed { signal } => {
                self.record_run_signal(task_id, task.submit_num, signal.clone()).await;
                let outcome = task.on_message_failed(effective_now);
                let event_name = match outcome {
                    TransitionOutcome::Changed { to: Status::Failed, .. } => "failed",
                    _ => "retrying",
                };
                self.record_event(task_id, event_name, signal, effective_now).await;
                ReconcileOutcome::Transitioned {
                    outcome,
                    event_name: event_name.to_string(),
                    severity_handler_event,
                }
            }
            MessageKind::Aborted { reason } => {
                self.record_run_signal(task_id, task.submit_num, Some(reason.clone())).await;
                let outcome = task.on_message_failed(effective_now);
                let event_name = match outcome {
                    TransitionOutcome::Changed { to: Status::Failed, .. } => "failed",
                    _ => "retrying",
                };
                self.record_event(task_id, event_name, Some(reason), effective_now).await;
                ReconcileOutcome::Transitioned {
                    outcome,
                    event_name: event_name.to_string(),
                    severity_handler_event,
                }
            }
            MessageKind::Vacated { host } => {
                let outcome = task.on_vacated(effective_now);
                // Open question (§9): both writes are preserved — the
                // vacated host is recorded via an event row, not a job
                // row, matching the source's inconsistency rather than
                // rationalising it away.
                self.record_event(task_id, "vacated", Some(host), effective_now).await;
                ReconcileOutcome::Transitioned {
                    outcome,
                    event_name: "vacated".to_string(),
                    severity_handler_event,
                }
            }
            MessageKind::Unknown(raw) => {
                debug!(message = %raw, "unhandled message");
                self.record_event(task_id, &format!("message {}", severity.as_str()), Some(raw), effective_now)
                    .await;
                ReconcileOutcome::Unhandled {
                    severity,
                    message: message.to_string(),
                }
            }
        }
    }

    async fn record_event(&self, task_id: &TaskId, event: &str, message: Option<String>, time: DateTime<Utc>) {
        if let Err(e) = self
            .db
            .put_insert_task_events(
                task_id,
                TaskEventRow {
                    time,
                    event: event.to_string(),
                    message,
                },
            )
            .await
        {
            warn!(error = %e, "failed to record task event, continuing");
        }
    }

    async fn record_job_update(&self, task_id: &TaskId, submit_num: u64, delta: TaskJobDelta) {
        if let Err(e) = self.db.put_update_task_jobs(task_id, submit_num, delta).await {
            warn!(error = %e, "failed to record task job update, continuing");
        }
    }

    async fn record_run_signal(&self, task_id: &TaskId, submit_num: u64, signal: Option<String>) {
        self.record_job_update(
            task_id,
            submit_num,
            TaskJobDelta {
                run_signal: signal,
                ..Default::default()
            },
        )
        .await;
    }
}
