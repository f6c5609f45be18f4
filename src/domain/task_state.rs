//! Task State & Transition Engine (C4).
//!
//! `TaskState` is the single source of truth for one task's status. All
//! status changes go through [`TaskState::reset_state`], which is the
//! one place the hold-swap protocol and the output/status coherence
//! invariants of spec §4.4 are enforced — nothing else in this crate
//! sets `status` directly.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};

use super::action_timer::ActionTimer;
use super::error::TransitionError;
use super::output_set::OutputSet;
use super::prerequisite::Prerequisite;
use super::status::Status;

const HISTORY_CAPACITY: usize = 32;

/// `<name>.<cycle-point>` task identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub name: String,
    pub cycle_point: String,
}

impl TaskId {
    pub fn new(name: impl Into<String>, cycle_point: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cycle_point: cycle_point.into(),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.cycle_point)
    }
}

/// One row of a task's transition history, kept bounded for
/// diagnostics (spec's "append elapsed to task's history" side effect
/// on success names a history without specifying its shape).
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub at: DateTime<Utc>,
    pub from: Status,
    pub to: Status,
    pub event: String,
}

/// Per-task status, hold-swap shadow, outputs, and prerequisite links.
pub struct TaskState {
    pub identity: TaskId,
    status: Status,
    hold_swap: Option<Status>,
    pub prerequisites: Vec<Box<dyn Prerequisite + Send + Sync>>,
    pub suicide_prerequisites: Vec<Box<dyn Prerequisite + Send + Sync>>,
    is_satisfied_cache: Option<bool>,
    suicide_is_satisfied_cache: Option<bool>,
    pub external_triggers: HashMap<String, bool>,
    pub outputs: OutputSet,
    pub kill_failed: bool,
    pub job_vacated: bool,
    pub confirming_with_poll: bool,
    pub time_updated: Option<DateTime<Utc>>,
    pub submit_num: u64,
    submit_retry: ActionTimer,
    exec_retry: ActionTimer,
    history: VecDeque<TransitionRecord>,
}

/// Outcome of a side-effecting transition call, telling the caller (the
/// Message Reconciler, typically) what handler/timer work to set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Status changed; named output was newly completed (if any).
    Changed {
        from: Status,
        to: Status,
        completed_output: Option<String>,
    },
    /// No-op: e.g. a duplicate "submitted" message after the task has
    /// already started.
    NoOp,
}

impl TaskState {
    pub fn new(identity: TaskId, submit_delays: Vec<u64>, exec_delays: Vec<u64>) -> Self {
        Self {
            identity,
            status: Status::Waiting,
            hold_swap: None,
            prerequisites: Vec::new(),
            suicide_prerequisites: Vec::new(),
            is_satisfied_cache: None,
            suicide_is_satisfied_cache: None,
            external_triggers: HashMap::new(),
            outputs: OutputSet::new(),
            kill_failed: false,
            job_vacated: false,
            confirming_with_poll: false,
            time_updated: None,
            submit_num: 0,
            submit_retry: ActionTimer::new(submit_delays),
            exec_retry: ActionTimer::new(exec_delays),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub const fn status(&self) -> Status {
        self.status
    }

    pub const fn hold_swap(&self) -> Option<Status> {
        self.hold_swap
    }

    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    fn push_history(&mut self, at: DateTime<Utc>, from: Status, to: Status, event: &str) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(TransitionRecord {
            at,
            from,
            to,
            event: event.to_string(),
        });
    }

    /// Invalidate cached prerequisite-satisfaction booleans. Called on
    /// any change to `prerequisites`/`suicide_prerequisites`.
    pub fn invalidate_satisfaction_cache(&mut self) {
        self.is_satisfied_cache = None;
        self.suicide_is_satisfied_cache = None;
    }

    pub fn is_satisfied(&mut self) -> bool {
        if let Some(cached) = self.is_satisfied_cache {
            return cached;
        }
        let result = self.prerequisites.iter().all(|p| p.is_satisfied());
        self.is_satisfied_cache = Some(result);
        result
    }

    pub fn suicide_is_satisfied(&mut self) -> bool {
        if let Some(cached) = self.suicide_is_satisfied_cache {
            return cached;
        }
        let result = self.suicide_prerequisites.iter().all(|p| p.is_satisfied());
        self.suicide_is_satisfied_cache = Some(result);
        result
    }

    /// Enforce the six output↔status coherence implications of §4.4.
    /// Called on every `reset_state`.
    fn enforce_coherence(&mut self) {
        if self.status.status_leq(Status::Submitted) {
            self.outputs.set_all_incomplete();
        }
        self.outputs
            .set_completion("expired", self.status == Status::Expired);
        self.outputs
            .set_completion("submitted", self.status.status_geq(Status::Submitted));
        self.outputs
            .set_completion("started", self.status.status_geq(Status::Running));
        self.outputs
            .set_completion("submit-failed", self.status == Status::SubmitFailed);
        self.outputs
            .set_completion("succeeded", self.status == Status::Succeeded);
        self.outputs
            .set_completion("failed", self.status == Status::Failed);
    }

    /// The single setter through which every status change passes.
    /// Implements the hold-swap protocol: if the task is currently
    /// `held` and a reset targets a non-final status, swap them so the
    /// task re-enters `held` carrying the new latent status instead. The
    /// same swap applies when the task is *not yet* parked but carries a
    /// pending hold (`hold_swap == Held`, set by `hold` on an active
    /// task): the pending hold takes effect as soon as the task settles
    /// into a non-final status, parking it then instead of letting it
    /// proceed as if never held.
    pub fn reset_state(&mut self, new: Status, event: &str, now: DateTime<Utc>) {
        let from = self.status;

        if self.status == Status::Held && self.hold_swap == Some(Status::Held) {
            // Defensive: should not occur (see `hold`), but keeps the
            // invariant "hold_swap != held while held" true even if a
            // caller mutates hold_swap directly in a test.
            self.hold_swap = None;
        }

        if self.status == Status::Held {
            if new.is_final() {
                self.status = new;
                self.hold_swap = None;
            } else {
                self.hold_swap = Some(new);
            }
        } else if self.hold_swap == Some(Status::Held) && !new.is_final() {
            self.hold_swap = Some(new);
            self.status = Status::Held;
        } else {
            // Finishing despite a pending hold: let the final status
            // through and drop the stale shadow.
            self.hold_swap = None;
            self.status = new;
        }

        if new == Status::Waiting {
            for p in &mut self.prerequisites {
                p.set_not_satisfied();
            }
            self.invalidate_satisfaction_cache();
        }

        self.enforce_coherence();
        self.time_updated = Some(now);
        self.push_history(now, from, self.status, event);
    }

    /// Park the task in `held`, recording its current (or pending)
    /// status as the shadow per §4.4's hold table:
    /// - never-active / to-be-active statuses park immediately.
    /// - active statuses (`submitted`/`running`) stay unchanged and the
    ///   hold is deferred via `hold_swap = Held` (applied on finish).
    pub fn hold(&mut self, now: DateTime<Utc>) {
        if self.status == Status::Held {
            return;
        }
        if self.status.is_active() {
            self.hold_swap = Some(Status::Held);
            self.time_updated = Some(now);
            return;
        }
        let parked = self.status;
        let from = self.status;
        self.status = Status::Held;
        self.hold_swap = Some(parked);
        self.time_updated = Some(now);
        self.push_history(now, from, Status::Held, "hold");
    }

    /// Restore the parked status exactly, or fall back to `waiting` if
    /// nothing was parked.
    pub fn unhold(&mut self, now: DateTime<Utc>) {
        if self.status != Status::Held {
            // Cancel a pending hold-on-finish.
            if self.hold_swap == Some(Status::Held) {
                self.hold_swap = None;
            }
            return;
        }
        let restored = self.hold_swap.take().unwrap_or(Status::Waiting);
        let from = self.status;
        self.status = restored;
        self.enforce_coherence();
        self.time_updated = Some(now);
        self.push_history(now, from, restored, "unhold");
    }

    /// `message submitted` (first time) — §4.4 row 1.
    pub fn on_message_submitted(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        if self.status.status_geq(Status::Running) {
            return TransitionOutcome::NoOp;
        }
        let from = self.status;
        self.reset_state(Status::Submitted, "message submitted", now);
        let completed = self.outputs.set_msg_trg_completion("submitted", true);
        TransitionOutcome::Changed {
            from,
            to: Status::Submitted,
            completed_output: completed.then(|| "submitted".to_string()),
        }
    }

    /// `ready` → submission returns → `submitted`.
    pub fn on_submission_succeeded(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        let from = self.status;
        self.reset_state(Status::Submitted, "submission returned", now);
        self.outputs.set_msg_trg_completion("submitted", true);
        TransitionOutcome::Changed {
            from,
            to: Status::Submitted,
            completed_output: Some("submitted".to_string()),
        }
    }

    /// `submitted`/`ready` → submission failed. Schedules a retry via
    /// the submit-retry `ActionTimer`, or exhausts to `submit-failed`.
    pub fn on_submit_failed(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        let from = self.status;
        match self.submit_retry.next(now, false) {
            Some(_delay) => {
                self.reset_state(Status::SubmitRetrying, "submit-failed, retrying", now);
                TransitionOutcome::Changed {
                    from,
                    to: Status::SubmitRetrying,
                    completed_output: None,
                }
            }
            None => {
                self.reset_state(Status::SubmitFailed, "submit-failed, exhausted", now);
                let completed = self.outputs.set_msg_trg_completion("submit-failed", true);
                TransitionOutcome::Changed {
                    from,
                    to: Status::SubmitFailed,
                    completed_output: completed.then(|| "submit-failed".to_string()),
                }
            }
        }
    }

    /// `submitted` → `message started` → `running`.
    pub fn on_message_started(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        let from = self.status;
        self.reset_state(Status::Running, "message started", now);
        // Clear the submit-retry counter: a running job no longer needs it.
        self.submit_retry = ActionTimer::new(vec![0]);
        let completed = self.outputs.set_msg_trg_completion("started", true);
        TransitionOutcome::Changed {
            from,
            to: Status::Running,
            completed_output: completed.then(|| "started".to_string()),
        }
    }

    /// `running` → `message succeeded` → `succeeded`.
    pub fn on_message_succeeded(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        let from = self.status;
        self.reset_state(Status::Succeeded, "message succeeded", now);
        let completed = self.outputs.set_msg_trg_completion("succeeded", true);
        TransitionOutcome::Changed {
            from,
            to: Status::Succeeded,
            completed_output: completed.then(|| "succeeded".to_string()),
        }
    }

    /// `running` → failed/signal/abort. Schedules an execution retry,
    /// or exhausts to `failed`.
    pub fn on_message_failed(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        let from = self.status;
        match self.exec_retry.next(now, false) {
            Some(_delay) => {
                self.reset_state(Status::Retrying, "failed, retrying", now);
                TransitionOutcome::Changed {
                    from,
                    to: Status::Retrying,
                    completed_output: None,
                }
            }
            None => {
                self.reset_state(Status::Failed, "failed, exhausted", now);
                let completed = self.outputs.set_msg_trg_completion("failed", true);
                TransitionOutcome::Changed {
                    from,
                    to: Status::Failed,
                    completed_output: completed.then(|| "failed".to_string()),
                }
            }
        }
    }

    /// Pre-emption: reset to `submitted` without polling, per §4.4.
    pub fn on_vacated(&mut self, now: DateTime<Utc>) -> TransitionOutcome {
        let from = self.status;
        self.submit_retry = ActionTimer::new(vec![0]);
        self.job_vacated = true;
        self.reset_state(Status::Submitted, "vacated", now);
        TransitionOutcome::Changed {
            from,
            to: Status::Submitted,
            completed_output: None,
        }
    }

    /// Force an explicit status (operator override / test setup). Goes
    /// through the same coherence and hold-swap path as every other
    /// transition.
    pub fn force_status(&mut self, new: Status, reason: &str, now: DateTime<Utc>) {
        self.reset_state(new, reason, now);
    }

    pub fn submit_retry_attempts(&self) -> usize {
        self.submit_retry.attempts_made()
    }

    pub fn exec_retry_attempts(&self) -> usize {
        self.exec_retry.attempts_made()
    }

    /// Verify the six coherence implications hold right now — used by
    /// tests and as a debug assertion at call sites that suspect state
    /// drift.
    pub fn check_coherence(&self) -> Result<(), TransitionError> {
        let checks: [(bool, &str); 6] = [
            (
                self.outputs.is_completed("expired") == (self.status == Status::Expired),
                "expired output vs status",
            ),
            (
                self.outputs.is_completed("submitted") == self.status.status_geq(Status::Submitted),
                "submitted output vs status",
            ),
            (
                self.outputs.is_completed("started") == self.status.status_geq(Status::Running),
                "started output vs status",
            ),
            (
                self.outputs.is_completed("submit-failed") == (self.status == Status::SubmitFailed),
                "submit-failed output vs status",
            ),
            (
                self.outputs.is_completed("succeeded") == (self.status == Status::Succeeded),
                "succeeded output vs status",
            ),
            (
                self.outputs.is_completed("failed") == (self.status == Status::Failed),
                "failed output vs status",
            ),
        ];
        for (ok, label) in checks {
            if !ok {
                return Err(TransitionError::Incoherent(label.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(seconds: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + chrono::Duration::seconds(seconds)
    }

    fn new_task() -> TaskState {
        TaskState::new(TaskId::new("foo", "20260101T00"), vec![30, 60], vec![0])
    }

    #[test]
    fn normal_run_end_to_end() {
        let mut task = new_task();
        task.on_message_submitted(t(0));
        task.on_message_started(t(1));
        let outcome = task.on_message_succeeded(t(2));
        assert_eq!(task.status(), Status::Succeeded);
        assert!(task.outputs.is_completed("submitted"));
        assert!(task.outputs.is_completed("started"));
        assert!(task.outputs.is_completed("succeeded"));
        assert!(task.check_coherence().is_ok());
        match outcome {
            TransitionOutcome::Changed { to, .. } => assert_eq!(to, Status::Succeeded),
            TransitionOutcome::NoOp => panic!("expected a transition"),
        }
    }

    #[test]
    fn duplicate_submitted_after_started_is_a_noop() {
        let mut task = new_task();
        task.on_message_submitted(t(0));
        task.on_message_started(t(1));
        let outcome = task.on_message_submitted(t(2));
        assert_eq!(outcome, TransitionOutcome::NoOp);
        assert_eq!(task.status(), Status::Running);
    }

    #[test]
    fn retry_path_exhausts_to_submit_failed() {
        let mut task = new_task();
        let o1 = task.on_submit_failed(t(0));
        assert!(matches!(o1, TransitionOutcome::Changed { to: Status::SubmitRetrying, .. }));
        let o2 = task.on_submit_failed(t(30));
        assert!(matches!(o2, TransitionOutcome::Changed { to: Status::SubmitRetrying, .. }));
        let o3 = task.on_submit_failed(t(90));
        assert!(matches!(o3, TransitionOutcome::Changed { to: Status::SubmitFailed, .. }));
        assert_eq!(task.status(), Status::SubmitFailed);
        assert!(task.outputs.is_completed("submit-failed"));
    }

    #[test]
    fn hold_on_never_active_status_parks_immediately() {
        let mut task = new_task();
        task.reset_state(Status::Waiting, "setup", t(0));
        task.hold(t(1));
        assert_eq!(task.status(), Status::Held);
        assert_eq!(task.hold_swap(), Some(Status::Waiting));
    }

    #[test]
    fn hold_on_active_status_defers_then_parks_on_next_non_final_transition() {
        let mut task = new_task();
        task.on_message_submitted(t(0));
        task.hold(t(1));
        // Active statuses stay unchanged while the hold is pending.
        assert_eq!(task.status(), Status::Submitted);
        assert_eq!(task.hold_swap(), Some(Status::Held));

        task.on_message_started(t(2));
        // The pending hold takes effect on the next non-final reset: the
        // task parks in `held`, carrying `running` as the shadow.
        assert_eq!(task.status(), Status::Held);
        assert_eq!(task.hold_swap(), Some(Status::Running));

        task.unhold(t(3));
        assert_eq!(task.status(), Status::Running);
        assert_eq!(task.hold_swap(), None);
    }

    #[test]
    fn pending_hold_is_dropped_when_task_finishes_instead() {
        let mut task = new_task();
        task.on_message_submitted(t(0));
        task.hold(t(1));
        assert_eq!(task.hold_swap(), Some(Status::Held));

        // A final status is let through rather than parked; the stale
        // pending-hold shadow is dropped.
        task.on_message_succeeded(t(2));
        assert_eq!(task.status(), Status::Succeeded);
        assert_eq!(task.hold_swap(), None);
    }

    #[test]
    fn held_parks_state_and_unhold_restores_exactly() {
        let mut task = new_task();
        task.reset_state(Status::Waiting, "setup", t(0));
        task.hold(t(1));
        assert_eq!(task.status(), Status::Held);
        task.unhold(t(2));
        assert_eq!(task.status(), Status::Waiting);
        assert_eq!(task.hold_swap(), None);
    }

    #[test]
    fn reset_to_waiting_clears_prerequisite_satisfaction() {
        use super::super::prerequisite::SimplePrerequisite;
        let mut task = new_task();
        let mut prereq = SimplePrerequisite::new(vec!["upstream.succeeded".into()], vec![]);
        prereq.set_satisfied();
        task.prerequisites.push(Box::new(prereq));
        assert!(task.is_satisfied());
        task.reset_state(Status::Waiting, "reset", t(0));
        assert!(!task.is_satisfied());
    }

    #[test]
    fn vacated_resets_to_submitted_without_polling() {
        let mut task = new_task();
        task.on_message_submitted(t(0));
        task.on_message_started(t(1));
        task.on_vacated(t(2));
        assert_eq!(task.status(), Status::Submitted);
        assert!(task.job_vacated);
    }

    #[test]
    fn coherence_holds_after_every_transition_in_a_run() {
        let mut task = new_task();
        for (f, now) in [
            (TaskState::on_message_submitted as fn(&mut TaskState, DateTime<Utc>) -> TransitionOutcome, t(0)),
            (TaskState::on_message_started, t(1)),
        ] {
            f(&mut task, now);
            assert!(task.check_coherence().is_ok());
        }
        task.on_message_failed(t(2));
        assert!(task.check_coherence().is_ok());
    }
}
