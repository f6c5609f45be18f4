//! cyclecore — the task-event core of a cycling workflow engine.
//!
//! This crate reconciles incoming and polled task-status messages
//! against each task's lifecycle state, drives the state machine
//! through submission, execution, retry and expiration, and schedules
//! event-handler actions (mail, remote job-log retrieval, custom
//! handlers) with bounded retry and batching.
//!
//! Task *submission* (choosing hosts, writing job files), scheduling
//! of dependencies between tasks, and the suite database manager
//! itself are out of scope — this crate only defines the narrow
//! contracts it calls into them through.

pub mod domain;
pub mod services;

pub use domain::{
    ActionTimer, ConfigError, DbError, DriverError, HandlerKind, OutputSet, Prerequisite,
    ReconcileError, SimplePrerequisite, Status, TaskId, TaskState, TimerContext, TimerError,
    TimerKey, TransitionError, TransitionOutcome, TransitionRecord,
};
pub use services::{
    setup_event_handlers, ActivityLog, BroadcastOverride, CommandContext, ConfigLookup, DbAdapter,
    EventTimerRegistry, GlobalConfig, HandlerSetupContext, MessageKind, MessageReconciler,
    ProcessContext, ProcessPool, ReconcileOutcome, RuntimeConfig, Severity, SqliteDbAdapter,
    TaskEventRow, TaskJobDelta, TickSummary, TokioProcessPool,
};
