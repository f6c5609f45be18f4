//! Domain error types for the task-event core.
//!
//! Each enum is a closed, structured error surface for one module
//! boundary, following the repository convention of one `thiserror`
//! enum per concern rather than a single catch-all.

use thiserror::Error;

use super::status::Status;

/// Errors from a rejected or malformed state transition (C4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("no transition defined from {from} on event {event}")]
    NotDefined { from: Status, event: String },

    #[error("task is held; unhold before attempting {event}")]
    Held { event: String },

    #[error("output/status coherence violated: {0}")]
    Incoherent(String),
}

/// Errors surfaced while reconciling an incoming or polled message (C6).
///
/// The reconciler itself never propagates these upward (see spec §7's
/// propagation policy) — they exist so call sites and tests can observe
/// *why* a message was dropped or deferred, via the `Outcome` it returns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("stale message: submit_num {incoming} does not match current {current}")]
    StaleSubmitNum { incoming: u64, current: u64 },

    #[error("unhandled message: {0}")]
    Unhandled(String),
}

/// Errors from the Action Timer / Event Timer Registry (C2/C5).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer for key {0} already waiting on a callback")]
    AlreadyWaiting(String),

    #[error("timer for key {0} is exhausted")]
    Exhausted(String),

    #[error("no timer registered for key {0}")]
    NotFound(String),
}

/// Errors from handler driver command construction / dispatch (C7).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("template substitution failed for handler {handler}: missing key {key}")]
    TemplateSubstitutionFailed { handler: String, key: String },

    #[error("sub-command exited non-zero: {0}")]
    CommandFailed(String),

    #[error("sub-command could not be spawned: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("job log retrieval partially failed, missing: {0:?}")]
    PartialLogRetrieval(Vec<String>),
}

/// Errors from the DB adapter contract (C9).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from three-tier configuration lookup (C8).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("validation failed for {field}: {reason}")]
    ValidationError { field: String, reason: String },
}
