//! Service layer: I/O-touching collaborators built on top of the
//! domain layer — message reconciliation, the event-timer scheduler,
//! the three handler drivers, config lookup, the DB adapter, the
//! process pool, and small supporting utilities (shell quoting, the
//! activity log).

pub mod activity_log;
pub mod config_lookup;
pub mod db_adapter;
pub mod event_timer_registry;
pub mod handler_drivers;
pub mod handler_setup;
pub mod message_reconciler;
pub mod process_pool;
pub mod shell_quote;

pub use activity_log::ActivityLog;
pub use config_lookup::{BroadcastOverride, ConfigLookup, GlobalConfig, RuntimeConfig};
pub use db_adapter::{DbAdapter, SqliteDbAdapter, TaskEventRow, TaskJobDelta};
pub use event_timer_registry::{EventTimerRegistry, TickSummary};
pub use handler_setup::{setup_event_handlers, HandlerSetupContext};
pub use message_reconciler::{MessageKind, MessageReconciler, ReconcileOutcome, Severity};
pub use process_pool::{CommandContext, ProcessContext, ProcessPool, TokioProcessPool};
