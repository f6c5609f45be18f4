//! Event-handler setup routines (C7, §4.7).
//!
//! For each task transition emitting an event, three parallel setup
//! routines decide whether to register a new timer in the Event Timer
//! Registry (C5), consulting Config Lookup (C8) for the relevant
//! per-event/per-host settings. This is the glue between the Message
//! Reconciler's (C6) transition outcomes and the registry — grounded on
//! the host's `services/hook_registry.rs` pattern of a small set of
//! independent "should this fire" checks run side by side for one
//! incoming event, each owning its own registration.

use serde_json::Value;

use crate::domain::event_timer::{HandlerKind, TimerContext, TimerKey};
use crate::domain::TaskId;
use crate::services::config_lookup::ConfigLookup;
use crate::services::event_timer_registry::EventTimerRegistry;

/// Events for which remote job-log retrieval may be set up, per §4.7.
const LOG_RETRIEVAL_EVENTS: [&str; 3] = ["failed", "retry", "succeeded"];

/// Everything the three setup routines need about the task and the
/// event that just fired, gathered by the caller (typically right
/// after a `MessageReconciler::process_message` transition).
pub struct HandlerSetupContext<'a> {
    pub task_id: &'a TaskId,
    pub submit_num: u64,
    pub event: &'a str,
    pub message: Option<&'a str>,
    /// `user@host` the task's job ran/runs on.
    pub user_at_host: &'a str,
    pub remote_job_log_dir: &'a str,
}

/// `true` iff `user_at_host` names a job that ran on this host itself —
/// the condition under which job-log retrieval is skipped, since an
/// rsync to fetch files already local would be a no-op.
fn is_local(user_at_host: &str) -> bool {
    let host = user_at_host.rsplit('@').next().unwrap_or(user_at_host);
    host == "localhost" || host == "127.0.0.1"
}

fn as_string_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Run all three setup routines for one transition event. Each is
/// independent and skips silently when its own condition isn't met —
/// mirroring §4.7's "three parallel setup routines run" framing exactly.
pub async fn setup_event_handlers(
    ctx: &HandlerSetupContext<'_>,
    config: &ConfigLookup,
    registry: &EventTimerRegistry,
) {
    setup_logs_retrieval(ctx, config, registry).await;
    setup_mail(ctx, config, registry).await;
    setup_custom_handlers(ctx, config, registry).await;
}

/// §4.7: logs retrieval is set up only when the event is one of
/// `{failed, retry, succeeded}`, the task is remote, `retrieve job
/// logs` is configured true, and no logs timer already exists for that
/// key.
async fn setup_logs_retrieval(
    ctx: &HandlerSetupContext<'_>,
    config: &ConfigLookup,
    registry: &EventTimerRegistry,
) {
    if !LOG_RETRIEVAL_EVENTS.contains(&ctx.event) {
        return;
    }
    if is_local(ctx.user_at_host) {
        return;
    }
    let enabled = config.get_host_conf(ctx.task_id, "retrieve job logs", Value::Bool(false), None);
    if enabled != Value::Bool(true) {
        return;
    }
    let key = TimerKey::new(
        HandlerKind::JobLogsRetrieve,
        ctx.event.to_string(),
        ctx.task_id.clone(),
        ctx.submit_num,
    );
    if registry.contains_key(&key).await {
        return;
    }
    registry
        .register(
            key,
            vec![0],
            TimerContext::JobLogsRetrieve {
                task: ctx.task_id.to_string(),
                submit_num: ctx.submit_num,
                platform: ctx.user_at_host.to_string(),
                remote_log_dir: ctx.remote_job_log_dir.to_string(),
            },
        )
        .await;
}

/// §4.7: mail is set up only when the event is listed in `mail events`.
async fn setup_mail(ctx: &HandlerSetupContext<'_>, config: &ConfigLookup, registry: &EventTimerRegistry) {
    let configured = config.get_events_conf(ctx.task_id, "mail events", Value::Array(vec![]));
    let events = as_string_list(&configured);
    if !events.iter().any(|e| e == ctx.event) {
        return;
    }
    let key = TimerKey::new(
        HandlerKind::Mail,
        ctx.event.to_string(),
        ctx.task_id.clone(),
        ctx.submit_num,
    );
    if registry.contains_key(&key).await {
        return;
    }
    let task_str = format!(
        "{}/{}/{:02}",
        ctx.task_id.cycle_point, ctx.task_id.name, ctx.submit_num
    );
    registry
        .register(
            key,
            vec![0],
            TimerContext::Mail {
                event: ctx.event.to_string(),
                subject: ctx.event.to_string(),
                task: task_str,
                message: ctx.message.map(str::to_string),
            },
        )
        .await;
}

/// §4.7: custom handlers fire on their own per-event config (`<event>
/// handler`), falling back to the shared `handlers` list only when no
/// per-event handler is configured and the event is listed in `handler
/// events` — the two sources are mutually exclusive, not combined.
/// Each handler string gets its own registry entry, indexed
/// `event-handler-00`, `event-handler-01`, ... — the index is folded
/// into the `TimerKey`'s event field (`<event>#event-handler-NN`) to
/// disambiguate multiple handlers on the same event per spec §3's
/// `kind = "event-handler-NN"` key variant.
async fn setup_custom_handlers(
    ctx: &HandlerSetupContext<'_>,
    config: &ConfigLookup,
    registry: &EventTimerRegistry,
) {
    let mut commands = as_string_list(&config.get_events_conf(
        ctx.task_id,
        &format!("{} handler", ctx.event),
        Value::Null,
    ));

    if commands.is_empty() {
        let handler_events = as_string_list(&config.get_events_conf(ctx.task_id, "handler events", Value::Array(vec![])));
        if handler_events.iter().any(|e| e == ctx.event) {
            commands = as_string_list(&config.get_events_conf(ctx.task_id, "handlers", Value::Array(vec![])));
        }
    }

    for (i, command) in commands.into_iter().enumerate() {
        let label = format!("event-handler-{i:02}");
        let key = TimerKey::new(
            HandlerKind::Custom,
            format!("{}#{}", ctx.event, label),
            ctx.task_id.clone(),
            ctx.submit_num,
        );
        if registry.contains_key(&key).await {
            continue;
        }
        registry
            .register(
                key,
                vec![0],
                TimerContext::CustomHandler {
                    command,
                    event: ctx.event.to_string(),
                    task: ctx.task_id.to_string(),
                    message: ctx.message.map(str::to_string),
                },
            )
            .await;
    }
}
