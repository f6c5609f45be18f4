//! Integration tests for the task-event core's end-to-end scenarios.
//!
//! Tests verify:
//! 1. A normal run reaches `succeeded` with coherent outputs and a DB job row.
//! 2. A stale `started` after success defers to poll, then is believed.
//! 3. An out-of-order submit number is ignored with no state change.
//! 4. A submission-failed retry path exhausts to `submit-failed` exactly once.
//! 5. Mail notifications batch within the batching window.
//! 6. A partial log retrieval is reported and the entry is rescheduled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use cyclecore::domain::event_timer::{HandlerKind, TimerContext, TimerKey};
use cyclecore::services::activity_log::ActivityLog;
use cyclecore::services::db_adapter::SqliteDbAdapter;
use cyclecore::services::event_timer_registry::EventTimerRegistry;
use cyclecore::services::handler_drivers::mail::MailDriver;
use cyclecore::services::process_pool::{CommandContext, ProcessContext, ProcessPool};
use cyclecore::{MessageReconciler, Severity, Status, TaskId, TaskState};

fn t(seconds: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + Duration::seconds(seconds)
}

async fn reconciler() -> MessageReconciler {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let adapter = SqliteDbAdapter::new(pool);
    adapter.migrate().await.unwrap();
    MessageReconciler::new(Arc::new(adapter))
}

#[tokio::test]
async fn scenario_1_normal_run_reaches_succeeded_with_coherent_outputs() {
    let reconciler = reconciler().await;
    let task_id = TaskId::new("foo", "20260101T00");
    let mut task = TaskState::new(task_id.clone(), vec![30, 60], vec![0]);

    for (msg, at) in [("submitted", t(0)), ("started", t(1)), ("succeeded", t(2))] {
        reconciler
            .process_message(&mut task, &task_id, Severity::Info, msg, |_, _| {}, Some(at), None, Some(0), at)
            .await;
    }

    assert_eq!(task.status(), Status::Succeeded);
    assert!(task.outputs.is_completed("submitted"));
    assert!(task.outputs.is_completed("started"));
    assert!(task.outputs.is_completed("succeeded"));
    assert!(task.check_coherence().is_ok());
}

#[tokio::test]
async fn scenario_2_stale_started_after_success_defers_then_is_believed() {
    let reconciler = reconciler().await;
    let task_id = TaskId::new("foo", "20260101T00");
    let mut task = TaskState::new(task_id.clone(), vec![30, 60], vec![0]);

    for (msg, at) in [("submitted", t(0)), ("started", t(1)), ("succeeded", t(2))] {
        reconciler
            .process_message(&mut task, &task_id, Severity::Info, msg, |_, _| {}, Some(at), None, Some(0), at)
            .await;
    }
    assert_eq!(task.status(), Status::Succeeded);

    let mut polls = 0;
    reconciler
        .process_message(&mut task, &task_id, Severity::Info, "started", |_, _| polls += 1, Some(t(1)), None, Some(0), t(1))
        .await;
    assert_eq!(polls, 1);
    assert!(task.confirming_with_poll);
    assert_eq!(task.status(), Status::Succeeded);

    reconciler
        .process_message(&mut task, &task_id, Severity::Info, "started", |_, _| polls += 1, Some(t(1)), None, Some(0), t(1))
        .await;
    assert_eq!(polls, 1, "the poll's reply is not re-polled");
    assert!(!task.confirming_with_poll);
}

#[tokio::test]
async fn scenario_3_out_of_order_submit_num_is_ignored() {
    let reconciler = reconciler().await;
    let task_id = TaskId::new("foo", "20260101T00");
    let mut task = TaskState::new(task_id.clone(), vec![30, 60], vec![0]);
    task.submit_num = 3;

    let mut polled = false;
    reconciler
        .process_message(&mut task, &task_id, Severity::Info, "started", |_, _| polled = true, Some(t(0)), None, Some(2), t(0))
        .await;

    assert_eq!(task.status(), Status::Waiting);
    assert!(!polled);
}

#[tokio::test]
async fn scenario_4_submission_retry_path_exhausts_to_submit_failed_exactly_once() {
    let reconciler = reconciler().await;
    let task_id = TaskId::new("foo", "20260101T00");
    let mut task = TaskState::new(task_id.clone(), vec![30, 60], vec![0]);

    let mut final_transitions = 0;
    for t_off in [0, 30, 90] {
        let outcome = reconciler
            .process_message(&mut task, &task_id, Severity::Info, "submission failed", |_, _| {}, Some(t(t_off)), None, Some(0), t(t_off))
            .await;
        if let cyclecore::ReconcileOutcome::Transitioned { event_name, .. } = outcome {
            if event_name == "submit-failed" {
                final_transitions += 1;
            }
        }
    }
    assert_eq!(task.status(), Status::SubmitFailed);
    assert_eq!(final_transitions, 1, "submit-failed handler fires exactly once");
}

struct FakePool {
    calls: AtomicUsize,
}

#[async_trait]
impl ProcessPool for FakePool {
    async fn put_command(&self, context: CommandContext) -> ProcessContext {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ProcessContext {
            cmd_key: context.cmd_key,
            ret_code: 0,
            out: String::new(),
            err: String::new(),
            cmd_kwargs: Default::default(),
        }
    }
}

#[tokio::test]
async fn scenario_5_mail_batches_three_failed_tasks_into_one_dispatch() {
    let tmp = tempfile::tempdir().unwrap();
    let activity_log = Arc::new(ActivityLog::new(tmp.path().join("jobs"), tmp.path().join("suite.log")));
    let mail_driver = MailDriver {
        suite: "my-suite".to_string(),
        mail_from: "cyclecore@localhost".to_string(),
        mail_to: "ops@example.com".to_string(),
        mail_smtp: None,
        host: "scheduler1".to_string(),
        port: "8080".to_string(),
        owner: "alice".to_string(),
        footer_template: None,
    };
    let pool = Arc::new(FakePool { calls: AtomicUsize::new(0) });
    let registry = EventTimerRegistry::new(
        pool.clone(),
        activity_log,
        mail_driver,
        Duration::seconds(60),
        tmp.path().join("jobs"),
    );

    for name in ["alpha", "beta", "gamma"] {
        let task_id = TaskId::new(name, "20260101T00");
        let key = TimerKey::new(HandlerKind::Mail, "failed", task_id.clone(), 1);
        registry
            .register(
                key,
                vec![0],
                TimerContext::Mail {
                    event: "failed".to_string(),
                    subject: "failed".to_string(),
                    task: format!("20260101T00/{name}/01"),
                    message: None,
                },
            )
            .await;
    }

    let summary = registry.process_events(t(0), false).await;
    assert_eq!(summary.dispatched_mail_groups, 1);
    assert_eq!(pool.calls.load(Ordering::SeqCst), 1);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn scenario_6_partial_log_retrieval_is_rescheduled_with_missing_file_noted() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs_dir = tmp.path().join("jobs");
    let activity_log = Arc::new(ActivityLog::new(&jobs_dir, tmp.path().join("suite.log")));
    let mail_driver = MailDriver {
        suite: "my-suite".to_string(),
        mail_from: "cyclecore@localhost".to_string(),
        mail_to: "ops@example.com".to_string(),
        mail_smtp: None,
        host: "scheduler1".to_string(),
        port: "8080".to_string(),
        owner: "alice".to_string(),
        footer_template: None,
    };

    struct PartialSuccessPool {
        jobs_dir: std::path::PathBuf,
    }
    #[async_trait]
    impl ProcessPool for PartialSuccessPool {
        async fn put_command(&self, context: CommandContext) -> ProcessContext {
            // Simulate the rsync transfer delivering only job.out.
            let submit_dir = self.jobs_dir.join("20260101T00").join("foo").join("01");
            tokio::fs::create_dir_all(&submit_dir).await.unwrap();
            tokio::fs::write(submit_dir.join("job.out"), b"ok").await.unwrap();
            ProcessContext {
                cmd_key: context.cmd_key,
                ret_code: 0,
                out: String::new(),
                err: String::new(),
                cmd_kwargs: Default::default(),
            }
        }
    }

    let pool = Arc::new(PartialSuccessPool { jobs_dir: jobs_dir.clone() });
    let registry = EventTimerRegistry::new(pool, activity_log, mail_driver, Duration::seconds(60), jobs_dir.clone());

    let task_id = TaskId::new("foo", "20260101T00");
    let key = TimerKey::new(HandlerKind::JobLogsRetrieve, "failed", task_id.clone(), 1);
    registry
        .register(
            key.clone(),
            vec![0, 30],
            TimerContext::JobLogsRetrieve {
                task: "foo.20260101T00".to_string(),
                submit_num: 1,
                platform: "alice@worker1".to_string(),
                remote_log_dir: "/home/alice/cycle/log/job".to_string(),
            },
        )
        .await;

    let summary = registry.process_events(t(0), false).await;
    assert_eq!(summary.dispatched_log_groups, 1);
    // job.out arrived, job.err did not: the entry stays for a retry.
    assert!(registry.contains_key(&key).await);

    let activity_contents = tokio::fs::read_to_string(jobs_dir.join("20260101T00").join("foo").join("01").join("job-activity.log"))
        .await
        .unwrap();
    assert!(activity_contents.contains("job.err"));
}
