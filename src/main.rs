//! cyclecore bootstrap binary.
//!
//! Thin wiring only: load config, open the DB, construct the registry
//! and reconciler, tick the scheduler. Task submission and dependency
//! wiring live in another subsystem, out of scope here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::Parser;
use cyclecore::services::handler_drivers::mail::MailDriver;
use cyclecore::{ActivityLog, ConfigLookup, EventTimerRegistry, GlobalConfig, SqliteDbAdapter, TokioProcessPool};
use sqlx::SqlitePool;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cyclecore")]
#[command(about = "Task-event reconciliation and retry core for a cycling workflow engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the suite-wide YAML config (task events / host settings).
    #[arg(long, env = "CYCLECORE_CONFIG", default_value = "cyclecore.yaml")]
    config: String,

    /// SQLite database path for the events/jobs tables.
    #[arg(long, env = "CYCLECORE_DB", default_value = "cyclecore.db")]
    db: String,

    /// Directory job logs are retrieved into and activity logs live under.
    #[arg(long, env = "CYCLECORE_JOB_LOG_DIR", default_value = "./log/job")]
    job_log_dir: PathBuf,

    /// Suite-wide fallback activity log, used when a task's own job
    /// directory doesn't exist yet.
    #[arg(long, env = "CYCLECORE_SUITE_LOG", default_value = "./log/suite.log")]
    suite_log: PathBuf,

    /// Minimum seconds between outgoing batched mail notifications.
    #[arg(long, env = "CYCLECORE_MAIL_INTERVAL", default_value_t = 300)]
    mail_interval_secs: i64,

    /// Seconds between scheduler ticks.
    #[arg(long, env = "CYCLECORE_TICK_INTERVAL", default_value_t = 5)]
    tick_interval_secs: u64,

    /// `mail -r` sender address.
    #[arg(long, env = "CYCLECORE_MAIL_FROM", default_value = "cyclecore@localhost")]
    mail_from: String,

    /// `mail` recipient address.
    #[arg(long, env = "CYCLECORE_MAIL_TO")]
    mail_to: Option<String>,

    /// Suite name, used in mail subjects and the handler-data dictionary.
    #[arg(long, env = "CYCLECORE_SUITE", default_value = "suite")]
    suite: String,

    /// Log as JSON instead of the default pretty format.
    #[arg(long)]
    json_logs: bool,
}

/// Sets up stdout logging plus a non-blocking rolling file layer under
/// the suite log's directory. The returned guard must be held for the
/// process lifetime or the file writer thread is torn down immediately.
fn init_logging(json: bool, suite_log: &std::path::Path) -> WorkerGuard {
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    let log_dir = suite_log.parent().filter(|p| !p.as_os_str().is_empty());
    let file_name = suite_log
        .file_name()
        .map_or_else(|| "suite.log".into(), |n| n.to_string_lossy().into_owned());
    let file_appender = tracing_appender::rolling::never(log_dir.unwrap_or_else(|| std::path::Path::new(".")), file_name);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_filter(env_filter.clone());

    if json {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer().json().with_filter(env_filter))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer().pretty().with_filter(env_filter))
            .init();
    }

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.json_logs, &cli.suite_log);

    let global_config = GlobalConfig::load(&cli.config).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %cli.config, "no suite config found, using defaults");
        GlobalConfig::default()
    });
    let _config_lookup = ConfigLookup::new(global_config);

    let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cli.db))
        .await
        .context("failed to open cyclecore database")?;
    let db_adapter = SqliteDbAdapter::new(pool);
    db_adapter
        .migrate()
        .await
        .context("failed to run cyclecore database migrations")?;

    let activity_log = Arc::new(ActivityLog::new(&cli.job_log_dir, &cli.suite_log));
    let mail_driver = MailDriver {
        suite: cli.suite.clone(),
        mail_from: cli.mail_from.clone(),
        mail_to: cli.mail_to.clone().unwrap_or_default(),
        mail_smtp: None,
        host: hostname(),
        port: "0".to_string(),
        owner: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        footer_template: None,
    };

    let registry = Arc::new(EventTimerRegistry::new(
        Arc::new(TokioProcessPool),
        activity_log,
        mail_driver,
        Duration::seconds(cli.mail_interval_secs),
        cli.job_log_dir.clone(),
    ));

    tracing::info!(db = %cli.db, config = %cli.config, "cyclecore event core started");

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    let mut ticker = tokio::time::interval(StdDuration::from_secs(cli.tick_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = registry.process_events(chrono::Utc::now(), false).await;
                if summary.dispatched_custom > 0
                    || summary.dispatched_mail_groups > 0
                    || summary.dispatched_log_groups > 0
                    || !summary.exhausted.is_empty()
                {
                    tracing::debug!(?summary, "scheduler tick");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown requested, draining in-flight handlers");
                let _ = registry.process_events(chrono::Utc::now(), true).await;
                break;
            }
        }
    }

    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "localhost".to_string())
}
