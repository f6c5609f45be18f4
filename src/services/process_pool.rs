//! External Process Pool (§6, out of scope as a component in its own
//! right — only its interface is specified). This module defines that
//! interface plus one concrete, minimal implementation
//! (`TokioProcessPool`) so the rest of the crate has something to run
//! against.
//!
//! The source interface is callback-shaped (`put_command(context,
//! callback, extra_args)`); in async Rust the natural translation is an
//! `async fn` that resolves to the callback's arguments instead of
//! invoking a passed-in closure — callers `.await` it the way the host's
//! `hook_executor.rs::run_script` awaits `Command::output()`. The
//! `cmd_key`/`id_keys` echo is preserved so callers can still tell which
//! in-flight submission a result belongs to.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::instrument;

/// One outbound sub-command: mail, rsync-over-ssh, or a custom handler.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Opaque identifier for logging/correlation, e.g. a registry key's
    /// string form.
    pub cmd_key: String,
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
    pub stdin: Option<String>,
    /// When true, `argv[0]` is interpreted as a full shell command line
    /// rather than an executable + arguments (the custom-handler
    /// template path).
    pub shell: bool,
    /// Extra identity fields echoed back on the result, mirroring the
    /// source's `id_keys`/`cmd_kwargs` round trip.
    pub id_keys: HashMap<String, String>,
}

impl CommandContext {
    pub fn new(cmd_key: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            cmd_key: cmd_key.into(),
            argv,
            env: HashMap::new(),
            stdin: None,
            shell: false,
            id_keys: HashMap::new(),
        }
    }
}

/// Result of running one `CommandContext`.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub cmd_key: String,
    pub ret_code: i32,
    pub out: String,
    pub err: String,
    pub cmd_kwargs: HashMap<String, String>,
}

impl ProcessContext {
    pub const fn succeeded(&self) -> bool {
        self.ret_code == 0
    }
}

impl std::fmt::Display for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] rc={} out={:?} err={:?}",
            self.cmd_key, self.ret_code, self.out, self.err
        )
    }
}

/// The process pool's one entry point.
#[async_trait]
pub trait ProcessPool: Send + Sync {
    async fn put_command(&self, context: CommandContext) -> ProcessContext;
}

/// A minimal `tokio::process::Command`-backed pool: no queueing, no
/// concurrency limits, no process-group management — submission and
/// pooling policy belong to the out-of-scope real process pool this
/// stands in for.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessPool;

#[async_trait]
impl ProcessPool for TokioProcessPool {
    #[instrument(skip(self, context), fields(cmd_key = %context.cmd_key))]
    async fn put_command(&self, context: CommandContext) -> ProcessContext {
        use std::process::Stdio;
        use tokio::io::AsyncWriteExt;

        let mut command = if context.shell {
            let mut c = Command::new("sh");
            c.arg("-c").arg(context.argv.join(" "));
            c
        } else {
            let mut iter = context.argv.iter();
            let program = iter.next().cloned().unwrap_or_default();
            let mut c = Command::new(program);
            c.args(iter);
            c
        };

        command
            .envs(&context.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ProcessContext {
                    cmd_key: context.cmd_key,
                    ret_code: -1,
                    out: String::new(),
                    err: e.to_string(),
                    cmd_kwargs: context.id_keys,
                };
            }
        };

        if let Some(stdin_text) = &context.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(stdin_text.as_bytes()).await;
            }
        } else {
            drop(child.stdin.take());
        }

        match child.wait_with_output().await {
            Ok(output) => ProcessContext {
                cmd_key: context.cmd_key,
                ret_code: output.status.code().unwrap_or(-1),
                out: String::from_utf8_lossy(&output.stdout).into_owned(),
                err: String::from_utf8_lossy(&output.stderr).into_owned(),
                cmd_kwargs: context.id_keys,
            },
            Err(e) => ProcessContext {
                cmd_key: context.cmd_key,
                ret_code: -1,
                out: String::new(),
                err: e.to_string(),
                cmd_kwargs: context.id_keys,
            },
        }
    }
}
