// src/exec/command.rs

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engine::InvocationContext;
use crate::group::{TaskFuture, TaskItem};

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout lines, without trailing newlines.
    pub stdout: Vec<String>,
    pub exit_code: i32,
}

/// Task item that runs a shell command.
///
/// The item fails if the command cannot be spawned or exits non-zero.
#[derive(Debug, Clone)]
pub struct CommandTaskItem {
    name: String,
    cmd: String,
}

impl CommandTaskItem {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
        }
    }
}

impl TaskItem<CommandOutput> for CommandTaskItem {
    fn invoke(&self, ctx: &InvocationContext) -> TaskFuture<CommandOutput> {
        Box::pin(run_command(self.name.clone(), self.cmd.clone(), ctx.id()))
    }
}

async fn run_command(name: String, cmd_line: String, invocation: u64) -> Result<CommandOutput> {
    info!(task = %name, invocation, cmd = %cmd_line, "starting task process");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&cmd_line);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{name}'"))?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let task_name = name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stderr: {}", line);
            }
        });
    }

    let mut stdout = Vec::new();
    if let Some(out) = child.stdout.take() {
        let mut lines = BufReader::new(out).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("reading stdout of task '{name}'"))?
        {
            debug!(task = %name, "stdout: {}", line);
            stdout.push(line);
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{name}'"))?;
    let exit_code = status.code().unwrap_or(-1);

    info!(
        task = %name,
        invocation,
        exit_code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        warn!(task = %name, exit_code, "task process failed");
        bail!("command `{cmd_line}` exited with status {exit_code}");
    }

    Ok(CommandOutput { stdout, exit_code })
}
