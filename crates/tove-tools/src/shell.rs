// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Persistent shell session backing the `bash` tool.
//!
//! One long-lived `bash` child per agent session, so working directory and
//! environment changes survive between calls.  Output is framed with a
//! per-command sentinel carrying the exit status; stderr is merged into
//! stdout at session start so ordering between the two is preserved.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct ShellSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ShellSession {
    pub async fn spawn() -> anyhow::Result<Self> {
        let mut cmd = Command::new("bash");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // Detach from any controlling terminal so subprocesses cannot open
        // /dev/tty and emit escape sequences into the UI.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        let mut child = cmd.spawn().context("spawning bash")?;
        let mut stdin = child.stdin.take().context("bash stdin unavailable")?;
        let stdout = child.stdout.take().context("bash stdout unavailable")?;
        // Merge stderr into stdout for every subsequent command.
        stdin.write_all(b"exec 2>&1\n").await?;
        stdin.flush().await?;
        Ok(Self { child, stdin, stdout: BufReader::new(stdout) })
    }

    /// Run one command and collect its merged output and exit status.
    ///
    /// On timeout or cancellation the child is killed and an error is
    /// returned; the caller respawns a fresh session on the next call.
    pub async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> anyhow::Result<(String, i32)> {
        let sentinel = format!("__TOVE_EOC_{}__", Uuid::new_v4().simple());
        debug!(cmd = %command, "shell run");

        let framed = format!("{command}\nprintf '%s %d\\n' {sentinel} $?\n");
        self.stdin.write_all(framed.as_bytes()).await?;
        self.stdin.flush().await?;

        let read_until_sentinel = async {
            let mut output = String::new();
            let mut line = String::new();
            loop {
                line.clear();
                let n = self.stdout.read_line(&mut line).await?;
                if n == 0 {
                    anyhow::bail!("shell exited unexpectedly");
                }
                if let Some(rest) = line.trim_end().strip_prefix(&sentinel) {
                    let code = rest.trim().parse::<i32>().unwrap_or(-1);
                    return Ok((output, code));
                }
                output.push_str(&line);
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("shell command canceled; killing session");
                let _ = self.child.kill().await;
                anyhow::bail!("canceled")
            }
            result = tokio::time::timeout(timeout, read_until_sentinel) => match result {
                Ok(inner) => inner,
                Err(_) => {
                    warn!(secs = timeout.as_secs(), "shell command timed out; killing session");
                    let _ = self.child.kill().await;
                    anyhow::bail!("timeout after {}s", timeout.as_secs())
                }
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
