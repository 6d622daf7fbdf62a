// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::permission::{PermissionBroker, PermissionRequest};
use crate::shell::ShellSession;
use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};

/// Hard byte ceiling for output returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Lines kept from the head and tail of oversized output.  Errors and
/// summaries cluster at the end of build/test output, so the tail matters
/// at least as much as the head.
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

/// Command substrings that are refused outright, before any permission
/// prompt.  The filter is a backstop, not a sandbox.
const BLOCKED_FORMS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=",
    ":(){",
    "> /dev/sd",
    "chmod -R 777 /",
    "shutdown",
    "reboot",
];

/// Shell tool with a persistent session: working directory and environment
/// survive between calls within one agent session.
pub struct BashTool {
    shell: Arc<Mutex<Option<ShellSession>>>,
    broker: Arc<PermissionBroker>,
}

impl BashTool {
    pub fn new(shell: Arc<Mutex<Option<ShellSession>>>, broker: Arc<PermissionBroker>) -> Self {
        Self { shell, broker }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in a persistent session and return its output.\n\
         The session keeps its working directory and environment between calls:\n\
         `cd`, `export`, and shell functions persist.\n\
         Output is capped at ~20 KB; when larger, the first 100 and last 100 lines\n\
         are preserved with an omission marker in the middle.\n\
         Prefer non-interactive commands; avoid anything that needs a TTY.\n\
         Do NOT use bash for file operations:\n\
         - Read files  → view\n\
         - Search text → grep\n\
         - Find files  → glob\n\
         - Edit files  → edit or patch"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional, capped at 600)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let command = match require_str(call, "command") {
            Ok(c) => c.to_string(),
            Err(out) => return out,
        };

        for form in BLOCKED_FORMS {
            if command.contains(form) {
                return ToolOutput::err(
                    &call.id,
                    format!("command blocked by safety filter: contains {form:?}"),
                );
            }
        }

        // Safe read-only commands skip the prompt; everything else asks.
        if !self.broker.is_safe_command(&command) {
            let granted = self
                .broker
                .request(
                    &ctx.cancel,
                    PermissionRequest {
                        session_id: ctx.session_id.clone(),
                        tool: "bash".into(),
                        action: "execute".into(),
                        description: command.clone(),
                        params: call.args.clone(),
                        path: None,
                    },
                )
                .await;
            if !granted {
                return ToolOutput::err(&call.id, "permission denied");
            }
        }

        // The dispatcher already resolved the effective timeout (user
        // override capped at 600 s) into ctx.timeout.
        let timeout = ctx.timeout;

        debug!(cmd = %command, timeout_secs = timeout.as_secs(), "bash tool");

        let mut guard = self.shell.lock().await;
        if guard.is_none() {
            match ShellSession::spawn().await {
                Ok(s) => *guard = Some(s),
                Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
            }
        }
        let session = guard.as_mut().unwrap();

        match session.run(&command, timeout, &ctx.cancel).await {
            Ok((output, code)) => {
                let content = head_tail_truncate(&output);
                if code == 0 {
                    ToolOutput::ok(&call.id, content)
                } else if code == 1 {
                    // Exit 1 is the Unix convention for "no matches" (grep)
                    // and "condition false" (test); not a hard failure.
                    ToolOutput::ok(&call.id, format!("[exit 1]\n{content}"))
                } else {
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Err(e) => {
                // The session was killed (timeout, cancel, or crash); a new
                // one is spawned lazily on the next call.
                *guard = None;
                ToolOutput::err(&call.id, e.to_string())
            }
        }
    }
}

/// Truncate `s` to fit within `OUTPUT_LIMIT_BYTES`, keeping the first
/// `HEAD_LINES` and last `TAIL_LINES` with an omission marker between.
pub(crate) fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();

    if total <= HEAD_LINES + TAIL_LINES {
        // Byte budget exceeded by very long lines; fall back to byte-level
        // head+tail windows.
        let head = &s[..OUTPUT_LIMIT_BYTES / 2];
        let tail = &s[s.len() - OUTPUT_LIMIT_BYTES / 2..];
        let omitted = s.len() - head.len() - tail.len();
        return format!("{head}\n...[{omitted} bytes omitted]...\n{tail}");
    }

    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[total - TAIL_LINES..].join("\n");
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let omitted_bytes = s.len().saturating_sub(head.len() + tail.len());
    format!("{head}\n...[{omitted_lines} lines / ~{omitted_bytes} bytes omitted]...\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
