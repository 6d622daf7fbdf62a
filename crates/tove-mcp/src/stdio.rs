// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Line-delimited JSON-RPC over a child process's stdin/stdout.
//!
//! Requests are serialized one at a time behind a mutex; responses are
//! matched by id, and any interleaved notification lines (no `id`) are
//! skipped.  The child is killed when the transport is dropped.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ToolCallResult, ToolDescriptor, ToolsListResult};
use crate::transport::McpTransport;

pub struct StdioTransport {
    // stdin/stdout share one mutex: a request and its response are a single
    // critical section.
    io: Mutex<(ChildStdin, BufReader<ChildStdout>)>,
    _child: Child,
    next_id: AtomicU64,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn().with_context(|| format!("spawning tool server {command}"))?;
        let stdin = child.stdin.take().context("tool server stdin unavailable")?;
        let stdout = child.stdout.take().context("tool server stdout unavailable")?;
        Ok(Self {
            io: Mutex::new((stdin, BufReader::new(stdout))),
            _child: child,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&req)?;
        debug!(method, id, "stdio tool-server request");

        let mut io = self.io.lock().await;
        io.0.write_all(line.as_bytes()).await?;
        io.0.write_all(b"\n").await?;
        io.0.flush().await?;

        let mut buf = String::new();
        loop {
            buf.clear();
            let n = io.1.read_line(&mut buf).await?;
            if n == 0 {
                anyhow::bail!("tool server closed its stdout");
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            let resp: JsonRpcResponse = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "skipping unparseable tool-server line");
                    continue;
                }
            };
            // Notifications and responses to other requests are skipped.
            if resp.id != Some(id) {
                continue;
            }
            if let Some(err) = resp.error {
                anyhow::bail!("tool server error {}: {}", err.code, err.message);
            }
            return resp.result.context("tool server response missing result");
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
        let result = self.request("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)?;
        Ok(parsed.tools)
    }

    async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<(String, bool)> {
        let params = serde_json::json!({ "name": name, "arguments": args });
        let result = self.request("tools/call", Some(params)).await?;
        let parsed: ToolCallResult = serde_json::from_value(result)?;
        Ok((parsed.text(), parsed.is_error))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
