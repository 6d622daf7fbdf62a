// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model (forwarded verbatim into the paired
    /// tool result).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// Failures are values, not errors: a tool that cannot do its job returns
/// `is_error = true` with a message the model can act on, and the loop
/// continues.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
    /// Optional machine-readable extras (e.g. the file version label a
    /// write produced).
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Per-call execution context threaded from the agent loop into every tool.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub session_id: String,
    /// The assistant message that carried the tool call.
    pub message_id: String,
    /// Cooperative cancellation; tools blocking on OS resources must honor
    /// it alongside their timeout.
    pub cancel: CancellationToken,
    /// Effective timeout for this call, resolved by the dispatcher from the
    /// per-tool configuration.
    pub timeout: Duration,
}

impl ToolCtx {
    /// Context for tests and sub-agents.
    pub fn test(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: String::new(),
            cancel: CancellationToken::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Trait that every built-in and externally-hosted tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Read-only tools run fully concurrent in a turn; writers are
    /// serialized per path by the dispatcher.
    fn read_only(&self) -> bool {
        false
    }
    /// Execute the tool.  Failures are wrapped in [`ToolOutput::err`].
    async fn execute(&self, ctx: &ToolCtx, call: &ToolCall) -> ToolOutput;
}

/// Required string argument helper shared by the built-ins.
pub(crate) fn require_str<'a>(call: &'a ToolCall, key: &str) -> Result<&'a str, ToolOutput> {
    match call.args.get(key).and_then(|v| v.as_str()) {
        Some(s) => Ok(s),
        None => {
            let preview = serde_json::to_string(&call.args).unwrap_or_else(|_| "null".into());
            Err(ToolOutput::err(
                &call.id,
                format!("missing required parameter '{key}'. Received: {preview}"),
            ))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
