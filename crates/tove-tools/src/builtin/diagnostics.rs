// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolCtx, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Hint,
}

impl Severity {
    fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Hint => "hint",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub path: String,
    pub line: usize,
    pub severity: Severity,
    pub message: String,
}

/// Where diagnostics come from.  A language-server client is an external
/// collaborator; the core only consumes this read-only seam.
#[async_trait]
pub trait DiagnosticsSource: Send + Sync {
    /// Diagnostics for one path, or project-wide when `path` is `None`.
    async fn diagnostics(&self, path: Option<&str>) -> anyhow::Result<Vec<Diagnostic>>;
}

/// Source used when no language server is attached.
pub struct NullDiagnostics;

#[async_trait]
impl DiagnosticsSource for NullDiagnostics {
    async fn diagnostics(&self, _path: Option<&str>) -> anyhow::Result<Vec<Diagnostic>> {
        Ok(Vec::new())
    }
}

/// Fixed-list source for tests.
pub struct StaticDiagnostics(pub Vec<Diagnostic>);

#[async_trait]
impl DiagnosticsSource for StaticDiagnostics {
    async fn diagnostics(&self, path: Option<&str>) -> anyhow::Result<Vec<Diagnostic>> {
        Ok(match path {
            None => self.0.clone(),
            Some(p) => self.0.iter().filter(|d| d.path == p).cloned().collect(),
        })
    }
}

pub struct DiagnosticsTool {
    source: Arc<dyn DiagnosticsSource>,
}

impl DiagnosticsTool {
    pub fn new(source: Arc<dyn DiagnosticsSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for DiagnosticsTool {
    fn name(&self) -> &str {
        "diagnostics"
    }

    fn description(&self) -> &str {
        "Return language-server diagnostics (errors, warnings, hints).\n\
         path: restrict to one file; omit for project-wide diagnostics.\n\
         Read-only; requires a language server to be attached, otherwise\n\
         reports an empty set."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to report on (optional; omit for the whole project)"
                }
            },
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let path = call.args.get("path").and_then(|v| v.as_str());
        match self.source.diagnostics(path).await {
            Ok(list) if list.is_empty() => ToolOutput::ok(&call.id, "(no diagnostics)"),
            Ok(list) => {
                let lines: Vec<String> = list
                    .iter()
                    .map(|d| {
                        format!("{}:{}: {}: {}", d.path, d.line, d.severity.as_str(), d.message)
                    })
                    .collect();
                ToolOutput::ok(&call.id, lines.join("\n"))
            }
            Err(e) => ToolOutput::err(&call.id, format!("diagnostics error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
