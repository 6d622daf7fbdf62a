// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};
use crate::workspace::Workspace;

/// Files larger than this are refused; the model should grep first and read
/// a window instead.
const MAX_FILE_BYTES: u64 = 250 * 1024;

/// Default number of lines when the caller does not pass a limit.
const DEFAULT_LINE_LIMIT: usize = 200;

/// Read a file with line numbers.  Records the read time so the
/// edit/write/patch stale-read gate can verify freshness.
pub struct ViewTool {
    workspace: Arc<Workspace>,
}

impl ViewTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ViewTool {
    fn name(&self) -> &str {
        "view"
    }

    fn description(&self) -> &str {
        "Read a file. Output lines are formatted L{n}:content (1-indexed).\n\
         offset: 1-indexed first line (default 1). limit: max lines (default 200).\n\
         Files larger than 250 KB are refused — grep for the relevant region\n\
         and read a window with offset+limit instead.\n\
         Viewing a file is required before editing or overwriting it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let path = match require_str(call, "path") {
            Ok(p) => p.to_string(),
            Err(out) => return out,
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path = %path, offset, limit, "view tool");

        let p = Path::new(&path);
        let meta = match tokio::fs::metadata(p).await {
            Ok(m) => m,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };
        if !meta.is_file() {
            return ToolOutput::err(&call.id, format!("{path} is not a regular file"));
        }
        if meta.len() > MAX_FILE_BYTES {
            return ToolOutput::err(
                &call.id,
                format!(
                    "{path} is {} bytes, over the {MAX_FILE_BYTES}-byte view limit. \
                     Use grep to locate the region you need, then view with offset+limit.",
                    meta.len()
                ),
            );
        }

        let content = match tokio::fs::read_to_string(p).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        self.workspace.record_read(p);

        let total = content.lines().count();
        let mut out = String::new();
        let mut shown = 0usize;
        for (idx, line) in content.lines().enumerate().skip(offset - 1) {
            if shown >= limit {
                break;
            }
            out.push_str(&format!("L{}:{}\n", idx + 1, line));
            shown += 1;
        }
        if out.is_empty() {
            out = format!("(file has {total} lines; offset {offset} is past the end)");
        } else if offset - 1 + shown < total {
            out.push_str(&format!(
                "... {} more lines; continue with offset={}",
                total - (offset - 1 + shown),
                offset + shown
            ));
        }

        ToolOutput::ok(&call.id, out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;

    fn tool() -> (ViewTool, Arc<Workspace>) {
        let ws = Arc::new(Workspace::new());
        (ViewTool::new(Arc::clone(&ws)), ws)
    }

    fn tmp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{content}").unwrap();
        f
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "v1".into(), name: "view".into(), args }
    }

    #[tokio::test]
    async fn numbers_lines_one_indexed() {
        let (t, _) = tool();
        let f = tmp("alpha\nbeta\n");
        let out = t
            .execute(&ToolCtx::test("s"), &call(json!({"path": f.path()})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("L1:alpha"));
        assert!(out.content.contains("L2:beta"));
    }

    #[tokio::test]
    async fn records_read_time_for_write_gating() {
        let (t, ws) = tool();
        let f = tmp("x\n");
        assert!(ws.last_read(f.path()).is_none());
        t.execute(&ToolCtx::test("s"), &call(json!({"path": f.path()}))).await;
        assert!(ws.last_read(f.path()).is_some());
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_window() {
        let (t, _) = tool();
        let body: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        let f = tmp(&body);
        let out = t
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"path": f.path(), "offset": 4, "limit": 2})),
            )
            .await;
        assert!(out.content.contains("L4:line4"));
        assert!(out.content.contains("L5:line5"));
        assert!(!out.content.contains("L6:"));
        assert!(out.content.contains("offset=6"), "{}", out.content);
    }

    #[tokio::test]
    async fn oversized_file_is_refused() {
        let (t, ws) = tool();
        let big = "x".repeat((MAX_FILE_BYTES + 1) as usize);
        let f = tmp(&big);
        let out = t
            .execute(&ToolCtx::test("s"), &call(json!({"path": f.path()})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("view limit"));
        // A refused read must not arm the stale-read gate.
        assert!(ws.last_read(f.path()).is_none());
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let (t, _) = tool();
        let out = t
            .execute(&ToolCtx::test("s"), &call(json!({"path": "/no/such/file"})))
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn offset_past_end_reports_line_count() {
        let (t, _) = tool();
        let f = tmp("one\ntwo\n");
        let out = t
            .execute(&ToolCtx::test("s"), &call(json!({"path": f.path(), "offset": 99})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("2 lines"), "{}", out.content);
    }
}
