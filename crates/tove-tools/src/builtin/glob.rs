// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};

const DEFAULT_LIMIT: usize = 200;
const EXCLUDED_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// File name search by glob pattern, `**` supported, newest first.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern under a root directory.\n\
         Supports '**' for recursive matching: '**/*.rs', 'src/**/*.toml', '*.md'.\n\
         Results are paths relative to the root, sorted by modification time\n\
         (newest first). .git/, target/ and node_modules/ are skipped.\n\
         For content search use grep."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. '**/*.rs' or 'docs/*.md'"
                },
                "path": {
                    "type": "string",
                    "description": "Root directory to search from (default: current directory)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (default 200)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let pattern = match require_str(call, "pattern") {
            Ok(p) => p.to_string(),
            Err(out) => return out,
        };
        let root = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".").to_string();
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT as u64) as usize;

        debug!(pattern = %pattern, root = %root, "glob tool");

        let result =
            tokio::task::spawn_blocking(move || run_glob(&pattern, &root, limit)).await;
        match result {
            Ok(Ok(paths)) if paths.is_empty() => ToolOutput::ok(&call.id, "(no matches)"),
            Ok(Ok(paths)) => ToolOutput::ok(&call.id, paths.join("\n")),
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("glob error: {e}")),
            Err(e) => ToolOutput::err(&call.id, format!("glob task failed: {e}")),
        }
    }
}

fn run_glob(pattern: &str, root: &str, limit: usize) -> anyhow::Result<Vec<String>> {
    let matcher = globset::GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();

    let mut hits: Vec<(SystemTime, String)> = Vec::new();
    let walker = walkdir::WalkDir::new(root).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !EXCLUDED_DIRS.contains(&name.as_ref())
    });
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if matcher.is_match(rel) {
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            hits.push((mtime, rel.to_string_lossy().into_owned()));
        }
    }
    hits.sort_by(|a, b| b.0.cmp(&a.0));
    hits.truncate(limit);
    Ok(hits.into_iter().map(|(_, p)| p).collect())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
