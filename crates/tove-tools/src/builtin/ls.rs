// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};

const DEFAULT_DEPTH: usize = 2;
const MAX_DEPTH: usize = 5;
const DEFAULT_LIMIT: usize = 100;
const EXCLUDED_DIRS: &[&str] = &[".git", "target", "node_modules"];

pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List directory contents. depth: default 2, max 5. limit: 100 entries.\n\
         filter: optional glob applied to entry names (e.g. '*.rs').\n\
         Directories print with a trailing '/'. .git/, target/ and\n\
         node_modules/ are excluded. For recursive pattern search use glob."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the directory"
                },
                "depth": {
                    "type": "integer",
                    "description": "Maximum recursion depth (default 2, max 5)"
                },
                "filter": {
                    "type": "string",
                    "description": "Glob applied to entry names, e.g. '*.rs'"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of entries (default 100)"
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
        let depth = call
            .args
            .get("depth")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_DEPTH as u64)
            .min(MAX_DEPTH as u64) as usize;
        let filter = call.args.get("filter").and_then(|v| v.as_str()).map(str::to_string);
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT as u64) as usize;

        debug!(path = %path, depth, "ls tool");

        if !std::path::Path::new(&path).is_dir() {
            return ToolOutput::err(&call.id, format!("{path} is not a directory"));
        }

        let result =
            tokio::task::spawn_blocking(move || list_dir(&path, depth, filter.as_deref(), limit))
                .await;
        match result {
            Ok(Ok(entries)) if entries.is_empty() => ToolOutput::ok(&call.id, "(empty)"),
            Ok(Ok(entries)) => ToolOutput::ok(&call.id, entries.join("\n")),
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("ls error: {e}")),
            Err(e) => ToolOutput::err(&call.id, format!("ls task failed: {e}")),
        }
    }
}

fn list_dir(
    root: &str,
    depth: usize,
    filter: Option<&str>,
    limit: usize,
) -> anyhow::Result<Vec<String>> {
    let matcher = match filter {
        Some(g) => Some(globset::Glob::new(g)?.compile_matcher()),
        None => None,
    };
    let mut entries = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !EXCLUDED_DIRS.contains(&name.as_ref())
        });
    for entry in walker.flatten() {
        if entries.len() >= limit {
            entries.push(format!("... (limit of {limit} entries reached)"));
            break;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let name = entry.file_name().to_string_lossy();
        if let Some(m) = &matcher {
            if !entry.file_type().is_dir() && !m.is_match(name.as_ref()) {
                continue;
            }
        }
        if entry.file_type().is_dir() {
            entries.push(format!("{}/", rel.display()));
        } else {
            entries.push(rel.display().to_string());
        }
    }
    Ok(entries)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
