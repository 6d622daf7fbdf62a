// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};

const DEFAULT_LIMIT: usize = 100;

/// Directory names never worth searching.
const EXCLUDED_DIRS: &[&str] = &[".git", "target", "node_modules"];

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Regex search under a root directory. pattern: full regex.\n\
         include: glob filter on file names (e.g. '*.rs'). limit: 100 by default.\n\
         Matches print as file:line:text, grouped by file with the most recently\n\
         modified files first. Uses ripgrep when installed, with a portable\n\
         fallback otherwise. For file name search use glob; to read results use view."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search (default: current directory)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob pattern filtering file names, e.g. '*.rs'"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matching lines (default 100)"
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
        let include = call.args.get("include").and_then(|v| v.as_str()).map(str::to_string);
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT as u64) as usize;

        debug!(pattern = %pattern, root = %root, "grep tool");

        let matches = if rg_available().await {
            run_rg(&pattern, &root, include.as_deref(), limit).await
        } else {
            let p = pattern.clone();
            let r = root.clone();
            let inc = include.clone();
            tokio::task::spawn_blocking(move || run_fallback(&p, &r, inc.as_deref(), limit))
                .await
                .unwrap_or_else(|e| Err(anyhow::anyhow!("grep task failed: {e}")))
        };

        match matches {
            Ok(hits) if hits.is_empty() => ToolOutput::ok(&call.id, "(no matches)"),
            Ok(hits) => ToolOutput::ok(&call.id, format_matches(hits, limit)),
            Err(e) => ToolOutput::err(&call.id, format!("grep error: {e}")),
        }
    }
}

struct FileMatches {
    path: PathBuf,
    mtime: SystemTime,
    /// (line number, line text)
    lines: Vec<(usize, String)>,
}

async fn rg_available() -> bool {
    tokio::process::Command::new("rg")
        .arg("--version")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn run_rg(
    pattern: &str,
    root: &str,
    include: Option<&str>,
    limit: usize,
) -> anyhow::Result<Vec<FileMatches>> {
    let mut cmd = tokio::process::Command::new("rg");
    cmd.arg("--color").arg("never").arg("--line-number").arg("--no-heading");
    cmd.arg("--max-count").arg(limit.to_string());
    if let Some(glob) = include {
        cmd.arg("--glob").arg(glob);
    }
    cmd.arg(pattern).arg(root);
    cmd.stdin(std::process::Stdio::null());

    let output = cmd.output().await?;
    // rg exits 1 on "no matches", which is not an error here.
    if !output.status.success() && output.status.code() != Some(1) {
        anyhow::bail!("rg failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    let mut by_file: Vec<FileMatches> = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        // path:line:text — split on the first two colons.
        let Some((path, rest)) = line.split_once(':') else { continue };
        let Some((lineno, text)) = rest.split_once(':') else { continue };
        let Ok(lineno) = lineno.parse::<usize>() else { continue };
        let path_buf = PathBuf::from(path);
        match by_file.iter_mut().find(|f| f.path == path_buf) {
            Some(f) => f.lines.push((lineno, text.to_string())),
            None => {
                let mtime = std::fs::metadata(&path_buf)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                by_file.push(FileMatches {
                    path: path_buf,
                    mtime,
                    lines: vec![(lineno, text.to_string())],
                });
            }
        }
    }
    Ok(by_file)
}

/// Portable fallback: walk the tree and scan line by line.
fn run_fallback(
    pattern: &str,
    root: &str,
    include: Option<&str>,
    limit: usize,
) -> anyhow::Result<Vec<FileMatches>> {
    let re = regex::Regex::new(pattern)?;
    let include_glob = match include {
        Some(g) => Some(globset::Glob::new(g)?.compile_matcher()),
        None => None,
    };

    let mut by_file: Vec<FileMatches> = Vec::new();
    let mut total = 0usize;

    let walker = walkdir::WalkDir::new(root).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !EXCLUDED_DIRS.contains(&name.as_ref())
    });

    for entry in walker.flatten() {
        if total >= limit {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(matcher) = &include_glob {
            if !matcher.is_match(entry.file_name().to_string_lossy().as_ref()) {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue; // binary or unreadable
        };
        let mut lines = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if re.is_match(line) {
                lines.push((i + 1, line.to_string()));
                total += 1;
                if total >= limit {
                    break;
                }
            }
        }
        if !lines.is_empty() {
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            by_file.push(FileMatches { path: entry.into_path(), mtime, lines });
        }
    }
    Ok(by_file)
}

/// Group output per file, most recently modified files first.
fn format_matches(mut files: Vec<FileMatches>, limit: usize) -> String {
    files.sort_by(|a, b| b.mtime.cmp(&a.mtime));
    let mut out = String::new();
    let mut emitted = 0usize;
    for f in &files {
        for (lineno, text) in &f.lines {
            if emitted >= limit {
                out.push_str(&format!("... (limit of {limit} matches reached)\n"));
                return out;
            }
            out.push_str(&format!("{}:{}:{}\n", f.path.display(), lineno, text));
            emitted += 1;
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "g1".into(), name: "grep".into(), args }
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn alpha() {}\nlet needle = 1;\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "needle here too\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.rs"), "no match\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tree();
        let t = GrepTool;
        let out = t
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"pattern": "needle", "path": dir.path()})),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("a.rs:2:"), "{}", out.content);
        assert!(out.content.contains("b.txt:1:"), "{}", out.content);
    }

    #[tokio::test]
    async fn include_glob_filters_files() {
        let dir = tree();
        let t = GrepTool;
        let out = t
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"pattern": "needle", "path": dir.path(), "include": "*.rs"})),
            )
            .await;
        assert!(out.content.contains("a.rs"), "{}", out.content);
        assert!(!out.content.contains("b.txt"), "{}", out.content);
    }

    #[tokio::test]
    async fn no_matches_is_not_an_error() {
        let dir = tree();
        let t = GrepTool;
        let out = t
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"pattern": "zzz_absent", "path": dir.path()})),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "(no matches)");
    }

    #[tokio::test]
    async fn invalid_regex_is_error() {
        let out = GrepTool
            .execute(&ToolCtx::test("s"), &call(json!({"pattern": "([unclosed", "path": "."})))
            .await;
        assert!(out.is_error);
    }

    #[test]
    fn newer_files_sort_first() {
        let old = FileMatches {
            path: "old.rs".into(),
            mtime: SystemTime::UNIX_EPOCH,
            lines: vec![(1, "x".into())],
        };
        let new = FileMatches {
            path: "new.rs".into(),
            mtime: SystemTime::now(),
            lines: vec![(1, "x".into())],
        };
        let out = format_matches(vec![old, new], 10);
        let new_pos = out.find("new.rs").unwrap();
        let old_pos = out.find("old.rs").unwrap();
        assert!(new_pos < old_pos, "{out}");
    }

    #[test]
    fn limit_truncates_with_marker() {
        let f = FileMatches {
            path: "f.rs".into(),
            mtime: SystemTime::now(),
            lines: (1..=10).map(|i| (i, format!("line{i}"))).collect(),
        };
        let out = format_matches(vec![f], 3);
        assert_eq!(out.matches("f.rs:").count(), 3);
        assert!(out.contains("limit of 3"));
    }

    #[test]
    fn fallback_respects_excluded_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "needle\n").unwrap();
        std::fs::write(dir.path().join("real.txt"), "needle\n").unwrap();
        let hits =
            run_fallback("needle", dir.path().to_str().unwrap(), None, 100).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].path.ends_with("real.txt"));
    }
}
