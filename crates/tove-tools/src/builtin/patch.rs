// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::{ChangeTag, TextDiff};
use tracing::debug;

use tove_store::Store;

use crate::permission::{PermissionBroker, PermissionRequest};
use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};
use crate::workspace::Workspace;

// ── Hunk data structures ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum HunkLine {
    /// Unchanged line — must exist in the file, kept verbatim.
    Context(String),
    /// Line to remove from the file.
    Del(String),
    /// Line to insert into the file.
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    /// 1-based old-file start from `@@ -N,...` — an ambiguity-breaking hint,
    /// never the primary locator.
    old_start_hint: Option<usize>,
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must already be present in the file (Context + Del), in order.
    fn search_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Del(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Strip a leading ``` fence (with or without a `diff` label) if present.
fn strip_markdown_fence(diff: &str) -> &str {
    let t = diff.trim_start();
    if t.starts_with("```") {
        if let Some(nl) = t.find('\n') {
            let body = &t[nl + 1..];
            if let Some(close) = body.rfind("\n```") {
                return &body[..close + 1];
            }
            return body;
        }
    }
    diff
}

/// Parse unified-diff hunks.  Accepts standard `@@ -N,M +N,M @@` headers
/// (line numbers are optional hints), bare `@@ @@`, `---`/`+++` file
/// headers, and markdown-fenced diffs.
fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, String> {
    let diff = strip_markdown_fence(diff);
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("\\ ") {
            continue;
        }
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                if !h.lines.is_empty() {
                    hunks.push(h);
                }
            }
            current = Some(Hunk { old_start_hint: parse_old_start(line), lines: Vec::new() });
            continue;
        }
        if let Some(ref mut h) = current {
            if let Some(rest) = line.strip_prefix(' ') {
                h.lines.push(HunkLine::Context(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('-') {
                h.lines.push(HunkLine::Del(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('+') {
                h.lines.push(HunkLine::Add(rest.to_string()));
            } else if line.is_empty() {
                // Blank diff line with no prefix = empty context line.
                h.lines.push(HunkLine::Context(String::new()));
            }
        }
    }
    if let Some(h) = current {
        if !h.lines.is_empty() {
            hunks.push(h);
        }
    }
    if hunks.is_empty() {
        return Err("No hunks found in diff. Use @@ headers.".to_string());
    }
    Ok(hunks)
}

/// Extract the 1-based old-file start line from `@@ -N[,M] +N[,M] @@`.
fn parse_old_start(header: &str) -> Option<usize> {
    let inner = header
        .trim_start_matches('@')
        .trim()
        .split("@@")
        .next()
        .unwrap_or("")
        .trim();
    for part in inner.split_whitespace() {
        if let Some(rest) = part.strip_prefix('-') {
            if let Ok(n) = rest.split(',').next().unwrap_or(rest).parse::<usize>() {
                return Some(n);
            }
        }
    }
    None
}

// ── Matching ──────────────────────────────────────────────────────────────────

/// Find where a hunk's search lines appear in the file.  Strategies, in
/// order: exact match, then indent-normalised (common leading whitespace
/// stripped on both sides).  Ambiguity is broken by the header hint.
fn find_hunk_position(
    file_lines: &[String],
    search_lines: &[&str],
    hint: Option<usize>,
) -> Result<(usize, i64), String> {
    // Pure insertion — nothing to locate; anchor at the hint or EOF.
    if search_lines.is_empty() {
        let pos = hint
            .map(|h| h.saturating_sub(1).min(file_lines.len()))
            .unwrap_or(file_lines.len());
        return Ok((pos, 0));
    }

    let n = search_lines.len();
    let file_refs: Vec<&str> = file_lines.iter().map(String::as_str).collect();
    if file_refs.len() < n {
        return Err(format!(
            "File has {} lines but the hunk needs {} context/deletion lines.",
            file_refs.len(),
            n
        ));
    }

    let exact: Vec<usize> = (0..=(file_refs.len() - n))
        .filter(|&i| file_refs[i..i + n] == *search_lines)
        .collect();
    if !exact.is_empty() {
        return Ok((pick_best(&exact, hint), 0));
    }

    // Indent-normalised: the model often strips or changes leading
    // whitespace; compare with common indentation removed and remember the
    // delta so Add lines can be re-indented.
    let hunk_indent = common_indent(search_lines) as i64;
    let norm_search = strip_indent(search_lines, hunk_indent as usize);
    let hits: Vec<(usize, i64)> = (0..=(file_refs.len() - n))
        .filter_map(|i| {
            let win = &file_refs[i..i + n];
            let file_ind = common_indent(win) as i64;
            let norm_win = strip_indent(win, file_ind as usize);
            (norm_win == norm_search).then_some((i, file_ind - hunk_indent))
        })
        .collect();
    if !hits.is_empty() {
        let positions: Vec<usize> = hits.iter().map(|(p, _)| *p).collect();
        let best = pick_best(&positions, hint);
        let delta = hits.iter().find(|(p, _)| *p == best).map(|(_, d)| *d).unwrap_or(0);
        return Ok((best, delta));
    }

    let mut msg = String::from("Context not found. Expected:\n");
    for l in search_lines {
        msg.push_str(&format!("  |{l}|\n"));
    }
    if let Some((ratio, line_no, block)) = nearest_block(&file_refs, search_lines) {
        msg.push_str(&format!("Nearest match at line {line_no} ({:.0}%):\n", ratio * 100.0));
        for l in &block {
            msg.push_str(&format!("  |{l}|\n"));
        }
    }
    msg.push_str("Re-view the file, fix the context lines, and retry.");
    Err(msg)
}

/// When several windows match at equal quality, pick the one closest to the
/// 1-based header hint; fall back to the first.
fn pick_best(matches: &[usize], hint: Option<usize>) -> usize {
    if matches.len() == 1 {
        return matches[0];
    }
    if let Some(h) = hint {
        let target = h.saturating_sub(1);
        return *matches
            .iter()
            .min_by_key(|&&p| (p as isize - target as isize).unsigned_abs())
            .unwrap_or(&matches[0]);
    }
    matches[0]
}

fn common_indent(lines: &[&str]) -> usize {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0)
}

fn strip_indent(lines: &[&str], indent: usize) -> Vec<String> {
    lines
        .iter()
        .map(|l| {
            if l.len() >= indent {
                l[indent..].to_string()
            } else {
                l.trim_start().to_string()
            }
        })
        .collect()
}

/// Most similar window in the file (similarity > 30 %), for error messages.
fn nearest_block(file_lines: &[&str], search_lines: &[&str]) -> Option<(f64, usize, Vec<String>)> {
    let n = search_lines.len().max(1);
    if file_lines.len() < n {
        return None;
    }
    let needle = search_lines.join("\n");
    file_lines
        .windows(n)
        .enumerate()
        .map(|(i, win)| {
            (similarity_ratio(&needle, &win.join("\n")), i + 1, win.iter().map(|s| s.to_string()).collect())
        })
        .filter(|(r, _, _)| *r > 0.3)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
}

/// Similarity ratio in [0,1] via character-level diff (2×matches / total).
fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let diff = TextDiff::from_chars(a, b);
    let matching: usize = diff
        .iter_all_changes()
        .filter(|c| c.tag() == ChangeTag::Equal)
        .map(|c| c.value().len())
        .sum();
    (matching * 2) as f64 / total as f64
}

// ── Application ───────────────────────────────────────────────────────────────

fn adjust_indent(line: &str, delta: i64) -> String {
    if delta == 0 || line.trim().is_empty() {
        return line.to_string();
    }
    if delta > 0 {
        format!("{}{line}", " ".repeat(delta as usize))
    } else {
        let remove = (-delta) as usize;
        if line.len() >= remove && line[..remove].bytes().all(|b| b == b' ') {
            line[remove..].to_string()
        } else {
            line.trim_start_matches(' ').to_string()
        }
    }
}

fn apply_hunk(file_lines: &[String], hunk: &Hunk, pos: usize, indent_delta: i64) -> Vec<String> {
    let mut result = file_lines[..pos].to_vec();
    let mut file_idx = pos;
    for hl in &hunk.lines {
        match hl {
            HunkLine::Context(_) => {
                result.push(file_lines[file_idx].clone());
                file_idx += 1;
            }
            HunkLine::Del(_) => {
                file_idx += 1;
            }
            HunkLine::Add(s) => {
                result.push(adjust_indent(s, indent_delta));
            }
        }
    }
    result.extend_from_slice(&file_lines[file_idx..]);
    result
}

// ── Tool ──────────────────────────────────────────────────────────────────────

/// Apply unified-diff hunks to one file.  All hunks must locate cleanly or
/// the tool fails atomically with the file untouched.
pub struct PatchTool {
    workspace: Arc<Workspace>,
    store: Arc<Store>,
    broker: Arc<PermissionBroker>,
}

impl PatchTool {
    pub fn new(workspace: Arc<Workspace>, store: Arc<Store>, broker: Arc<PermissionBroker>) -> Self {
        Self { workspace, store, broker }
    }
}

#[async_trait]
impl Tool for PatchTool {
    fn name(&self) -> &str {
        "patch"
    }

    fn description(&self) -> &str {
        "Apply unified diff hunks to a file.\n\
         Each hunk starts with @@ (line numbers are optional hints):\n\
           @@ -OLD,COUNT +NEW,COUNT @@\n\
            context line          (space prefix — unchanged)\n\
           -removed line\n\
           +added line\n\
         Include 2–3 context lines around every change; context must match the\n\
         file exactly (indentation differences are corrected automatically).\n\
         All hunks apply atomically — if any hunk fails to locate, the file is\n\
         left untouched. The file must have been viewed in this session more\n\
         recently than its last modification (StaleRead otherwise)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to patch"
                },
                "diff": {
                    "type": "string",
                    "description": "Unified diff hunks to apply. Each hunk starts with @@."
                }
            },
            "required": ["path", "diff"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let path = match require_str(call, "path") {
            Ok(p) => p.to_string(),
            Err(out) => return out,
        };
        let diff_str = match require_str(call, "diff") {
            Ok(d) => d.to_string(),
            Err(out) => return out,
        };

        debug!(path = %path, "patch tool");

        let hunks = match parse_hunks(&diff_str) {
            Ok(h) => h,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let p = Path::new(&path);
        if let Err(stale) = self.workspace.check_fresh(p) {
            return ToolOutput::err(&call.id, stale);
        }

        let granted = self
            .broker
            .request(
                &ctx.cancel,
                PermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool: "patch".into(),
                    action: "write".into(),
                    description: format!("patch {path}"),
                    params: call.args.clone(),
                    path: Some(path.clone()),
                },
            )
            .await;
        if !granted {
            return ToolOutput::err(&call.id, "permission denied");
        }

        let content = match tokio::fs::read_to_string(p).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };
        let had_trailing_newline = content.ends_with('\n');
        let mut file_lines: Vec<String> = content.lines().map(str::to_string).collect();

        // Locate and apply in memory; the file is only written after every
        // hunk succeeded.
        for (idx, hunk) in hunks.iter().enumerate() {
            let search = hunk.search_lines();
            match find_hunk_position(&file_lines, &search, hunk.old_start_hint) {
                Ok((pos, delta)) => {
                    file_lines = apply_hunk(&file_lines, hunk, pos, delta);
                }
                Err(e) => {
                    let prefix = if hunks.len() > 1 {
                        format!("Hunk {}: ", idx + 1)
                    } else {
                        String::new()
                    };
                    return ToolOutput::err(&call.id, format!("{prefix}{e}"));
                }
            }
        }

        let mut new_content = file_lines.join("\n");
        if had_trailing_newline {
            new_content.push('\n');
        }
        if let Err(e) = tokio::fs::write(p, &new_content).await {
            return ToolOutput::err(&call.id, format!("write failed: {e}"));
        }
        self.workspace.record_read(p);

        match self
            .store
            .create_file_version(&ctx.session_id, &path, &new_content)
            .await
        {
            Ok(v) => ToolOutput::ok(
                &call.id,
                format!("Applied {} hunk{} to {path}", hunks.len(), if hunks.len() == 1 { "" } else { "s" }),
            )
            .with_metadata(json!({"version": v.version})),
            Err(e) => ToolOutput::err(&call.id, format!("patch applied but snapshot failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;
    use tove_store::EventBus;

    use super::*;

    async fn fixture() -> (PatchTool, Arc<Workspace>, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let session = store.create_session(None, "t").await.unwrap().id;
        let ws = Arc::new(Workspace::new());
        let broker = Arc::new(
            PermissionBroker::new(Arc::new(EventBus::new()), vec![]).with_auto_response(true),
        );
        (PatchTool::new(Arc::clone(&ws), store, broker), ws, session)
    }

    fn tmp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{content}").unwrap();
        f
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "p1".into(), name: "patch".into(), args }
    }

    #[tokio::test]
    async fn basic_replacement() {
        let (t, ws, session) = fixture().await;
        let f = tmp("fn foo() {\n    old();\n}\n");
        ws.record_read(f.path());
        let out = t
            .execute(
                &ToolCtx::test(&session),
                &call(json!({
                    "path": f.path(),
                    "diff": "@@ -1,3 +1,3 @@\n fn foo() {\n-    old();\n+    new();\n }\n"
                })),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        let result = std::fs::read_to_string(f.path()).unwrap();
        assert!(result.contains("new()"));
        assert!(!result.contains("old()"));
    }

    #[tokio::test]
    async fn all_hunks_apply_or_none_do() {
        let (t, ws, session) = fixture().await;
        let f = tmp("line1\nline2\nline3\n");
        ws.record_read(f.path());
        let diff = concat!(
            "@@ @@\n-line1\n+LINE1\n line2\n", // hunk 1: valid
            "@@ @@\n-does_not_exist\n+X\n",    // hunk 2: bad context
        );
        let out = t
            .execute(&ToolCtx::test(&session), &call(json!({"path": f.path(), "diff": diff})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("Hunk 2"), "{}", out.content);
        // Atomic: nothing changed.
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "line1\nline2\nline3\n");
    }

    #[tokio::test]
    async fn multi_hunk_applies_both_changes() {
        let (t, ws, session) = fixture().await;
        let f = tmp("fn alpha() {\n    a();\n}\n\nfn beta() {\n    b();\n}\n");
        ws.record_read(f.path());
        let diff = concat!(
            "@@ @@\n fn alpha() {\n-    a();\n+    alpha_new();\n }\n",
            "@@ @@\n fn beta() {\n-    b();\n+    beta_new();\n }\n",
        );
        let out = t
            .execute(&ToolCtx::test(&session), &call(json!({"path": f.path(), "diff": diff})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let result = std::fs::read_to_string(f.path()).unwrap();
        assert!(result.contains("alpha_new()"));
        assert!(result.contains("beta_new()"));
    }

    #[tokio::test]
    async fn stale_file_is_rejected() {
        let (t, _, session) = fixture().await;
        let f = tmp("hello\n");
        // No record_read: the gate must trip.
        let out = t
            .execute(
                &ToolCtx::test(&session),
                &call(json!({"path": f.path(), "diff": "@@ @@\n-hello\n+world\n"})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("StaleRead"));
    }

    #[tokio::test]
    async fn indent_normalised_match_reindents_added_lines() {
        let (t, ws, session) = fixture().await;
        let f = tmp("    fn foo() {\n        bar();\n    }\n");
        ws.record_read(f.path());
        let diff = "@@ @@\n fn foo() {\n-    bar();\n+    baz();\n }\n";
        let out = t
            .execute(&ToolCtx::test(&session), &call(json!({"path": f.path(), "diff": diff})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let result = std::fs::read_to_string(f.path()).unwrap();
        assert!(result.contains("        baz();"), "{result}");
    }

    #[tokio::test]
    async fn hint_disambiguates_duplicate_blocks() {
        let (t, ws, session) = fixture().await;
        let f = tmp("fn block() {\n    value = 1;\n}\n\nfn block() {\n    value = 1;\n}\n");
        ws.record_read(f.path());
        let diff = "@@ -5,3 +5,3 @@\n fn block() {\n-    value = 1;\n+    value = 2;\n }\n";
        let out = t
            .execute(&ToolCtx::test(&session), &call(json!({"path": f.path(), "diff": diff})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let result = std::fs::read_to_string(f.path()).unwrap();
        let first = result.find("value = 1;").unwrap();
        let second = result.find("value = 2;").unwrap();
        assert!(first < second, "{result}");
    }

    #[tokio::test]
    async fn trailing_newline_is_preserved_both_ways() {
        let (t, ws, session) = fixture().await;
        let with = tmp("a\nb\n");
        ws.record_read(with.path());
        t.execute(
            &ToolCtx::test(&session),
            &call(json!({"path": with.path(), "diff": "@@ @@\n a\n-b\n+B\n"})),
        )
        .await;
        assert_eq!(std::fs::read_to_string(with.path()).unwrap(), "a\nB\n");

        let without = tmp("a\nb");
        ws.record_read(without.path());
        t.execute(
            &ToolCtx::test(&session),
            &call(json!({"path": without.path(), "diff": "@@ @@\n a\n-b\n+B\n"})),
        )
        .await;
        assert_eq!(std::fs::read_to_string(without.path()).unwrap(), "a\nB");
    }

    #[tokio::test]
    async fn failed_context_shows_nearest_block() {
        let (t, ws, session) = fixture().await;
        let f = tmp("fn calculate_total(items: &[Item]) -> f64 {\n    items.iter().sum()\n}\n");
        ws.record_read(f.path());
        let diff = "@@ @@\n fn calculate_total(items: &[Item]) -> f64 {\n-    items.len() as f64\n+    0.0\n }\n";
        let out = t
            .execute(&ToolCtx::test(&session), &call(json!({"path": f.path(), "diff": diff})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("calculate_total"), "{}", out.content);
    }

    #[tokio::test]
    async fn fenced_diff_is_accepted() {
        let (t, ws, session) = fixture().await;
        let f = tmp("old\n");
        ws.record_read(f.path());
        let out = t
            .execute(
                &ToolCtx::test(&session),
                &call(json!({"path": f.path(), "diff": "```diff\n@@ @@\n-old\n+new\n```\n"})),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "new\n");
    }

    // ── Parser units ──────────────────────────────────────────────────────────

    #[test]
    fn parse_old_start_variants() {
        assert_eq!(parse_old_start("@@ -5,7 +5,6 @@"), Some(5));
        assert_eq!(parse_old_start("@@ -9,3 +8,6 @@ fn main()"), Some(9));
        assert_eq!(parse_old_start("@@ @@"), None);
    }

    #[test]
    fn parse_hunks_classifies_lines() {
        let hunks = parse_hunks("@@ @@\n ctx\n-del\n+add\n").unwrap();
        assert_eq!(hunks.len(), 1);
        assert!(matches!(&hunks[0].lines[0], HunkLine::Context(s) if s == "ctx"));
        assert!(matches!(&hunks[0].lines[1], HunkLine::Del(s) if s == "del"));
        assert!(matches!(&hunks[0].lines[2], HunkLine::Add(s) if s == "add"));
    }

    #[test]
    fn parse_hunks_rejects_diff_without_headers() {
        assert!(parse_hunks("just text\n").is_err());
    }

    #[test]
    fn adjust_indent_add_remove_and_clamp() {
        assert_eq!(adjust_indent("    foo", 4), "        foo");
        assert_eq!(adjust_indent("        foo", -4), "    foo");
        assert_eq!(adjust_indent("    foo", -8), "foo");
        assert_eq!(adjust_indent("", 4), "");
    }

    #[test]
    fn similarity_identical_and_unrelated() {
        assert_eq!(similarity_ratio("same", "same"), 1.0);
        assert!(similarity_ratio("aaaa", "bbbb") < 0.1);
    }
}
