// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tove_store::Store;

use crate::permission::{PermissionBroker, PermissionRequest};
use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};
use crate::workspace::Workspace;

/// Literal find/replace on one file.
///
/// Preconditions: the path must have been `view`ed more recently than its
/// on-disk mtime (stale-read gate), and unless `all` is set the needle must
/// occur exactly once.  A successful edit snapshots the new content as a
/// FileVersion.
pub struct EditTool {
    workspace: Arc<Workspace>,
    store: Arc<Store>,
    broker: Arc<PermissionBroker>,
}

impl EditTool {
    pub fn new(workspace: Arc<Workspace>, store: Arc<Store>, broker: Arc<PermissionBroker>) -> Self {
        Self { workspace, store, broker }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace a literal string in a file.\n\
         find: the exact text to replace — must match the file byte-for-byte,\n\
         including whitespace. Unless all=true it must occur exactly once;\n\
         include surrounding lines to disambiguate.\n\
         replace: the replacement text.\n\
         The file must have been viewed in this session more recently than its\n\
         last modification, otherwise the edit fails with StaleRead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "find": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "replace": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of requiring a unique match (default false)"
                }
            },
            "required": ["path", "find", "replace"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let path = match require_str(call, "path") {
            Ok(p) => p.to_string(),
            Err(out) => return out,
        };
        let find = match require_str(call, "find") {
            Ok(s) => s.to_string(),
            Err(out) => return out,
        };
        let replace = match call.args.get("replace").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'replace'"),
        };
        let all = call.args.get("all").and_then(|v| v.as_bool()).unwrap_or(false);

        if find.is_empty() {
            return ToolOutput::err(&call.id, "'find' must not be empty");
        }
        if find == replace {
            return ToolOutput::err(&call.id, "'find' and 'replace' are identical");
        }

        debug!(path = %path, all, "edit tool");

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
                    tool: "edit".into(),
                    action: "write".into(),
                    description: format!("edit {path}"),
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

        let occurrences = content.matches(&find).count();
        if occurrences == 0 {
            return ToolOutput::err(
                &call.id,
                "'find' text not found in the file. Re-view the file and copy the \
                 exact text, including indentation.",
            );
        }
        if occurrences > 1 && !all {
            return ToolOutput::err(
                &call.id,
                format!(
                    "'find' text occurs {occurrences} times; include more surrounding \
                     context to make it unique, or pass all=true."
                ),
            );
        }

        let new_content = if all {
            content.replace(&find, &replace)
        } else {
            content.replacen(&find, &replace, 1)
        };

        if let Err(e) = tokio::fs::write(p, &new_content).await {
            return ToolOutput::err(&call.id, format!("write failed: {e}"));
        }
        // Our own mutation must not trip the gate on the next call.
        self.workspace.record_read(p);

        match self
            .store
            .create_file_version(&ctx.session_id, &path, &new_content)
            .await
        {
            Ok(v) => ToolOutput::ok(
                &call.id,
                format!("Edited {path} ({occurrences} replacement{})", if occurrences == 1 { "" } else { "s" }),
            )
            .with_metadata(json!({"version": v.version})),
            Err(e) => ToolOutput::err(&call.id, format!("edit applied but snapshot failed: {e}")),
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

    struct Fixture {
        tool: EditTool,
        ws: Arc<Workspace>,
        store: Arc<Store>,
        session: String,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let session = store.create_session(None, "t").await.unwrap().id;
        let ws = Arc::new(Workspace::new());
        let broker = Arc::new(
            PermissionBroker::new(Arc::new(EventBus::new()), vec![]).with_auto_response(true),
        );
        Fixture {
            tool: EditTool::new(Arc::clone(&ws), Arc::clone(&store), broker),
            ws,
            store,
            session,
        }
    }

    fn tmp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{content}").unwrap();
        f
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "e1".into(), name: "edit".into(), args }
    }

    fn ctx(session: &str) -> ToolCtx {
        ToolCtx::test(session)
    }

    #[tokio::test]
    async fn unviewed_file_fails_with_stale_read() {
        let fx = fixture().await;
        let f = tmp("fn foo() {}\n");
        let out = fx
            .tool
            .execute(
                &ctx(&fx.session),
                &call(json!({"path": f.path(), "find": "foo", "replace": "bar"})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("StaleRead"), "{}", out.content);
    }

    #[tokio::test]
    async fn viewed_file_edits_and_snapshots_a_version() {
        let fx = fixture().await;
        let f = tmp("fn foo() {}\n");
        fx.ws.record_read(f.path());
        let out = fx
            .tool
            .execute(
                &ctx(&fx.session),
                &call(json!({"path": f.path(), "find": "foo", "replace": "bar"})),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "fn bar() {}\n");

        let path = f.path().to_string_lossy().into_owned();
        let latest = fx.store.latest_file_version(&fx.session, &path).await.unwrap().unwrap();
        assert_eq!(latest.version, "initial");
        assert_eq!(latest.content, "fn bar() {}\n");
    }

    #[tokio::test]
    async fn ambiguous_match_is_rejected() {
        let fx = fixture().await;
        let f = tmp("x = 1;\nx = 1;\n");
        fx.ws.record_read(f.path());
        let out = fx
            .tool
            .execute(
                &ctx(&fx.session),
                &call(json!({"path": f.path(), "find": "x = 1;", "replace": "x = 2;"})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("2 times"), "{}", out.content);
        // File untouched.
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "x = 1;\nx = 1;\n");
    }

    #[tokio::test]
    async fn all_flag_replaces_every_occurrence() {
        let fx = fixture().await;
        let f = tmp("a b a b a\n");
        fx.ws.record_read(f.path());
        let out = fx
            .tool
            .execute(
                &ctx(&fx.session),
                &call(json!({"path": f.path(), "find": "a", "replace": "z", "all": true})),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "z b z b z\n");
    }

    #[tokio::test]
    async fn missing_needle_is_error() {
        let fx = fixture().await;
        let f = tmp("hello\n");
        fx.ws.record_read(f.path());
        let out = fx
            .tool
            .execute(
                &ctx(&fx.session),
                &call(json!({"path": f.path(), "find": "absent", "replace": "x"})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("not found"));
    }

    #[tokio::test]
    async fn consecutive_edits_do_not_self_stale() {
        let fx = fixture().await;
        let f = tmp("one two\n");
        fx.ws.record_read(f.path());
        let c = ctx(&fx.session);
        let out1 = fx
            .tool
            .execute(&c, &call(json!({"path": f.path(), "find": "one", "replace": "1"})))
            .await;
        assert!(!out1.is_error, "{}", out1.content);
        // Second edit without an intervening view must still pass the gate.
        let out2 = fx
            .tool
            .execute(&c, &call(json!({"path": f.path(), "find": "two", "replace": "2"})))
            .await;
        assert!(!out2.is_error, "{}", out2.content);
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "1 2\n");

        // Two edits → two versions.
        let path = f.path().to_string_lossy().into_owned();
        let versions = fx.store.list_file_versions(&fx.session, &path).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].version, "v1");
    }

    #[tokio::test]
    async fn permission_denial_blocks_the_edit() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let session = store.create_session(None, "t").await.unwrap().id;
        let ws = Arc::new(Workspace::new());
        let broker = Arc::new(
            PermissionBroker::new(Arc::new(EventBus::new()), vec![]).with_auto_response(false),
        );
        let tool = EditTool::new(Arc::clone(&ws), store, broker);
        let f = tmp("data\n");
        ws.record_read(f.path());
        let out = tool
            .execute(
                &ctx(&session),
                &call(json!({"path": f.path(), "find": "data", "replace": "x"})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("permission denied"));
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "data\n");
    }
}
