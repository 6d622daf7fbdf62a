// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tove_store::Store;

use crate::permission::{PermissionBroker, PermissionRequest};
use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};
use crate::workspace::Workspace;

/// Create or overwrite a file.  Overwrites of existing paths pass through
/// the same stale-read gate as `edit`; every successful write snapshots a
/// FileVersion.
pub struct WriteTool {
    workspace: Arc<Workspace>,
    store: Arc<Store>,
    broker: Arc<PermissionBroker>,
}

impl WriteTool {
    pub fn new(workspace: Arc<Workspace>, store: Arc<Store>, broker: Arc<PermissionBroker>) -> Self {
        Self { workspace, store, broker }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write a file, overwriting any existing content. Parent directories are\n\
         created automatically. ALWAYS prefer edit for changing existing files.\n\
         Overwriting an existing file requires having viewed it in this session\n\
         more recently than its last modification (StaleRead otherwise)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let path = match require_str(call, "path") {
            Ok(p) => p.to_string(),
            Err(out) => return out,
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'content'"),
        };

        debug!(path = %path, bytes = content.len(), "write tool");

        let p = Path::new(&path);
        // The gate only applies to overwrites; creating a new file is free.
        if p.exists() {
            if let Err(stale) = self.workspace.check_fresh(p) {
                return ToolOutput::err(&call.id, stale);
            }
        }

        let granted = self
            .broker
            .request(
                &ctx.cancel,
                PermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool: "write".into(),
                    action: "write".into(),
                    description: format!("write {path}"),
                    params: json!({"path": path, "bytes": content.len()}),
                    path: Some(path.clone()),
                },
            )
            .await;
        if !granted {
            return ToolOutput::err(&call.id, "permission denied");
        }

        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }
        if let Err(e) = tokio::fs::write(p, &content).await {
            return ToolOutput::err(&call.id, format!("write failed: {e}"));
        }
        self.workspace.record_read(p);

        match self.store.create_file_version(&ctx.session_id, &path, &content).await {
            Ok(v) => ToolOutput::ok(&call.id, format!("Wrote {} bytes to {path}", content.len()))
                .with_metadata(json!({"version": v.version})),
            Err(e) => ToolOutput::err(&call.id, format!("write applied but snapshot failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tove_store::EventBus;

    use super::*;

    async fn fixture(grant: bool) -> (WriteTool, Arc<Workspace>, Arc<Store>, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let session = store.create_session(None, "t").await.unwrap().id;
        let ws = Arc::new(Workspace::new());
        let broker = Arc::new(
            PermissionBroker::new(Arc::new(EventBus::new()), vec![]).with_auto_response(grant),
        );
        (
            WriteTool::new(Arc::clone(&ws), Arc::clone(&store), broker),
            ws,
            store,
            session,
        )
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "w1".into(), name: "write".into(), args }
    }

    #[tokio::test]
    async fn creates_new_file_with_parents() {
        let (tool, _, store, session) = fixture(true).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/new.txt");
        let out = tool
            .execute(
                &ToolCtx::test(&session),
                &call(json!({"path": path, "content": "hello"})),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");

        let v = store
            .latest_file_version(&session, &path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v.version, "initial");
        assert_eq!(v.content, "hello");
    }

    #[tokio::test]
    async fn overwriting_unviewed_file_is_stale() {
        let (tool, _, _, session) = fixture(true).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.txt");
        std::fs::write(&path, "original").unwrap();
        let out = tool
            .execute(
                &ToolCtx::test(&session),
                &call(json!({"path": path, "content": "clobber"})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("StaleRead"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[tokio::test]
    async fn overwriting_viewed_file_succeeds() {
        let (tool, ws, _, session) = fixture(true).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.txt");
        std::fs::write(&path, "original").unwrap();
        ws.record_read(&path);
        let out = tool
            .execute(
                &ToolCtx::test(&session),
                &call(json!({"path": path, "content": "updated"})),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "updated");
    }

    #[tokio::test]
    async fn denial_leaves_filesystem_untouched() {
        let (tool, _, _, session) = fixture(false).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.txt");
        let out = tool
            .execute(
                &ToolCtx::test(&session),
                &call(json!({"path": path, "content": "x"})),
            )
            .await;
        assert!(out.is_error);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn repeated_writes_advance_version_labels() {
        let (tool, _, store, session) = fixture(true).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.txt");
        let ctx = ToolCtx::test(&session);
        for content in ["a", "b", "c"] {
            let out = tool
                .execute(&ctx, &call(json!({"path": path, "content": content})))
                .await;
            assert!(!out.is_error, "{}", out.content);
        }
        let versions = store
            .list_file_versions(&session, &path.to_string_lossy())
            .await
            .unwrap();
        let labels: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(labels, vec!["initial", "v1", "v2"]);
    }
}
