// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::events::{TodoItem, TodoPriority, TodoStatus, ToolEvent};
use crate::tool::{Tool, ToolCall, ToolCtx, ToolOutput};

/// Session-shared todo list handle.
pub type TodoList = Arc<Mutex<Vec<TodoItem>>>;

pub struct TodoReadTool {
    todos: TodoList,
}

impl TodoReadTool {
    pub fn new(todos: TodoList) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the current session todo list. Takes no parameters."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let todos = self.todos.lock().await;
        ToolOutput::ok(&call.id, format_todos(&todos))
    }
}

/// Replace the session todo list.  Rejects more than one `in_progress`
/// item, empty content, and empty or duplicate ids.
pub struct TodoWriteTool {
    todos: TodoList,
    event_tx: mpsc::Sender<ToolEvent>,
}

impl TodoWriteTool {
    pub fn new(todos: TodoList, event_tx: mpsc::Sender<ToolEvent>) -> Self {
        Self { todos, event_tx }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current session.\n\n\
         ## Statuses\n\
         - pending: not yet started\n\
         - in_progress: currently being worked on (only ONE at a time)\n\
         - completed: finished\n\n\
         ## Priorities\n\
         high | medium | low (default medium)\n\n\
         ## When to Use\n\
         - Complex multi-step tasks (3+ distinct steps)\n\
         - The user provides multiple tasks to accomplish\n\n\
         ## IMPORTANT\n\
         - Each item needs a unique id, non-empty content, and a status\n\
         - Calling todo_write replaces the entire list (not a merge)\n\
         - Mark items completed IMMEDIATELY after finishing them"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Array of todo items to set (replaces the existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "description": "Unique identifier" },
                            "content": { "type": "string", "description": "Task description" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"]
                            },
                            "priority": {
                                "type": "string",
                                "enum": ["high", "medium", "low"]
                            }
                        },
                        "required": ["id", "content", "status"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let raw = match call.args.get("todos").and_then(|v| v.as_array()) {
            Some(arr) => arr.clone(),
            None => return ToolOutput::err(&call.id, "missing 'todos' array"),
        };

        let mut items: Vec<TodoItem> = Vec::with_capacity(raw.len());
        let mut seen_ids: HashSet<String> = HashSet::new();
        for value in &raw {
            let item: TodoItem = match serde_json::from_value(value.clone()) {
                Ok(i) => i,
                Err(e) => return ToolOutput::err(&call.id, format!("invalid todo item: {e}")),
            };
            if item.id.is_empty() {
                return ToolOutput::err(&call.id, "todo id must not be empty");
            }
            if item.content.trim().is_empty() {
                return ToolOutput::err(
                    &call.id,
                    format!("todo '{}' has empty content", item.id),
                );
            }
            if !seen_ids.insert(item.id.clone()) {
                return ToolOutput::err(&call.id, format!("duplicate todo id '{}'", item.id));
            }
            items.push(item);
        }

        let in_progress = items
            .iter()
            .filter(|t| t.status == TodoStatus::InProgress)
            .count();
        if in_progress > 1 {
            return ToolOutput::err(&call.id, "at most one todo can be 'in_progress' at a time");
        }

        debug!(count = items.len(), "todo_write tool");

        *self.todos.lock().await = items.clone();
        let _ = self.event_tx.send(ToolEvent::TodoUpdate(items.clone())).await;

        ToolOutput::ok(&call.id, format_todos(&items))
    }
}

fn format_todos(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "Todo list is empty.".to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|t| {
            let icon = match t.status {
                TodoStatus::Completed => "✓",
                TodoStatus::InProgress => "→",
                TodoStatus::Pending => "○",
            };
            let prio = match t.priority {
                TodoPriority::High => " [high]",
                TodoPriority::Medium => "",
                TodoPriority::Low => " [low]",
            };
            format!("{icon} [{}]{prio} {}", t.id, t.content)
        })
        .collect();
    format!("Todos:\n{}", lines.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn make_write() -> (TodoWriteTool, TodoList, mpsc::Receiver<ToolEvent>) {
        let todos: TodoList = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(16);
        (TodoWriteTool::new(Arc::clone(&todos), tx), todos, rx)
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "t1".into(), name: "todo_write".into(), args }
    }

    #[tokio::test]
    async fn sets_list_and_emits_event() {
        let (tool, todos, mut rx) = make_write();
        let out = tool
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"todos": [
                    {"id": "1", "content": "analyze", "status": "in_progress", "priority": "high"},
                    {"id": "2", "content": "implement", "status": "pending"}
                ]})),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(todos.lock().await.len(), 2);
        assert!(matches!(rx.try_recv(), Ok(ToolEvent::TodoUpdate(v)) if v.len() == 2));
    }

    #[tokio::test]
    async fn rejects_two_in_progress() {
        let (tool, todos, _rx) = make_write();
        let out = tool
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"todos": [
                    {"id": "1", "content": "a", "status": "in_progress"},
                    {"id": "2", "content": "b", "status": "in_progress"}
                ]})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("at most one"));
        assert!(todos.lock().await.is_empty(), "rejected write must not apply");
    }

    #[tokio::test]
    async fn rejects_empty_content() {
        let (tool, _, _rx) = make_write();
        let out = tool
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"todos": [{"id": "1", "content": "  ", "status": "pending"}]})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("empty content"));
    }

    #[tokio::test]
    async fn rejects_empty_and_duplicate_ids() {
        let (tool, _, _rx) = make_write();
        let out = tool
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"todos": [{"id": "", "content": "x", "status": "pending"}]})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("id must not be empty"));

        let out = tool
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"todos": [
                    {"id": "1", "content": "a", "status": "pending"},
                    {"id": "1", "content": "b", "status": "pending"}
                ]})),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("duplicate"));
    }

    #[tokio::test]
    async fn invalid_status_is_rejected() {
        let (tool, _, _rx) = make_write();
        let out = tool
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"todos": [{"id": "1", "content": "a", "status": "cancelled"}]})),
            )
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn read_reflects_last_write() {
        let (write, todos, _rx) = make_write();
        write
            .execute(
                &ToolCtx::test("s"),
                &call(json!({"todos": [{"id": "1", "content": "ship it", "status": "pending"}]})),
            )
            .await;
        let read = TodoReadTool::new(todos);
        let out = read
            .execute(
                &ToolCtx::test("s"),
                &ToolCall { id: "r".into(), name: "todo_read".into(), args: json!({}) },
            )
            .await;
        assert!(out.content.contains("ship it"));
    }

    #[tokio::test]
    async fn empty_list_reads_cleanly() {
        let read = TodoReadTool::new(Arc::new(Mutex::new(Vec::new())));
        let out = read
            .execute(
                &ToolCtx::test("s"),
                &ToolCall { id: "r".into(), name: "todo_read".into(), args: json!({}) },
            )
            .await;
        assert_eq!(out.content, "Todo list is empty.");
    }
}
