// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    Low,
    Medium,
    High,
}

impl Default for TodoPriority {
    fn default() -> Self {
        TodoPriority::Medium
    }
}

/// A structured todo item managed by the todo_write tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: TodoPriority,
}

impl TodoItem {
    pub fn is_open(&self) -> bool {
        matches!(self.status, TodoStatus::Pending | TodoStatus::InProgress)
    }
}

/// Events emitted by stateful tools back to the agent loop.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    TodoUpdate(Vec<TodoItem>),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_means_pending_or_in_progress() {
        let mk = |status| TodoItem {
            id: "1".into(),
            content: "x".into(),
            status,
            priority: TodoPriority::Medium,
        };
        assert!(mk(TodoStatus::Pending).is_open());
        assert!(mk(TodoStatus::InProgress).is_open());
        assert!(!mk(TodoStatus::Completed).is_open());
    }

    #[test]
    fn priority_orders_low_to_high() {
        assert!(TodoPriority::High > TodoPriority::Medium);
        assert!(TodoPriority::Medium > TodoPriority::Low);
    }

    #[test]
    fn serde_uses_snake_case() {
        let item = TodoItem {
            id: "1".into(),
            content: "t".into(),
            status: TodoStatus::InProgress,
            priority: TodoPriority::High,
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"in_progress\""), "{json}");
        assert!(json.contains("\"high\""), "{json}");
    }

    #[test]
    fn missing_priority_defaults_to_medium() {
        let item: TodoItem =
            serde_json::from_str(r#"{"id":"1","content":"x","status":"pending"}"#).unwrap();
        assert_eq!(item.priority, TodoPriority::Medium);
    }
}
