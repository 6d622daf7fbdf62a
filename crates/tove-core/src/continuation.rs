// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Todo-driven auto-continuation.
//!
//! When a turn ends with `end_turn` while open todos remain, the loop can
//! synthesize a user message that sends the model back to work.  The
//! number of synthesized messages per user-initiated message is bounded by
//! configuration; the counter lives in the session runtime and resets on
//! every external user message.

use tove_tools::{TodoItem, TodoStatus};

/// Maximum length of a todo title quoted into the synthesized message.
const TITLE_MAX_CHARS: usize = 200;

/// The todo the continuation should point at: the `in_progress` item if
/// any, otherwise the highest-priority `pending` one.
pub fn next_open_todo(todos: &[TodoItem]) -> Option<&TodoItem> {
    todos
        .iter()
        .find(|t| t.status == TodoStatus::InProgress)
        .or_else(|| {
            todos
                .iter()
                .filter(|t| t.status == TodoStatus::Pending)
                .max_by_key(|t| t.priority)
        })
}

/// The synthesized continuation text, or `None` when no todo is open.
pub fn continuation_message(todos: &[TodoItem]) -> Option<String> {
    let open = todos.iter().filter(|t| t.is_open()).count();
    if open == 0 {
        return None;
    }
    let next = next_open_todo(todos)?;
    Some(format!(
        "You have {open} incomplete tasks remaining. Please continue with the \
         next high-priority task: '{}'. Continue until all todos are completed.",
        sanitize_title(&next.content)
    ))
}

/// Strip control characters and truncate to a displayable length.
pub fn sanitize_title(s: &str) -> String {
    let cleaned: String = s.chars().filter(|c| !c.is_control()).collect();
    if cleaned.chars().count() <= TITLE_MAX_CHARS {
        return cleaned;
    }
    cleaned.chars().take(TITLE_MAX_CHARS).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tove_tools::TodoPriority;

    use super::*;

    fn todo(id: &str, status: TodoStatus, priority: TodoPriority) -> TodoItem {
        TodoItem {
            id: id.into(),
            content: format!("task {id}"),
            status,
            priority,
        }
    }

    #[test]
    fn no_open_todos_means_no_continuation() {
        assert!(continuation_message(&[]).is_none());
        let done = vec![todo("1", TodoStatus::Completed, TodoPriority::High)];
        assert!(continuation_message(&done).is_none());
    }

    #[test]
    fn in_progress_beats_pending() {
        let todos = vec![
            todo("a", TodoStatus::Pending, TodoPriority::High),
            todo("b", TodoStatus::InProgress, TodoPriority::Low),
        ];
        assert_eq!(next_open_todo(&todos).unwrap().id, "b");
    }

    #[test]
    fn highest_priority_pending_is_chosen() {
        let todos = vec![
            todo("low", TodoStatus::Pending, TodoPriority::Low),
            todo("high", TodoStatus::Pending, TodoPriority::High),
            todo("med", TodoStatus::Pending, TodoPriority::Medium),
        ];
        assert_eq!(next_open_todo(&todos).unwrap().id, "high");
    }

    #[test]
    fn message_counts_open_items_and_quotes_the_title() {
        let todos = vec![
            todo("1", TodoStatus::InProgress, TodoPriority::Medium),
            todo("2", TodoStatus::Pending, TodoPriority::Medium),
            todo("3", TodoStatus::Completed, TodoPriority::Medium),
        ];
        let msg = continuation_message(&todos).unwrap();
        assert!(msg.contains("2 incomplete tasks"), "{msg}");
        assert!(msg.contains("'task 1'"), "{msg}");
        assert!(msg.contains("Continue until all todos are completed"));
    }

    #[test]
    fn titles_are_control_stripped_and_truncated() {
        let dirty = format!("evil\x1b[31m title\n{}", "x".repeat(300));
        let clean = sanitize_title(&dirty);
        assert!(!clean.contains('\x1b'));
        assert!(!clean.contains('\n'));
        assert_eq!(clean.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn short_titles_pass_through() {
        assert_eq!(sanitize_title("fix the bug"), "fix the bug");
    }
}
