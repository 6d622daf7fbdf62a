// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session summarization: replace an overflowing history with a summary in
//! a child session.
//!
//! A silent, tool-free sub-run summarizes the old history.  The summary is
//! persisted as a message in the *parent* session, a child session is
//! created pointing at it, and a recent tail of messages plus the latest
//! file versions and read-times carry over so the run continues seamlessly
//! inside the child.  Nothing from the sub-run reaches the caller's event
//! channel.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tove_model::{CompletionRequest, Message, ModelProvider, Part, Role};
use tove_store::Store;

use crate::prompts::{SUMMARIZE_REQUEST, SUMMARIZE_SYSTEM};
use crate::runtime::RuntimeRegistry;

/// Summarize `session_id` into a new child session and return the child's
/// id.  `keep_recent` messages from the end of the history (aligned back
/// to a user-turn boundary so tool pairings stay intact) are copied into
/// the child verbatim.
pub async fn summarize_into_child(
    store: &Arc<Store>,
    provider: &Arc<dyn ModelProvider>,
    runtimes: &Arc<RuntimeRegistry>,
    cancel: &CancellationToken,
    session_id: &str,
    keep_recent: usize,
) -> anyhow::Result<String> {
    let parent = store.get_session(session_id).await?;
    let records = store.list_messages(session_id).await?;

    // Split point: everything before it gets summarized, the tail is
    // carried verbatim.  Walk back to a user message so the tail never
    // starts with an orphaned tool result or assistant turn.
    let mut split = records.len().saturating_sub(keep_recent);
    while split > 0 && records[split].role != Role::User {
        split -= 1;
    }
    if split == 0 {
        anyhow::bail!("nothing to summarize: history fits in the recent tail");
    }

    // Tool-free summarization request over the old history only.
    let mut messages: Vec<Message> = records[..split].iter().map(|r| r.to_message()).collect();
    messages.push(Message::user(SUMMARIZE_REQUEST));
    let req = CompletionRequest {
        system: Some(SUMMARIZE_SYSTEM.to_string()),
        messages,
        tools: Vec::new(),
        max_tokens: None,
    };
    let completion = provider
        .send(cancel, req)
        .await
        .context("summarization call failed")?;
    let summary_text = completion
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");
    if summary_text.trim().is_empty() {
        anyhow::bail!("summarization produced an empty summary");
    }

    // Persist the summary in the parent, then hang the child off it.
    let summary_msg = store
        .append_message(session_id, Role::Assistant, vec![Part::text(summary_text)], None)
        .await?;
    let child = store
        .create_session(
            Some(parent.id.clone()),
            format!("{} (continued)", parent.title),
        )
        .await?;
    store.set_summary(&child.id, &summary_msg.id).await?;

    // Recent tail continues in the child.
    for rec in &records[split..] {
        store
            .append_message(&child.id, rec.role, rec.parts.clone(), rec.model.clone())
            .await?;
    }

    // The child inherits each path's latest content as its own "initial"
    // version, so the stale-read gate keeps working without re-views.
    for path in store.list_file_paths(session_id).await? {
        if let Some(latest) = store.latest_file_version(session_id, &path).await? {
            if let Err(e) = store.create_file_version(&child.id, &path, &latest.content).await {
                warn!(path = %path, error = %e, "file version carry-over failed");
            }
        }
    }

    // Runtime state follows the run: read-times, todos, and the bounded
    // continuation counter.
    let parent_rt = runtimes.get_or_create(session_id);
    let child_rt = runtimes.get_or_create(&child.id);
    child_rt.workspace.absorb(parent_rt.workspace.snapshot());
    *child_rt.todos.lock().await = parent_rt.todos.lock().await.clone();
    child_rt.set_continuations(parent_rt.continuations());

    debug!(parent = %parent.id, child = %child.id, "session summarized into child");
    Ok(child.id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tove_model::ScriptedProvider;
    use tove_tools::{TodoItem, TodoPriority, TodoStatus};

    use super::*;

    async fn seeded() -> (Arc<Store>, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sid = store.create_session(None, "refactor").await.unwrap().id;
        for i in 0..6 {
            store
                .append_message(&sid, Role::User, vec![Part::text(format!("ask {i}"))], None)
                .await
                .unwrap();
            store
                .append_message(
                    &sid,
                    Role::Assistant,
                    vec![Part::text(format!("answer {i}"))],
                    Some("m".into()),
                )
                .await
                .unwrap();
        }
        (store, sid)
    }

    fn provider(text: &str) -> Arc<dyn ModelProvider> {
        Arc::new(ScriptedProvider::always_text(text))
    }

    #[tokio::test]
    async fn creates_child_with_summary_reference() {
        let (store, sid) = seeded().await;
        let runtimes = Arc::new(RuntimeRegistry::new());
        let cancel = CancellationToken::new();
        let child_id = summarize_into_child(
            &store,
            &provider("the recap"),
            &runtimes,
            &cancel,
            &sid,
            4,
        )
        .await
        .unwrap();

        let child = store.get_session(&child_id).await.unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(sid.as_str()));
        let summary_id = child.summary_message_id.expect("summary reference");
        let summary = store.get_message(&summary_id).await.unwrap();
        assert_eq!(summary.session_id, sid, "summary lives in the parent");
        assert!(summary.to_message().text().contains("the recap"));
        assert!(child.title.contains("(continued)"));
    }

    #[tokio::test]
    async fn recent_tail_is_copied_and_starts_at_a_user_turn() {
        let (store, sid) = seeded().await;
        let runtimes = Arc::new(RuntimeRegistry::new());
        let cancel = CancellationToken::new();
        let child_id =
            summarize_into_child(&store, &provider("s"), &runtimes, &cancel, &sid, 3)
                .await
                .unwrap();
        let msgs = store.list_messages(&child_id).await.unwrap();
        assert!(!msgs.is_empty());
        assert_eq!(msgs[0].role, Role::User, "tail must start at a user turn");
        assert_eq!(msgs.last().unwrap().to_message().text(), "answer 5");
    }

    #[tokio::test]
    async fn file_versions_carry_over_as_initial() {
        let (store, sid) = seeded().await;
        store.create_file_version(&sid, "src/a.rs", "v0").await.unwrap();
        store.create_file_version(&sid, "src/a.rs", "v1 content").await.unwrap();
        let runtimes = Arc::new(RuntimeRegistry::new());
        let cancel = CancellationToken::new();
        let child_id =
            summarize_into_child(&store, &provider("s"), &runtimes, &cancel, &sid, 2)
                .await
                .unwrap();
        let inherited = store
            .latest_file_version(&child_id, "src/a.rs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inherited.version, "initial");
        assert_eq!(inherited.content, "v1 content");
    }

    #[tokio::test]
    async fn runtime_state_follows_the_child() {
        let (store, sid) = seeded().await;
        let runtimes = Arc::new(RuntimeRegistry::new());
        let parent_rt = runtimes.get_or_create(&sid);
        parent_rt.todos.lock().await.push(TodoItem {
            id: "1".into(),
            content: "keep going".into(),
            status: TodoStatus::Pending,
            priority: TodoPriority::High,
        });
        parent_rt.set_continuations(4);

        let cancel = CancellationToken::new();
        let child_id =
            summarize_into_child(&store, &provider("s"), &runtimes, &cancel, &sid, 2)
                .await
                .unwrap();
        let child_rt = runtimes.get_or_create(&child_id);
        assert_eq!(child_rt.todos.lock().await.len(), 1);
        assert_eq!(child_rt.continuations(), 4);
    }

    #[tokio::test]
    async fn tiny_history_refuses_to_summarize() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sid = store.create_session(None, "t").await.unwrap().id;
        store
            .append_message(&sid, Role::User, vec![Part::text("hi")], None)
            .await
            .unwrap();
        let runtimes = Arc::new(RuntimeRegistry::new());
        let cancel = CancellationToken::new();
        let err = summarize_into_child(&store, &provider("s"), &runtimes, &cancel, &sid, 8)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nothing to summarize"));
    }

    #[tokio::test]
    async fn empty_summary_is_an_error() {
        let (store, sid) = seeded().await;
        let runtimes = Arc::new(RuntimeRegistry::new());
        let cancel = CancellationToken::new();
        let err = summarize_into_child(&store, &provider("   "), &runtimes, &cancel, &sid, 2)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty summary"));
    }
}
