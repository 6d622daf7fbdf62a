// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context/token accounting and prompt assembly.

use std::sync::Arc;

use tracing::debug;

use tove_model::{Message, ModelSpec, Part, Role, Usage};
use tove_store::{MessageRecord, Result, Store};

/// Tokens held back from the window for the system prompt, tool schemas,
/// and the reply itself.
const SAFETY_MARGIN: u64 = 4_096;

pub struct ContextManager {
    store: Arc<Store>,
    /// Fraction of the context window at which compaction triggers.
    threshold: f64,
}

impl ContextManager {
    pub fn new(store: Arc<Store>, threshold: f64) -> Self {
        Self { store, threshold }
    }

    /// True when the session's cumulative token usage has crossed the
    /// compaction threshold of the model window.
    pub async fn should_compact(&self, session_id: &str, spec: &ModelSpec) -> Result<bool> {
        let session = self.store.get_session(session_id).await?;
        let used = session.prompt_tokens + session.completion_tokens;
        let window = spec.context_window.saturating_sub(SAFETY_MARGIN);
        let compact = (used as f64) > self.threshold * (window as f64);
        if compact {
            debug!(session = session_id, used, window, "session over compaction threshold");
        }
        Ok(compact)
    }

    /// Assemble the provider input: the summary message when the session
    /// has one, then the ordered history, truncating the oldest exchanges
    /// first when the approximate size exceeds the window.  Tool messages
    /// always stay with their parent assistant turn.
    pub async fn build_prompt(&self, session_id: &str, spec: &ModelSpec) -> Result<Vec<Message>> {
        let session = self.store.get_session(session_id).await?;
        let records = self.store.list_messages(session_id).await?;

        let mut head: Vec<Message> = Vec::new();
        if let Some(summary_id) = &session.summary_message_id {
            // The summary message is persisted in the parent session.
            let summary = self.store.get_message(summary_id).await?;
            head.push(Message {
                role: Role::Assistant,
                parts: vec![Part::text(format!(
                    "Summary of the conversation so far:\n{}",
                    summary.to_message().text()
                ))],
            });
        }

        let budget =
            (spec.context_window.saturating_sub(SAFETY_MARGIN + spec.default_max_tokens as u64))
                as usize;
        let history = fit_to_budget(&records, budget.saturating_sub(approx(&head)));

        head.extend(history);
        Ok(head)
    }

    /// Dollar cost of a turn at this model's rates.
    pub fn turn_cost(&self, spec: &ModelSpec, usage: Usage) -> f64 {
        spec.cost(usage.prompt_tokens, usage.completion_tokens)
    }
}

fn approx(messages: &[Message]) -> usize {
    messages.iter().map(Message::approx_tokens).sum()
}

/// Group the history into turn units (a user or assistant message plus any
/// tool-role messages answering it) and drop whole units from the front
/// until the approximate token total fits the budget.  The newest unit is
/// always kept.
fn fit_to_budget(records: &[MessageRecord], budget: usize) -> Vec<Message> {
    let mut groups: Vec<Vec<Message>> = Vec::new();
    for rec in records {
        let msg = rec.to_message();
        if msg.role == Role::Tool {
            // Tool results belong to the preceding assistant turn.
            match groups.last_mut() {
                Some(last) => last.push(msg),
                None => groups.push(vec![msg]),
            }
        } else {
            groups.push(vec![msg]);
        }
    }

    let sizes: Vec<usize> = groups
        .iter()
        .map(|g| g.iter().map(Message::approx_tokens).sum())
        .collect();
    let mut total: usize = sizes.iter().sum();
    let mut start = 0;
    while start + 1 < groups.len() && total > budget {
        total -= sizes[start];
        start += 1;
    }
    if start > 0 {
        debug!(dropped_groups = start, "truncated oldest history to fit the window");
    }
    groups.into_iter().skip(start).flatten().collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tove_model::{ModelSpec, Role};
    use tove_store::CounterDelta;

    use super::*;

    fn spec(window: u64) -> ModelSpec {
        ModelSpec {
            context_window: window,
            default_max_tokens: 0,
            ..ModelSpec::fallback("mock", "m")
        }
    }

    async fn seeded_store() -> (Arc<Store>, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let id = store.create_session(None, "t").await.unwrap().id;
        (store, id)
    }

    #[tokio::test]
    async fn fresh_session_does_not_compact() {
        let (store, sid) = seeded_store().await;
        let mgr = ContextManager::new(Arc::clone(&store), 0.8);
        assert!(!mgr.should_compact(&sid, &spec(100_000)).await.unwrap());
    }

    #[tokio::test]
    async fn usage_over_threshold_compacts() {
        let (store, sid) = seeded_store().await;
        store
            .update_session_counters(
                &sid,
                CounterDelta { prompt_tokens: 90_000, completion_tokens: 5_000, cost: 0.0 },
            )
            .await
            .unwrap();
        let mgr = ContextManager::new(Arc::clone(&store), 0.8);
        assert!(mgr.should_compact(&sid, &spec(100_000)).await.unwrap());
        // A far larger window stays under the threshold.
        assert!(!mgr.should_compact(&sid, &spec(1_000_000)).await.unwrap());
    }

    #[tokio::test]
    async fn build_prompt_returns_history_in_order() {
        let (store, sid) = seeded_store().await;
        store
            .append_message(&sid, Role::User, vec![Part::text("one")], None)
            .await
            .unwrap();
        store
            .append_message(&sid, Role::Assistant, vec![Part::text("two")], Some("m".into()))
            .await
            .unwrap();
        let mgr = ContextManager::new(Arc::clone(&store), 0.8);
        let prompt = mgr.build_prompt(&sid, &spec(100_000)).await.unwrap();
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].text(), "one");
        assert_eq!(prompt[1].text(), "two");
    }

    #[tokio::test]
    async fn summary_message_is_prepended_for_child_sessions() {
        let (store, parent) = seeded_store().await;
        let summary = store
            .append_message(&parent, Role::Assistant, vec![Part::text("did things")], None)
            .await
            .unwrap();
        let child = store.create_session(Some(parent.clone()), "t2").await.unwrap().id;
        store.set_summary(&child, &summary.id).await.unwrap();
        store
            .append_message(&child, Role::User, vec![Part::text("go on")], None)
            .await
            .unwrap();

        let mgr = ContextManager::new(Arc::clone(&store), 0.8);
        let prompt = mgr.build_prompt(&child, &spec(100_000)).await.unwrap();
        assert!(prompt[0].text().contains("did things"));
        assert_eq!(prompt.last().unwrap().text(), "go on");
    }

    #[test]
    fn truncation_drops_oldest_groups_first() {
        let recs: Vec<MessageRecord> = (0..6)
            .map(|i| MessageRecord {
                id: format!("m{i}"),
                session_id: "s".into(),
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                // ~25 tokens each
                parts: vec![Part::text("x".repeat(100))],
                model: None,
                usage: Usage::default(),
                created_at: chrono::Utc::now(),
                finished_at: None,
            })
            .collect();
        // Budget for roughly two messages.
        let fitted = fit_to_budget(&recs, 55);
        assert!(fitted.len() < 6);
        // The newest message survives.
        assert_eq!(fitted.last().unwrap().text(), "x".repeat(100));
    }

    #[test]
    fn tool_messages_stay_with_their_assistant_turn() {
        let mk = |role, text: &str| MessageRecord {
            id: text.into(),
            session_id: "s".into(),
            role,
            parts: vec![Part::text(text.to_string())],
            model: None,
            usage: Usage::default(),
            created_at: chrono::Utc::now(),
            finished_at: None,
        };
        let recs = vec![
            mk(Role::User, &"u1".repeat(60)),
            mk(Role::Assistant, &"a1".repeat(60)),
            mk(Role::Tool, &"t1".repeat(60)),
            mk(Role::User, "u2"),
        ];
        // Tight budget: only the last groups fit.  A tool message must
        // never survive without the assistant turn it answers.
        for budget in [10usize, 40, 80, 1000] {
            let fitted = fit_to_budget(&recs, budget);
            let first = fitted.first().unwrap();
            assert_ne!(first.role, Role::Tool, "budget {budget}: orphaned tool message");
        }
    }

    #[test]
    fn newest_group_survives_even_over_budget() {
        let recs = vec![MessageRecord {
            id: "only".into(),
            session_id: "s".into(),
            role: Role::User,
            parts: vec![Part::text("x".repeat(10_000))],
            model: None,
            usage: Usage::default(),
            created_at: chrono::Utc::now(),
            finished_at: None,
        }];
        let fitted = fit_to_budget(&recs, 10);
        assert_eq!(fitted.len(), 1);
    }
}
