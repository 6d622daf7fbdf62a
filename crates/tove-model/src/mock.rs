// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::ModelSpec, provider::EventStream, CompletionRequest, FinishReason, ProviderEvent,
    Usage,
};

/// Deterministic provider for tests.  Echoes the last user message back as
/// the assistant response.
pub struct MockProvider {
    spec: ModelSpec,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self { spec: ModelSpec::fallback("mock", "mock-model") }
    }
}

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    async fn stream(
        &self,
        _ctx: &CancellationToken,
        req: CompletionRequest,
    ) -> anyhow::Result<EventStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::Role::User))
            .map(|m| m.text())
            .unwrap_or_else(|| "[no input]".into());

        let events = vec![
            ProviderEvent::ContentStart,
            ProviderEvent::ContentDelta { text: format!("MOCK: {reply}") },
            ProviderEvent::Complete {
                usage: Usage { prompt_tokens: 10, completion_tokens: 10 },
                finish_reason: FinishReason::EndTurn,
            },
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted provider.  Each `stream` call pops the next event script
/// from the front of the queue, so tests can specify exact sequences —
/// including tool calls and errors — without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<ProviderEvent>>>>,
    spec: ModelSpec,
    /// The last request seen, for assertions on what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Total number of `stream` calls made against this provider.
    pub calls: Arc<Mutex<u32>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            spec: ModelSpec::fallback("mock", "scripted-mock"),
            last_request: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Shrink the claimed context window, for compaction tests.
    pub fn with_context_window(mut self, window: u64) -> Self {
        self.spec.context_window = window;
        self
    }

    /// Attach per-million costs, for accounting tests.
    pub fn with_costs(mut self, cost_in: f64, cost_out: f64) -> Self {
        self.spec.cost_per_million_in = cost_in;
        self.spec.cost_per_million_out = cost_out;
        self
    }

    /// Convenience: one round that streams `text` and ends the turn.
    pub fn always_text(text: impl Into<String>) -> Self {
        Self::new(vec![Self::text_round(text, 5, 1)])
    }

    /// A single text round with explicit usage.
    pub fn text_round(
        text: impl Into<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> Vec<ProviderEvent> {
        vec![
            ProviderEvent::ContentStart,
            ProviderEvent::ContentDelta { text: text.into() },
            ProviderEvent::Complete {
                usage: Usage { prompt_tokens, completion_tokens },
                finish_reason: FinishReason::EndTurn,
            },
        ]
    }

    /// A round where the model requests one tool call.
    pub fn tool_round(
        id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Vec<ProviderEvent> {
        let id = id.into();
        vec![
            ProviderEvent::ToolUseStart { id: id.clone(), name: name.into() },
            ProviderEvent::ToolUseDelta { id, fragment: args_json.into() },
            ProviderEvent::Complete {
                usage: Usage { prompt_tokens: 5, completion_tokens: 5 },
                finish_reason: FinishReason::ToolUse,
            },
        ]
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedProvider {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    async fn stream(
        &self,
        _ctx: &CancellationToken,
        req: CompletionRequest,
    ) -> anyhow::Result<EventStream> {
        *self.last_request.lock().unwrap() = Some(req);
        *self.calls.lock().unwrap() += 1;
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Fallback when all scripts are consumed, so a test that
                // loops further than scripted finishes instead of hanging.
                vec![
                    ProviderEvent::ContentDelta { text: "[no more scripts]".into() },
                    ProviderEvent::Complete {
                        usage: Usage::default(),
                        finish_reason: FinishReason::EndTurn,
                    },
                ]
            } else {
                scripts.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{Message, ModelProvider};

    fn req(text: &str) -> CompletionRequest {
        CompletionRequest { messages: vec![Message::user(text)], ..Default::default() }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider::default();
        let ctx = CancellationToken::new();
        let mut s = p.stream(&ctx, req("hi")).await.unwrap();
        // Skip ContentStart.
        s.next().await.unwrap();
        match s.next().await.unwrap() {
            ProviderEvent::ContentDelta { text } => assert!(text.contains("MOCK: hi")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_rounds_pop_in_order() {
        let p = ScriptedProvider::new(vec![
            ScriptedProvider::text_round("first", 1, 1),
            ScriptedProvider::text_round("second", 1, 1),
        ]);
        let ctx = CancellationToken::new();
        for expect in ["first", "second", "[no more scripts]"] {
            let mut s = p.stream(&ctx, req("x")).await.unwrap();
            let mut text = String::new();
            while let Some(ev) = s.next().await {
                if let ProviderEvent::ContentDelta { text: t } = ev {
                    text.push_str(&t);
                }
            }
            assert_eq!(text, expect);
        }
        assert_eq!(*p.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let p = ScriptedProvider::always_text("ok");
        let ctx = CancellationToken::new();
        let _ = p.stream(&ctx, req("remember me")).await.unwrap();
        let seen = p.last_request.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().messages[0].text(), "remember me");
    }
}
