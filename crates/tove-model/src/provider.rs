// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::ModelSpec, Completion, CompletionRequest, FinishReason, Part, ProviderEvent, Usage,
};

pub type EventStream = Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>;

/// Contract every model provider implements.
///
/// `stream` is the primary path; `send` has a default implementation that
/// drains the stream and assembles the parts, so adapters only need to
/// implement streaming.  Cancelling `ctx` must terminate the stream and
/// abort any in-flight request.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Descriptor of the model this provider speaks for.
    fn spec(&self) -> &ModelSpec;

    /// Open a streaming completion.  Errors returned here are connection
    /// establishment failures; errors after that arrive as
    /// [`ProviderEvent::Error`] items on the stream.
    async fn stream(
        &self,
        ctx: &CancellationToken,
        req: CompletionRequest,
    ) -> anyhow::Result<EventStream>;

    /// Non-streaming fallback: drain the stream into a [`Completion`].
    async fn send(
        &self,
        ctx: &CancellationToken,
        req: CompletionRequest,
    ) -> anyhow::Result<Completion> {
        let mut stream = self.stream(ctx, req).await?;
        let mut text = String::new();
        let mut thinking = String::new();
        let mut calls: Vec<(String, String, String)> = Vec::new();
        let mut usage = Usage::default();
        let mut finish = FinishReason::EndTurn;

        while let Some(ev) = stream.next().await {
            match ev {
                ProviderEvent::ContentDelta { text: t } => text.push_str(&t),
                ProviderEvent::ThinkingDelta { text: t } => thinking.push_str(&t),
                ProviderEvent::ToolUseStart { id, name } => {
                    calls.push((id, name, String::new()))
                }
                ProviderEvent::ToolUseDelta { id, fragment } => {
                    if let Some(c) = calls.iter_mut().find(|(cid, _, _)| *cid == id) {
                        c.2.push_str(&fragment);
                    }
                }
                ProviderEvent::Complete { usage: u, finish_reason } => {
                    usage = u;
                    finish = finish_reason;
                }
                ProviderEvent::Error { message, .. } => {
                    anyhow::bail!("provider stream error: {message}");
                }
                ProviderEvent::ContentStart => {}
            }
        }

        let mut parts = Vec::new();
        if !thinking.is_empty() {
            parts.push(Part::Thinking { content: thinking });
        }
        if !text.is_empty() {
            parts.push(Part::Text { content: text });
        }
        for (id, name, args) in calls {
            let input = if args.is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&args)
                    .unwrap_or(serde_json::Value::Object(Default::default()))
            };
            parts.push(Part::ToolCall { id, name, input });
        }

        Ok(Completion { parts, usage, finish_reason: finish })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;

    #[tokio::test]
    async fn send_assembles_text_and_tool_calls() {
        let p = ScriptedProvider::new(vec![vec![
            ProviderEvent::ContentDelta { text: "hel".into() },
            ProviderEvent::ContentDelta { text: "lo".into() },
            ProviderEvent::ToolUseStart { id: "t1".into(), name: "ls".into() },
            ProviderEvent::ToolUseDelta { id: "t1".into(), fragment: "{\"path\":".into() },
            ProviderEvent::ToolUseDelta { id: "t1".into(), fragment: "\".\"}".into() },
            ProviderEvent::Complete {
                usage: Usage { prompt_tokens: 3, completion_tokens: 4 },
                finish_reason: FinishReason::ToolUse,
            },
        ]]);
        let ctx = CancellationToken::new();
        let c = p.send(&ctx, CompletionRequest::default()).await.unwrap();
        assert_eq!(c.finish_reason, FinishReason::ToolUse);
        assert_eq!(c.usage.completion_tokens, 4);
        assert!(matches!(&c.parts[0], Part::Text { content } if content == "hello"));
        match &c.parts[1] {
            Part::ToolCall { id, name, input } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "ls");
                assert_eq!(input["path"], ".");
            }
            other => panic!("wrong part: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_surfaces_stream_error() {
        let p = ScriptedProvider::new(vec![vec![ProviderEvent::Error {
            retryable: false,
            message: "bad auth".into(),
            retry_after: None,
        }]]);
        let ctx = CancellationToken::new();
        let err = p.send(&ctx, CompletionRequest::default()).await.unwrap_err();
        assert!(err.to_string().contains("bad auth"));
    }
}
