// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    catalog::{self, ModelSpec},
    provider::EventStream,
    CompletionRequest, FinishReason, Message, Part, ProviderEvent, Role, Usage,
};

/// Reference wire adapter for the Anthropic messages API.
pub struct AnthropicProvider {
    spec: ModelSpec,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let spec = catalog::lookup("anthropic", &model)
            .unwrap_or_else(|| ModelSpec::fallback("anthropic", &model));
        let max_tokens = max_tokens.unwrap_or(spec.default_max_tokens);
        Self {
            spec,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens,
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    async fn stream(
        &self,
        ctx: &CancellationToken,
        req: CompletionRequest,
    ) -> anyhow::Result<EventStream> {
        let key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .context("no Anthropic API key configured")?;

        let mut body = json!({
            "model": self.spec.wire_name(),
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": self.temperature,
            "stream": true,
            "messages": wire_messages(&req.messages),
        });
        if let Some(system) = &req.system {
            body["system"] = json!(system);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        debug!(model = %self.spec.wire_name(), messages = req.messages.len(), "sending anthropic request");

        let send = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = ctx.cancelled() => anyhow::bail!("request canceled"),
            r = send => r.context("Anthropic request failed")?,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = resp.text().await.unwrap_or_default();
            // HTTP-level failures are surfaced as a single terminal Error
            // event so the caller's retry policy sees the retryability flag.
            let retryable = matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 529);
            let ev = ProviderEvent::Error {
                retryable,
                message: format!("anthropic error {status}: {text}"),
                retry_after,
            };
            return Ok(Box::pin(futures::stream::iter(vec![ev])));
        }

        let cancel = ctx.clone();
        let byte_stream = resp.bytes_stream();
        // SSE lines can be split across TCP chunks, so a remainder buffer is
        // carried forward; only complete '\n'-terminated lines are parsed.
        let event_stream = byte_stream
            .scan(
                (String::new(), StreamState::default(), cancel),
                |(buf, state, cancel), chunk| {
                    if cancel.is_cancelled() {
                        return futures::future::ready(None);
                    }
                    let mut events = Vec::new();
                    match chunk {
                        Ok(b) => buf.push_str(&String::from_utf8_lossy(&b)),
                        Err(e) => {
                            events.push(ProviderEvent::Error {
                                retryable: true,
                                message: format!("stream read error: {e}"),
                                retry_after: None,
                            });
                            return futures::future::ready(Some(events));
                        }
                    }
                    while let Some(pos) = buf.find('\n') {
                        let line = buf[..pos].trim_end_matches('\r').to_string();
                        buf.drain(..=pos);
                        if let Some(data) = line.strip_prefix("data: ") {
                            if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                                events.extend(parse_event(&v, state));
                            }
                        }
                    }
                    futures::future::ready(Some(events))
                },
            )
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Per-stream accumulation needed to emit a single well-formed `Complete`.
#[derive(Default)]
struct StreamState {
    /// Content-block index → tool-use id, so argument deltas can be routed.
    tool_ids: std::collections::HashMap<u64, String>,
    usage: Usage,
    stop_reason: Option<FinishReason>,
}

fn parse_event(v: &Value, state: &mut StreamState) -> Vec<ProviderEvent> {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            state.usage.prompt_tokens =
                v["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0);
            vec![ProviderEvent::ContentStart]
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                let id = block["id"].as_str().unwrap_or("").to_string();
                let name = block["name"].as_str().unwrap_or("").to_string();
                state.tool_ids.insert(index, id.clone());
                vec![ProviderEvent::ToolUseStart { id, name }]
            } else {
                vec![]
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("").to_string();
                    if text.is_empty() {
                        vec![]
                    } else {
                        vec![ProviderEvent::ContentDelta { text }]
                    }
                }
                "thinking_delta" => {
                    let text = delta["thinking"].as_str().unwrap_or("").to_string();
                    if text.is_empty() {
                        vec![]
                    } else {
                        vec![ProviderEvent::ThinkingDelta { text }]
                    }
                }
                "input_json_delta" => {
                    let fragment = delta["partial_json"].as_str().unwrap_or("").to_string();
                    match state.tool_ids.get(&index) {
                        Some(id) if !fragment.is_empty() => {
                            vec![ProviderEvent::ToolUseDelta { id: id.clone(), fragment }]
                        }
                        _ => vec![],
                    }
                }
                // signature_delta carries an integrity blob, not content.
                _ => vec![],
            }
        }
        "message_delta" => {
            if let Some(out) = v["usage"]["output_tokens"].as_u64() {
                state.usage.completion_tokens = out;
            }
            state.stop_reason = v["delta"]["stop_reason"].as_str().map(|s| match s {
                "tool_use" => FinishReason::ToolUse,
                "max_tokens" => FinishReason::Length,
                "stop_sequence" => FinishReason::Stop,
                _ => FinishReason::EndTurn,
            });
            vec![]
        }
        "message_stop" => vec![ProviderEvent::Complete {
            usage: state.usage,
            finish_reason: state.stop_reason.unwrap_or(FinishReason::EndTurn),
        }],
        "error" => {
            let kind = v["error"]["type"].as_str().unwrap_or("");
            let message = v["error"]["message"].as_str().unwrap_or("").to_string();
            vec![ProviderEvent::Error {
                retryable: matches!(kind, "overloaded_error" | "api_error" | "rate_limit_error"),
                message: format!("{kind}: {message}"),
                retry_after: None,
            }]
        }
        _ => vec![],
    }
}

/// Convert canonical messages into the Anthropic wire shape.
///
/// Tool-role messages become user messages carrying `tool_result` blocks,
/// and consecutive same-wire-role messages are merged, because the API
/// requires strictly alternating user/assistant turns.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<(String, Vec<Value>)> = Vec::new();

    for msg in messages {
        let (wire_role, blocks) = match msg.role {
            // System text travels in the top-level system field; a stray
            // system message in the list is folded into a user block.
            Role::System | Role::User => ("user", user_blocks(&msg.parts)),
            Role::Assistant => ("assistant", assistant_blocks(&msg.parts)),
            Role::Tool => ("user", tool_blocks(&msg.parts)),
        };
        if blocks.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some((role, existing)) if role == wire_role => existing.extend(blocks),
            _ => out.push((wire_role.to_string(), blocks)),
        }
    }

    out.into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

fn user_blocks(parts: &[Part]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { content } if !content.is_empty() => {
                Some(json!({ "type": "text", "text": content }))
            }
            Part::Attachment { mime, data } => Some(json!({
                "type": "image",
                "source": { "type": "base64", "media_type": mime, "data": data },
            })),
            _ => None,
        })
        .collect()
}

fn assistant_blocks(parts: &[Part]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { content } if !content.is_empty() => {
                Some(json!({ "type": "text", "text": content }))
            }
            Part::Thinking { .. } => None,
            Part::ToolCall { id, name, input } => Some(json!({
                "type": "tool_use", "id": id, "name": name, "input": input,
            })),
            _ => None,
        })
        .collect()
}

fn tool_blocks(parts: &[Part]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::ToolResult { call_id, content, is_error } => Some(json!({
                "type": "tool_result",
                "tool_use_id": call_id,
                "content": content,
                "is_error": is_error,
            })),
            _ => None,
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_role_becomes_user_tool_result_block() {
        let msgs = vec![Message::tool_result("c1", "out", false)];
        let wire = wire_messages(&msgs);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"][0]["type"], "tool_result");
        assert_eq!(wire[0]["content"][0]["tool_use_id"], "c1");
    }

    #[test]
    fn consecutive_same_role_messages_merge() {
        let msgs = vec![
            Message::tool_result("a", "1", false),
            Message::tool_result("b", "2", false),
            Message::user("next"),
        ];
        let wire = wire_messages(&msgs);
        // Both tool results and the user text fold into a single user turn.
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["content"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn assistant_tool_call_serialized_as_tool_use() {
        let msgs = vec![Message {
            role: Role::Assistant,
            parts: vec![
                Part::text("on it"),
                Part::ToolCall {
                    id: "t1".into(),
                    name: "grep".into(),
                    input: json!({"pattern": "x"}),
                },
            ],
        }];
        let wire = wire_messages(&msgs);
        let content = wire[0]["content"].as_array().unwrap();
        assert_eq!(content[1]["type"], "tool_use");
        assert_eq!(content[1]["name"], "grep");
    }

    #[test]
    fn attachment_becomes_image_block() {
        let msgs = vec![Message {
            role: Role::User,
            parts: vec![
                Part::text("what is this"),
                Part::Attachment { mime: "image/png".into(), data: "QUJD".into() },
            ],
        }];
        let wire = wire_messages(&msgs);
        let content = wire[0]["content"].as_array().unwrap();
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["source"]["media_type"], "image/png");
    }

    #[test]
    fn parse_text_delta() {
        let mut state = StreamState::default();
        let evs = parse_event(
            &json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "text_delta", "text": "hi"}}),
            &mut state,
        );
        assert!(matches!(&evs[0], ProviderEvent::ContentDelta { text } if text == "hi"));
    }

    #[test]
    fn tool_use_start_registers_id_for_deltas() {
        let mut state = StreamState::default();
        let evs = parse_event(
            &json!({"type": "content_block_start", "index": 1,
                    "content_block": {"type": "tool_use", "id": "tu_1", "name": "ls"}}),
            &mut state,
        );
        assert!(matches!(&evs[0], ProviderEvent::ToolUseStart { id, name } if id == "tu_1" && name == "ls"));

        let evs = parse_event(
            &json!({"type": "content_block_delta", "index": 1,
                    "delta": {"type": "input_json_delta", "partial_json": "{\"p\":1}"}}),
            &mut state,
        );
        assert!(
            matches!(&evs[0], ProviderEvent::ToolUseDelta { id, fragment } if id == "tu_1" && fragment == "{\"p\":1}")
        );
    }

    #[test]
    fn stop_reason_maps_to_finish_reason() {
        let mut state = StreamState::default();
        parse_event(
            &json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"},
                    "usage": {"output_tokens": 7}}),
            &mut state,
        );
        let evs = parse_event(&json!({"type": "message_stop"}), &mut state);
        match &evs[0] {
            ProviderEvent::Complete { usage, finish_reason } => {
                assert_eq!(*finish_reason, FinishReason::ToolUse);
                assert_eq!(usage.completion_tokens, 7);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn max_tokens_stop_reason_maps_to_length() {
        let mut state = StreamState::default();
        parse_event(
            &json!({"type": "message_delta", "delta": {"stop_reason": "max_tokens"}, "usage": {}}),
            &mut state,
        );
        let evs = parse_event(&json!({"type": "message_stop"}), &mut state);
        assert!(
            matches!(&evs[0], ProviderEvent::Complete { finish_reason, .. } if *finish_reason == FinishReason::Length)
        );
    }

    #[test]
    fn overloaded_error_is_retryable() {
        let mut state = StreamState::default();
        let evs = parse_event(
            &json!({"type": "error", "error": {"type": "overloaded_error", "message": "busy"}}),
            &mut state,
        );
        assert!(matches!(&evs[0], ProviderEvent::Error { retryable: true, .. }));
    }

    #[test]
    fn auth_error_is_not_retryable() {
        let mut state = StreamState::default();
        let evs = parse_event(
            &json!({"type": "error", "error": {"type": "authentication_error", "message": "no"}}),
            &mut state,
        );
        assert!(matches!(&evs[0], ProviderEvent::Error { retryable: false, .. }));
    }
}
