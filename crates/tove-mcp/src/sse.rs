// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Server-sent-events transport: JSON-RPC over HTTPS with bearer auth.
//!
//! Each request POSTs one JSON-RPC message; the server answers with an SSE
//! body whose `data:` lines carry JSON-RPC responses.  The response matching
//! our request id is returned; other events (notifications, keep-alives)
//! are skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ToolCallResult, ToolDescriptor, ToolsListResult};
use crate::transport::McpTransport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SseTransport {
    url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl SseTransport {
    pub fn new(url: String, bearer_token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { url, bearer_token, client, next_id: AtomicU64::new(1) })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        debug!(method, id, url = %self.url, "sse tool-server request");

        let mut builder = self
            .client
            .post(&self.url)
            .header("accept", "text/event-stream")
            .json(&req);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await.context("tool server request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("tool server returned HTTP {status}");
        }
        let body = response.text().await?;

        for payload in sse_data_payloads(&body) {
            let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&payload) else {
                continue;
            };
            if resp.id != Some(id) {
                continue;
            }
            if let Some(err) = resp.error {
                anyhow::bail!("tool server error {}: {}", err.code, err.message);
            }
            return resp.result.context("tool server response missing result");
        }
        anyhow::bail!("no matching response in SSE body")
    }
}

/// Extract the data payloads from an SSE body.  Consecutive `data:` lines
/// belonging to one event are joined with newlines, per the SSE framing
/// rules.
fn sse_data_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.trim_start());
        } else if line.is_empty() && !current.is_empty() {
            payloads.push(current.join("\n"));
            current.clear();
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }
    payloads
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
        let result = self.request("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)?;
        Ok(parsed.tools)
    }

    async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<(String, bool)> {
        let params = serde_json::json!({ "name": name, "arguments": args });
        let result = self.request("tools/call", Some(params)).await?;
        let parsed: ToolCallResult = serde_json::from_value(result)?;
        Ok((parsed.text(), parsed.is_error))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event_single_line() {
        let body = "data: {\"id\":1}\n\n";
        assert_eq!(sse_data_payloads(body), vec!["{\"id\":1}"]);
    }

    #[test]
    fn multi_line_event_joins_with_newlines() {
        let body = "data: {\"id\":1,\ndata: \"x\":2}\n\n";
        assert_eq!(sse_data_payloads(body), vec!["{\"id\":1,\n\"x\":2}"]);
    }

    #[test]
    fn several_events_split_on_blank_lines() {
        let body = "event: ping\ndata: {}\n\ndata: {\"id\":2}\n\n";
        assert_eq!(sse_data_payloads(body), vec!["{}", "{\"id\":2}"]);
    }

    #[test]
    fn comments_and_other_fields_are_ignored() {
        let body = ": keep-alive\nretry: 100\ndata: {\"a\":1}\n\n";
        assert_eq!(sse_data_payloads(body), vec!["{\"a\":1}"]);
    }

    #[test]
    fn unterminated_final_event_is_kept() {
        let body = "data: {\"id\":3}";
        assert_eq!(sse_data_payloads(body), vec!["{\"id\":3}"]);
    }
}
