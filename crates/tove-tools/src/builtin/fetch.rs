// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::permission::{PermissionBroker, PermissionRequest};
use crate::tool::{require_str, Tool, ToolCall, ToolCtx, ToolOutput};

const DEFAULT_MAX_CHARS: usize = 50_000;
const MAX_REDIRECTS: usize = 3;
/// Bodies larger than this are cut before conversion; protects the context
/// window from multi-megabyte pages.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// HTTP GET with permission gating, redirect and size limits.
pub struct FetchTool {
    broker: Arc<PermissionBroker>,
}

impl FetchTool {
    pub fn new(broker: Arc<PermissionBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its content as readable text.\n\
         HTML is converted to text; JSON is pretty-printed. http/https only;\n\
         at most 3 redirects; content is truncated at max_chars (default 50000).\n\
         Requires permission. Read-only: no authentication, no side effects."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 50000)"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let url = match require_str(call, "url") {
            Ok(u) => u.to_string(),
            Err(out) => return out,
        };
        let max_chars = call
            .args
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_CHARS as u64) as usize;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::err(&call.id, "only http/https URLs are supported");
        }

        let granted = self
            .broker
            .request(
                &ctx.cancel,
                PermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool: "fetch".into(),
                    action: "fetch".into(),
                    description: url.clone(),
                    params: call.args.clone(),
                    path: None,
                },
            )
            .await;
        if !granted {
            return ToolOutput::err(&call.id, "permission denied");
        }

        debug!(url = %url, "fetch tool");

        let fetched = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(anyhow::anyhow!("canceled")),
            r = fetch_url(&url, ctx.timeout, max_chars) => r,
        };
        match fetched {
            Ok(content) => ToolOutput::ok(&call.id, content),
            Err(e) => ToolOutput::err(&call.id, format!("fetch error: {e}")),
        }
    }
}

async fn fetch_url(
    url: &str,
    timeout: std::time::Duration,
    max_chars: usize,
) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .user_agent("tove-agent/1.0")
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("HTTP {status}");
    }
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let body = response.text().await?;
    let body = if body.len() > MAX_BODY_BYTES {
        body[..MAX_BODY_BYTES].to_string()
    } else {
        body
    };

    let content = if content_type.contains("html") {
        html_to_text(&body)
    } else if content_type.contains("json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(v) => serde_json::to_string_pretty(&v).unwrap_or(body),
            Err(_) => body,
        }
    } else {
        body
    };

    if content.len() > max_chars {
        // Cut on a char boundary.
        let mut end = max_chars;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        Ok(format!(
            "{}...[truncated at {max_chars} chars; total {} chars]",
            &content[..end],
            content.len()
        ))
    } else {
        Ok(content)
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
