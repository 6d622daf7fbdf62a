// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire types shared by both transports.
//!
//! External tool servers speak JSON-RPC 2.0 with two methods:
//! `tools/list` (no params) and `tools/call` (`{name, arguments}`).
//! Parameter shapes are described with JSON Schema, exactly like the
//! built-in tools advertise theirs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0", id, method: method.into(), params }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// One tool as advertised by a server's `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments object.
    #[serde(default = "default_schema", alias = "inputSchema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

#[derive(Debug, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDescriptor>,
}

/// Result payload of `tools/call`: a list of content items plus an error
/// flag.  Only text items are consumed; other kinds are skipped.
#[derive(Debug, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, alias = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl ToolCallResult {
    /// Concatenated text content.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentItem::Text { text } => Some(text.as_str()),
                ContentItem::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_version_tag() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":7"));
        assert!(!json.contains("params"), "absent params must be omitted: {json}");
    }

    #[test]
    fn descriptor_accepts_camel_case_schema_key() {
        let d: ToolDescriptor = serde_json::from_str(
            r#"{"name": "lookup", "description": "d", "inputSchema": {"type": "object"}}"#,
        )
        .unwrap();
        assert_eq!(d.name, "lookup");
        assert_eq!(d.input_schema["type"], "object");
    }

    #[test]
    fn descriptor_defaults_missing_schema() {
        let d: ToolDescriptor = serde_json::from_str(r#"{"name": "bare"}"#).unwrap();
        assert_eq!(d.input_schema["type"], "object");
    }

    #[test]
    fn call_result_concatenates_text_items() {
        let r: ToolCallResult = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "a"}, {"type": "image", "data": "x"},
                 {"type": "text", "text": "b"}], "isError": false}"#,
        )
        .unwrap();
        assert_eq!(r.text(), "a\nb");
        assert!(!r.is_error);
    }

    #[test]
    fn error_response_parses() {
        let r: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no such method"}}"#,
        )
        .unwrap();
        let err = r.error.unwrap();
        assert_eq!(err.code, -32601);
        assert!(err.message.contains("no such method"));
    }
}
