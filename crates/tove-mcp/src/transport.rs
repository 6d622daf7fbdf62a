// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::ToolDescriptor;

/// What both transports provide: list the server's tools and invoke one.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>>;
    /// Returns (text content, is_error).
    async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<(String, bool)>;
}
