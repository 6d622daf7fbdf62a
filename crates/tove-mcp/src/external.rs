// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use tove_config::{McpServerConfig, McpTransportConfig};
use tove_tools::{PermissionBroker, PermissionRequest, Tool, ToolCall, ToolCtx, ToolOutput};

use crate::protocol::ToolDescriptor;
use crate::sse::SseTransport;
use crate::stdio::StdioTransport;
use crate::transport::McpTransport;

/// One tool discovered on an external server, wrapped with the same
/// contract as the built-ins.  Dispatch is gated by a permission request
/// with `action = "execute"`.
pub struct ExternalTool {
    server: String,
    descriptor: ToolDescriptor,
    qualified_name: String,
    transport: Arc<dyn McpTransport>,
    broker: Arc<PermissionBroker>,
}

#[async_trait]
impl Tool for ExternalTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameters_schema(&self) -> Value {
        self.descriptor.input_schema.clone()
    }

    async fn execute(&self, ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let granted = self
            .broker
            .request(
                &ctx.cancel,
                PermissionRequest {
                    session_id: ctx.session_id.clone(),
                    tool: self.qualified_name.clone(),
                    action: "execute".into(),
                    description: format!("run {} on server {}", self.descriptor.name, self.server),
                    params: call.args.clone(),
                    path: None,
                },
            )
            .await;
        if !granted {
            return ToolOutput::err(&call.id, "permission denied");
        }

        let invoke = self.transport.call_tool(&self.descriptor.name, call.args.clone());
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(anyhow::anyhow!("canceled")),
            r = tokio::time::timeout(ctx.timeout, invoke) => match r {
                Ok(inner) => inner,
                Err(_) => Err(anyhow::anyhow!("timeout after {}s", ctx.timeout.as_secs())),
            },
        };
        match outcome {
            Ok((text, false)) => ToolOutput::ok(&call.id, text),
            Ok((text, true)) => ToolOutput::err(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, format!("external tool error: {e}")),
        }
    }
}

/// Connect to each configured server and wrap every discovered tool.
///
/// Discovery failures are non-fatal: the failing server is logged and
/// skipped, shrinking the tool set; the agent still runs.
pub async fn discover(
    servers: &[McpServerConfig],
    broker: Arc<PermissionBroker>,
) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for server in servers {
        match connect(server).await {
            Ok(transport) => match transport.list_tools().await {
                Ok(descriptors) => {
                    debug!(server = %server.name, count = descriptors.len(), "discovered external tools");
                    for descriptor in descriptors {
                        tools.push(Arc::new(ExternalTool {
                            qualified_name: format!("{}_{}", server.name, descriptor.name),
                            server: server.name.clone(),
                            descriptor,
                            transport: Arc::clone(&transport),
                            broker: Arc::clone(&broker),
                        }));
                    }
                }
                Err(e) => {
                    warn!(server = %server.name, error = %e, "tool listing failed; skipping server")
                }
            },
            Err(e) => {
                warn!(server = %server.name, error = %e, "tool server unreachable; skipping")
            }
        }
    }
    tools
}

async fn connect(server: &McpServerConfig) -> anyhow::Result<Arc<dyn McpTransport>> {
    match &server.transport {
        McpTransportConfig::Stdio { command, args, env } => {
            let t = StdioTransport::spawn(command, args, env).await?;
            Ok(Arc::new(t))
        }
        McpTransportConfig::Sse { url, bearer_token_env } => {
            let token = bearer_token_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok());
            let t = SseTransport::new(url.clone(), token)?;
            Ok(Arc::new(t))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tove_store::EventBus;

    use super::*;

    struct FakeTransport {
        fail: bool,
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
            Ok(vec![])
        }
        async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<(String, bool)> {
            if self.fail {
                anyhow::bail!("server fell over")
            }
            Ok((format!("{name} got {args}"), false))
        }
    }

    fn broker(grant: bool) -> Arc<PermissionBroker> {
        Arc::new(
            PermissionBroker::new(Arc::new(EventBus::new()), vec![]).with_auto_response(grant),
        )
    }

    fn tool(grant: bool, fail: bool) -> ExternalTool {
        ExternalTool {
            server: "corp".into(),
            qualified_name: "corp_lookup".into(),
            descriptor: ToolDescriptor {
                name: "lookup".into(),
                description: "find things".into(),
                input_schema: json!({"type": "object"}),
            },
            transport: Arc::new(FakeTransport { fail }),
            broker: broker(grant),
        }
    }

    fn call() -> ToolCall {
        ToolCall { id: "x1".into(), name: "corp_lookup".into(), args: json!({"q": "rust"}) }
    }

    #[tokio::test]
    async fn name_is_prefixed_with_server() {
        assert_eq!(tool(true, false).name(), "corp_lookup");
    }

    #[tokio::test]
    async fn grant_dispatches_to_transport() {
        let out = tool(true, false).execute(&ToolCtx::test("s"), &call()).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("lookup got"));
    }

    #[tokio::test]
    async fn denial_never_reaches_the_server() {
        let out = tool(false, true).execute(&ToolCtx::test("s"), &call()).await;
        assert!(out.is_error);
        assert_eq!(out.content, "permission denied");
    }

    #[tokio::test]
    async fn transport_failure_is_an_error_result() {
        let out = tool(true, true).execute(&ToolCtx::test("s"), &call()).await;
        assert!(out.is_error);
        assert!(out.content.contains("external tool error"));
    }

    #[tokio::test]
    async fn discovery_skips_unreachable_servers() {
        let servers = vec![McpServerConfig {
            name: "ghost".into(),
            transport: tove_config::McpTransportConfig::Stdio {
                command: "/no/such/binary".into(),
                args: vec![],
                env: Default::default(),
            },
        }];
        let tools = discover(&servers, broker(true)).await;
        assert!(tools.is_empty());
    }
}
