// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `agent` tool: spawn a read-only sub-agent for a research task.
//!
//! The sub-agent gets its own message thread (in memory, never persisted)
//! and a restricted tool set — `glob`, `grep`, `ls`, `view` — so it can
//! explore but not mutate.  Its final assistant text is the tool result.
//! Recursion is depth-capped so a sub-agent spawning sub-agents cannot
//! run away.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tove_model::{CompletionRequest, Message, ModelProvider, Part, Role, ToolSchema};
use tove_tools::{
    GlobTool, GrepTool, LsTool, Tool, ToolCall, ToolCtx, ToolOutput, ToolRegistry, ViewTool,
    Workspace,
};

use crate::prompts;

const MAX_DEPTH: usize = 2;
/// Rounds the sub-agent may spend before being cut off with whatever text
/// it produced last.
const MAX_ROUNDS: usize = 8;

pub struct AgentTool {
    provider: Arc<dyn ModelProvider>,
    /// Shared with the parent session so sub-agent views arm the parent's
    /// stale-read gate too.
    workspace: Arc<Workspace>,
    depth: Arc<AtomicUsize>,
}

impl AgentTool {
    pub fn new(provider: Arc<dyn ModelProvider>, workspace: Arc<Workspace>) -> Self {
        Self { provider, workspace, depth: Arc::new(AtomicUsize::new(0)) }
    }

    fn sub_registry(&self) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(GlobTool);
        reg.register(GrepTool);
        reg.register(LsTool);
        reg.register(ViewTool::new(Arc::clone(&self.workspace)));
        reg
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        "agent"
    }

    fn description(&self) -> &str {
        "Spawn a read-only sub-agent to research a question about the codebase.\n\
         The sub-agent can use glob, grep, ls, and view — nothing else — and\n\
         returns a text answer. Use it for open-ended searches that would\n\
         otherwise take many tool calls in the main conversation.\n\
         prompt: the task, phrased with everything the sub-agent needs\n\
         (it cannot see this conversation)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Task for the sub-agent, self-contained"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ToolCtx, call: &ToolCall) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'prompt'"),
        };

        if self.depth.fetch_add(1, Ordering::AcqRel) >= MAX_DEPTH {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return ToolOutput::err(&call.id, "sub-agent recursion limit reached");
        }

        let result = self.run_sub_agent(ctx, &call.id, &prompt).await;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        result
    }
}

impl AgentTool {
    async fn run_sub_agent(&self, ctx: &ToolCtx, call_id: &str, prompt: &str) -> ToolOutput {
        debug!(prompt_len = prompt.len(), "sub-agent started");

        let registry = self.sub_registry();
        let tools: Vec<ToolSchema> = registry
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let mut messages = vec![Message::user(prompt)];
        let mut last_text = String::new();

        for _round in 0..MAX_ROUNDS {
            if ctx.cancel.is_cancelled() {
                return ToolOutput::err(call_id, "canceled");
            }
            let req = CompletionRequest {
                system: Some(prompts::system_prompt(None)),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: None,
            };
            let completion = match self.provider.send(&ctx.cancel, req).await {
                Ok(c) => c,
                Err(e) => return ToolOutput::err(call_id, format!("sub-agent failed: {e}")),
            };

            let text = completion
                .parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { content } => Some(content.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("");
            if !text.is_empty() {
                last_text = text;
            }

            let calls: Vec<ToolCall> = completion
                .parts
                .iter()
                .filter_map(|p| match p {
                    Part::ToolCall { id, name, input } => Some(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: input.clone(),
                    }),
                    _ => None,
                })
                .collect();

            messages.push(Message {
                role: Role::Assistant,
                parts: completion.parts.clone(),
            });

            if calls.is_empty() {
                break;
            }
            for tc in calls {
                let out = registry.execute(ctx, &tc).await;
                messages.push(Message::tool_result(&tc.id, &out.content, out.is_error));
            }
        }

        if last_text.is_empty() {
            ToolOutput::err(call_id, "sub-agent produced no answer")
        } else {
            ToolOutput::ok(call_id, last_text)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
