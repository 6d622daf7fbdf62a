// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent loop: one user request driven to completion.
//!
//! `Run` appends the user message, then cycles
//! `provider stream → tool calls → tool results → next turn` until the
//! model ends its turn (or a budget trips).  Tool calls within a turn run
//! in parallel — writers serialized per path, bash serialized by its
//! session — and their results are persisted in call order.  Context
//! overflow summarizes the session into a child and the run continues
//! there.  Cancellation is cooperative: the partial assistant message is
//! finalized and the run closes with `Done`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tove_config::{AgentConfig, BASH_TIMEOUT_CAP_SECS};
use tove_model::{
    CompletionRequest, FinishReason, ModelProvider, Part, ProviderEvent, RetryPolicy, Role,
    ToolSchema, Usage,
};
use tove_store::{CounterDelta, MessageRecord, Store, StoreError};
use tove_tools::{
    BashTool, DiagnosticsSource, DiagnosticsTool, EditTool, FetchTool, GlobTool, GrepTool, LsTool,
    NullDiagnostics, PatchTool, PermissionBroker, TodoReadTool, TodoWriteTool, Tool, ToolCall,
    ToolCtx, ToolOutput, ToolRegistry, ViewTool, WriteTool,
};

use crate::context::ContextManager;
use crate::continuation;
use crate::events::AgentEvent;
use crate::prompts;
use crate::runtime::{RuntimeRegistry, SessionRuntime};
use crate::summarize;
use crate::task_tool::AgentTool;

use futures::StreamExt;

/// Event channel capacity per run.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A run is already active on this session.
    #[error("session busy: {0}")]
    Busy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a run ended, before translation into terminal events.
enum RunEnd {
    Done,
    NonFatal(String),
    Fatal(String),
}

/// Outcome of streaming one provider turn.
enum TurnOutcome {
    Finished {
        finish: FinishReason,
        assistant: MessageRecord,
        calls: Vec<ToolCall>,
        usage: Usage,
    },
    /// Cancellation observed; `had_output` is true when at least one
    /// assistant token had been streamed in this run.
    Canceled { had_output: bool },
    Fatal(String),
    Transient(String),
}

#[derive(Clone)]
pub struct Agent {
    store: Arc<Store>,
    provider: Arc<dyn ModelProvider>,
    config: Arc<AgentConfig>,
    broker: Arc<PermissionBroker>,
    runtimes: Arc<RuntimeRegistry>,
    context: Arc<ContextManager>,
    diagnostics: Arc<dyn DiagnosticsSource>,
    external_tools: Vec<Arc<dyn Tool>>,
}

impl Agent {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn ModelProvider>,
        config: Arc<AgentConfig>,
        broker: Arc<PermissionBroker>,
    ) -> Self {
        let context = Arc::new(ContextManager::new(
            Arc::clone(&store),
            config.auto_compact_threshold,
        ));
        Self {
            store,
            provider,
            config,
            broker,
            runtimes: Arc::new(RuntimeRegistry::new()),
            context,
            diagnostics: Arc::new(NullDiagnostics),
            external_tools: Vec::new(),
        }
    }

    /// Attach a diagnostics source (language-server collaborator).
    pub fn with_diagnostics(mut self, source: Arc<dyn DiagnosticsSource>) -> Self {
        self.diagnostics = source;
        self
    }

    /// Attach externally-hosted tools discovered at startup.
    pub fn with_external_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.external_tools = tools;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn runtimes(&self) -> &Arc<RuntimeRegistry> {
        &self.runtimes
    }

    /// Start a run on a session.  Returns the event stream; exactly one
    /// terminal event closes it.  A concurrent run on the same session is
    /// rejected with [`RunError::Busy`].
    pub async fn run(
        &self,
        cancel: CancellationToken,
        session_id: &str,
        user_text: &str,
        attachments: Vec<Part>,
    ) -> Result<mpsc::Receiver<AgentEvent>, RunError> {
        self.store.get_session(session_id).await?;
        let runtime = self.runtimes.get_or_create(session_id);
        if !runtime.try_begin_run() {
            return Err(RunError::Busy(session_id.to_string()));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let agent = self.clone();
        let sid = session_id.to_string();
        let text = user_text.to_string();
        tokio::spawn(async move {
            let end = agent.drive(&cancel, &sid, &text, attachments, &tx).await;
            match end {
                RunEnd::Done => {
                    let _ = tx.send(AgentEvent::Done).await;
                }
                RunEnd::NonFatal(message) => {
                    let _ = tx.send(AgentEvent::Error { fatal: false, message }).await;
                    let _ = tx.send(AgentEvent::Done).await;
                }
                RunEnd::Fatal(message) => {
                    let _ = tx.send(AgentEvent::Error { fatal: true, message }).await;
                }
            }
            agent.runtimes.get_or_create(&sid).end_run();
        });
        Ok(rx)
    }

    // ── The loop ─────────────────────────────────────────────────────────────

    async fn drive(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        user_text: &str,
        attachments: Vec<Part>,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> RunEnd {
        // An externally supplied user message resets the continuation
        // budget.
        let mut runtime = self.runtimes.get_or_create(session_id);
        runtime.reset_continuations();

        let mut parts = vec![Part::text(user_text)];
        parts.extend(attachments);
        if let Err(e) = self
            .store
            .append_message(session_id, Role::User, parts, None)
            .await
        {
            return RunEnd::Fatal(format!("persisting user message failed: {e}"));
        }

        let mut session_id = session_id.to_string();
        let mut registry = self.build_registry(&runtime);
        let mut run_usage = Usage::default();
        let mut had_output = false;
        let mut rounds = 0u32;
        let mut length_continuations = 0u32;

        loop {
            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                let _ = tx
                    .send(AgentEvent::Progress {
                        text: format!(
                            "[stopped: tool-round budget of {} exhausted]",
                            self.config.max_tool_rounds
                        ),
                    })
                    .await;
                let _ = tx.send(AgentEvent::TurnComplete { usage: run_usage }).await;
                return RunEnd::Done;
            }

            // Summarize into a child session when the window is nearly
            // full; the run continues there.  Summarizer output is silent.
            match self
                .context
                .should_compact(&session_id, self.provider.spec())
                .await
            {
                Ok(true) => {
                    match summarize::summarize_into_child(
                        &self.store,
                        &self.provider,
                        &self.runtimes,
                        cancel,
                        &session_id,
                        self.config.compaction_keep_recent,
                    )
                    .await
                    {
                        Ok(child_id) => {
                            session_id = child_id;
                            runtime = self.runtimes.get_or_create(&session_id);
                            registry = self.build_registry(&runtime);
                        }
                        Err(e) => {
                            // The next provider call may still fit; degrade
                            // rather than abort.
                            warn!(error = %e, "summarization failed; continuing uncompacted");
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => return RunEnd::Fatal(format!("session lookup failed: {e}")),
            }

            let outcome = self
                .stream_turn(cancel, &session_id, &registry, &mut had_output, tx)
                .await;

            let (finish, assistant, calls, usage) = match outcome {
                TurnOutcome::Finished { finish, assistant, calls, usage } => {
                    (finish, assistant, calls, usage)
                }
                TurnOutcome::Canceled { had_output } => {
                    // Interactive cancel is cooperative once the model has
                    // started answering; before that it aborts the run.
                    return if had_output {
                        RunEnd::Done
                    } else {
                        RunEnd::Fatal("canceled before the first response".into())
                    };
                }
                TurnOutcome::Fatal(m) => return RunEnd::Fatal(m),
                TurnOutcome::Transient(m) => return RunEnd::NonFatal(m),
            };

            run_usage.add(usage);

            match finish {
                FinishReason::ToolUse => {
                    if let Err(end) = self
                        .dispatch_tools(cancel, &session_id, &runtime, &registry, &assistant, calls, tx)
                        .await
                    {
                        return end;
                    }
                }
                FinishReason::EndTurn => {
                    if let Some(reason) = self.auto_continue(&runtime, &session_id, tx).await {
                        match reason {
                            AutoContinueOutcome::Continued => continue,
                            AutoContinueOutcome::BudgetExhausted => {
                                let _ = tx
                                    .send(AgentEvent::Progress {
                                        text: format!(
                                            "[auto-continue stopped: {} continuations used]",
                                            self.config.max_todo_continuations
                                        ),
                                    })
                                    .await;
                            }
                            AutoContinueOutcome::StoreFailed(m) => return RunEnd::Fatal(m),
                        }
                    }
                    let _ = tx.send(AgentEvent::TurnComplete { usage: run_usage }).await;
                    return RunEnd::Done;
                }
                FinishReason::Length => {
                    if length_continuations < self.config.max_length_continuations {
                        length_continuations += 1;
                        if let Err(e) = self
                            .store
                            .append_message(
                                &session_id,
                                Role::User,
                                vec![Part::text(prompts::CONTINUE_AFTER_LENGTH)],
                                None,
                            )
                            .await
                        {
                            return RunEnd::Fatal(format!("persisting continue message failed: {e}"));
                        }
                    } else {
                        let _ = tx
                            .send(AgentEvent::Progress {
                                text: prompts::TRUNCATION_NOTICE.to_string(),
                            })
                            .await;
                        let _ = tx.send(AgentEvent::TurnComplete { usage: run_usage }).await;
                        return RunEnd::Done;
                    }
                }
                FinishReason::Stop | FinishReason::Canceled => {
                    let _ = tx.send(AgentEvent::TurnComplete { usage: run_usage }).await;
                    return RunEnd::Done;
                }
            }
        }
    }

    // ── One provider turn ────────────────────────────────────────────────────

    async fn stream_turn(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        registry: &Arc<ToolRegistry>,
        had_output: &mut bool,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> TurnOutcome {
        let spec = self.provider.spec().clone();
        let messages = match self.context.build_prompt(session_id, &spec).await {
            Ok(m) => m,
            Err(e) => return TurnOutcome::Fatal(format!("prompt assembly failed: {e}")),
        };
        let tools: Vec<ToolSchema> = registry
            .schemas()
            .into_iter()
            .map(|s| ToolSchema { name: s.name, description: s.description, parameters: s.parameters })
            .collect();
        let req = CompletionRequest {
            system: Some(prompts::system_prompt(self.config.system_prompt.as_deref())),
            messages,
            tools,
            max_tokens: None,
        };

        let policy = RetryPolicy::default().with_max_retries(self.config.provider_retries);
        let mut attempt = 0u32;

        'retry: loop {
            if cancel.is_cancelled() {
                return TurnOutcome::Canceled { had_output: *had_output };
            }

            let mut stream = match self.provider.stream(cancel, req.clone()).await {
                Ok(s) => s,
                Err(e) => {
                    // Establishment failures are connection-level; retry on
                    // the same schedule as retryable stream errors.
                    attempt += 1;
                    match policy.delay_for(attempt, None, seed_from(session_id)) {
                        Some(delay) if !cancel.is_cancelled() => {
                            warn!(attempt, error = %e, "provider connect failed; backing off");
                            if sleep_cancellable(delay, cancel).await {
                                return TurnOutcome::Canceled { had_output: *had_output };
                            }
                            continue 'retry;
                        }
                        _ => return TurnOutcome::Transient(format!("provider unreachable: {e}")),
                    }
                }
            };

            let mut parts: Vec<Part> = Vec::new();
            let mut pending: Vec<PendingCall> = Vec::new();
            let mut usage = Usage::default();
            let mut delta_seen = false;

            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        // Finalize whatever streamed before the cancel.
                        if !parts.is_empty() || !pending.is_empty() {
                            flush_pending(&mut parts, std::mem::take(&mut pending));
                            let _ = self.persist_assistant(session_id, parts, usage, &spec.id).await;
                        }
                        return TurnOutcome::Canceled { had_output: *had_output };
                    }
                    ev = stream.next() => ev,
                };

                match event {
                    Some(ProviderEvent::ContentStart) => {}
                    Some(ProviderEvent::ContentDelta { text }) => {
                        delta_seen = true;
                        *had_output = true;
                        push_text(&mut parts, &text);
                        let _ = tx.send(AgentEvent::Progress { text }).await;
                    }
                    Some(ProviderEvent::ThinkingDelta { text }) => {
                        delta_seen = true;
                        push_thinking(&mut parts, &text);
                        let _ = tx.send(AgentEvent::Thinking { text }).await;
                    }
                    Some(ProviderEvent::ToolUseStart { id, name }) => {
                        delta_seen = true;
                        *had_output = true;
                        pending.push(PendingCall { id, name, args_buf: String::new() });
                    }
                    Some(ProviderEvent::ToolUseDelta { id, fragment }) => {
                        if let Some(p) = pending.iter_mut().find(|p| p.id == id) {
                            p.args_buf.push_str(&fragment);
                        }
                    }
                    Some(ProviderEvent::Complete { usage: u, finish_reason }) => {
                        usage = u;
                        let calls = flush_pending(&mut parts, std::mem::take(&mut pending));
                        let assistant = match self
                            .persist_assistant(session_id, parts, usage, &spec.id)
                            .await
                        {
                            Ok(rec) => rec,
                            Err(e) => {
                                return TurnOutcome::Fatal(format!(
                                    "persisting assistant message failed: {e}"
                                ))
                            }
                        };
                        let cost = self.context.turn_cost(&spec, usage);
                        if let Err(e) = self
                            .store
                            .update_session_counters(
                                session_id,
                                CounterDelta {
                                    prompt_tokens: usage.prompt_tokens as i64,
                                    completion_tokens: usage.completion_tokens as i64,
                                    cost,
                                },
                            )
                            .await
                        {
                            return TurnOutcome::Fatal(format!("counter update failed: {e}"));
                        }
                        return TurnOutcome::Finished { finish: finish_reason, assistant, calls, usage };
                    }
                    Some(ProviderEvent::Error { retryable, message, retry_after }) => {
                        // Retryability is the adapter's verdict; the loop
                        // never re-derives it.  A retry restarts the whole
                        // turn, so it only happens before any delta.
                        if retryable && !delta_seen {
                            attempt += 1;
                            if let Some(delay) =
                                policy.delay_for(attempt, retry_after, seed_from(session_id))
                            {
                                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying provider stream");
                                if sleep_cancellable(delay, cancel).await {
                                    return TurnOutcome::Canceled { had_output: *had_output };
                                }
                                continue 'retry;
                            }
                            return TurnOutcome::Transient(format!(
                                "provider failed after {attempt} attempts: {message}"
                            ));
                        }
                        if is_auth_error(&message) {
                            return TurnOutcome::Fatal(format!("provider auth error: {message}"));
                        }
                        return TurnOutcome::Transient(format!("provider error: {message}"));
                    }
                    None => {
                        // Stream ended without Complete; treat as a clean
                        // end of turn so the partial output is not lost.
                        let calls = flush_pending(&mut parts, std::mem::take(&mut pending));
                        let assistant = match self
                            .persist_assistant(session_id, parts, usage, &spec.id)
                            .await
                        {
                            Ok(rec) => rec,
                            Err(e) => {
                                return TurnOutcome::Fatal(format!(
                                    "persisting assistant message failed: {e}"
                                ))
                            }
                        };
                        let finish = if calls.is_empty() {
                            FinishReason::EndTurn
                        } else {
                            FinishReason::ToolUse
                        };
                        return TurnOutcome::Finished { finish, assistant, calls, usage };
                    }
                }
            }
        }
    }

    /// Append the assistant message and finalize it in one go: parts are
    /// frozen from here on.
    async fn persist_assistant(
        &self,
        session_id: &str,
        parts: Vec<Part>,
        usage: Usage,
        model_id: &str,
    ) -> Result<MessageRecord, StoreError> {
        let rec = self
            .store
            .append_message(session_id, Role::Assistant, parts.clone(), Some(model_id.to_string()))
            .await?;
        self.store
            .update_message(&rec.id, parts, usage, Some(Utc::now()))
            .await
    }

    // ── Tool dispatch ────────────────────────────────────────────────────────

    /// Execute a turn's tool calls in parallel and persist one tool-role
    /// message per call, in call order.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_tools(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        runtime: &Arc<SessionRuntime>,
        registry: &Arc<ToolRegistry>,
        assistant: &MessageRecord,
        calls: Vec<ToolCall>,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), RunEnd> {
        let mut handles = Vec::with_capacity(calls.len());
        for call in &calls {
            let _ = tx
                .send(AgentEvent::ToolStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.args.clone(),
                })
                .await;

            // Mutations of the same path are serialized; bash serializes on
            // its own session mutex; read-only tools run fully concurrent.
            let lock = if matches!(call.name.as_str(), "edit" | "write" | "patch") {
                call.args
                    .get("path")
                    .and_then(|v| v.as_str())
                    .map(|p| runtime.path_lock(p))
            } else {
                None
            };
            let timeout = self.effective_timeout(call);
            let ctx = ToolCtx {
                session_id: session_id.to_string(),
                message_id: assistant.id.clone(),
                cancel: cancel.child_token(),
                timeout,
            };
            let registry = Arc::clone(registry);
            let call = call.clone();
            handles.push(tokio::spawn(async move {
                let _guard = match lock {
                    Some(l) => Some(l.lock_owned().await),
                    None => None,
                };
                registry.execute(&ctx, &call).await
            }));
        }

        // Await in call order so results persist in the order the calls
        // appeared in the assistant message, regardless of completion order.
        for (call, handle) in calls.iter().zip(handles) {
            let grace = self.effective_timeout(call) + Duration::from_secs(2);
            let output = tokio::select! {
                _ = cancel.cancelled() => ToolOutput::err(&call.id, "canceled"),
                joined = tokio::time::timeout(grace, handle) => match joined {
                    Err(_) => ToolOutput::err(&call.id, format!("timeout after {}s", grace.as_secs())),
                    Ok(Err(e)) => {
                        warn!(tool = %call.name, error = %e, "tool task panicked");
                        ToolOutput::err(&call.id, format!("tool panicked: {e}"))
                    }
                    Ok(Ok(out)) => out,
                },
            };

            self.drain_tool_events(runtime).await;

            if let Err(e) = self
                .store
                .append_message(
                    session_id,
                    Role::Tool,
                    vec![Part::ToolResult {
                        call_id: call.id.clone(),
                        content: output.content.clone(),
                        is_error: output.is_error,
                    }],
                    None,
                )
                .await
            {
                return Err(RunEnd::Fatal(format!("persisting tool result failed: {e}")));
            }
            let _ = tx
                .send(AgentEvent::ToolFinished {
                    id: call.id.clone(),
                    result: output.content,
                    is_error: output.is_error,
                })
                .await;
        }
        Ok(())
    }

    /// Effective timeout for one call: bash honors a per-call override
    /// capped at 600 s; everything else takes the configured default.
    fn effective_timeout(&self, call: &ToolCall) -> Duration {
        if call.name == "bash" {
            let base = call
                .args
                .get("timeout_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or_else(|| self.config.tool_timeout("bash").as_secs());
            Duration::from_secs(base.min(BASH_TIMEOUT_CAP_SECS))
        } else {
            self.config.tool_timeout(&call.name)
        }
    }

    /// Discard queued tool events; the state they announce already lives in
    /// the runtime.  Draining keeps the bounded channel from filling.
    async fn drain_tool_events(&self, runtime: &Arc<SessionRuntime>) {
        let mut rx = runtime.tool_event_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    // ── Auto-continuation ────────────────────────────────────────────────────

    async fn auto_continue(
        &self,
        runtime: &Arc<SessionRuntime>,
        session_id: &str,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Option<AutoContinueOutcome> {
        if !self.config.auto_continue_todos {
            return None;
        }
        let todos = runtime.todos.lock().await.clone();
        let message = continuation::continuation_message(&todos)?;

        if runtime.continuations() >= self.config.max_todo_continuations {
            return Some(AutoContinueOutcome::BudgetExhausted);
        }
        runtime.increment_continuations();

        if let Err(e) = self
            .store
            .append_message(session_id, Role::User, vec![Part::text(&message)], None)
            .await
        {
            return Some(AutoContinueOutcome::StoreFailed(format!(
                "persisting continuation failed: {e}"
            )));
        }
        let _ = tx.send(AgentEvent::AutoContinue { reason: message }).await;
        Some(AutoContinueOutcome::Continued)
    }

    // ── Per-session tool registry ────────────────────────────────────────────

    fn build_registry(&self, runtime: &Arc<SessionRuntime>) -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(BashTool::new(
            Arc::clone(&runtime.shell),
            Arc::clone(&self.broker),
        ));
        reg.register(ViewTool::new(Arc::clone(&runtime.workspace)));
        reg.register(EditTool::new(
            Arc::clone(&runtime.workspace),
            Arc::clone(&self.store),
            Arc::clone(&self.broker),
        ));
        reg.register(WriteTool::new(
            Arc::clone(&runtime.workspace),
            Arc::clone(&self.store),
            Arc::clone(&self.broker),
        ));
        reg.register(PatchTool::new(
            Arc::clone(&runtime.workspace),
            Arc::clone(&self.store),
            Arc::clone(&self.broker),
        ));
        reg.register(GrepTool);
        reg.register(GlobTool);
        reg.register(LsTool);
        reg.register(FetchTool::new(Arc::clone(&self.broker)));
        reg.register(DiagnosticsTool::new(Arc::clone(&self.diagnostics)));
        reg.register(TodoReadTool::new(Arc::clone(&runtime.todos)));
        reg.register(TodoWriteTool::new(
            Arc::clone(&runtime.todos),
            runtime.tool_event_tx.clone(),
        ));
        reg.register(AgentTool::new(
            Arc::clone(&self.provider),
            Arc::clone(&runtime.workspace),
        ));
        for tool in &self.external_tools {
            reg.register_arc(Arc::clone(tool));
        }
        Arc::new(reg)
    }
}

enum AutoContinueOutcome {
    Continued,
    BudgetExhausted,
    StoreFailed(String),
}

// ── Stream assembly helpers ───────────────────────────────────────────────────

struct PendingCall {
    id: String,
    name: String,
    args_buf: String,
}

fn push_text(parts: &mut Vec<Part>, delta: &str) {
    match parts.last_mut() {
        Some(Part::Text { content }) => content.push_str(delta),
        _ => parts.push(Part::Text { content: delta.to_string() }),
    }
}

fn push_thinking(parts: &mut Vec<Part>, delta: &str) {
    match parts.last_mut() {
        Some(Part::Thinking { content }) => content.push_str(delta),
        _ => parts.push(Part::Thinking { content: delta.to_string() }),
    }
}

/// Convert accumulated pending calls into `ToolCall` parts (appended to
/// `parts`) and dispatchable [`ToolCall`]s.  Calls with an empty name are
/// dropped — they cannot be dispatched and would corrupt the history sent
/// back to the provider.  Invalid JSON arguments degrade to `{}` so the
/// tool can reject them with a useful message.
fn flush_pending(parts: &mut Vec<Part>, pending: Vec<PendingCall>) -> Vec<ToolCall> {
    let mut calls = Vec::with_capacity(pending.len());
    for (i, p) in pending.into_iter().enumerate() {
        if p.name.is_empty() {
            warn!(call_id = %p.id, "dropping tool call with empty name");
            continue;
        }
        let id = if p.id.is_empty() {
            warn!(tool = %p.name, "tool call with empty id; generating synthetic id");
            format!("call_synthetic_{i}")
        } else {
            p.id
        };
        let args = if p.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&p.args_buf).unwrap_or_else(|e| {
                warn!(tool = %p.name, error = %e, "invalid tool-call JSON; substituting {{}}");
                serde_json::Value::Object(Default::default())
            })
        };
        parts.push(Part::ToolCall { id: id.clone(), name: p.name.clone(), input: args.clone() });
        calls.push(ToolCall { id, name: p.name, args });
    }
    calls
}

/// Sleep that aborts on cancellation; returns `true` when canceled.
async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

fn is_auth_error(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("auth") || m.contains("401") || m.contains("403") || m.contains("api key")
}

/// Stable per-session jitter seed.
fn seed_from(session_id: &str) -> u64 {
    session_id.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
