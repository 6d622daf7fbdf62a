// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Permission broker: request/approve gating for tool actions.
//!
//! A request blocks until a responder answers through [`PermissionBroker::resolve`]
//! or the caller's cancellation token fires (cancel resolves as denial).
//! Approvals remembered with `remember = true` are cached per session keyed
//! by (tool, action, path-prefix), so identical later requests succeed
//! without prompting.  Pending prompts are published on the store's
//! permission topic for whatever front end is attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use tove_store::{EventBus, PermissionEvent, PermissionPrompt};

/// What a tool wants to do.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub session_id: String,
    pub tool: String,
    pub action: String,
    pub description: String,
    pub params: Value,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GrantKey {
    tool: String,
    action: String,
    path_prefix: String,
}

pub struct PermissionBroker {
    bus: Arc<EventBus>,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    /// session id → remembered grants
    grants: Mutex<HashMap<String, Vec<GrantKey>>>,
    /// Headless mode: answer every prompt immediately with this value
    /// instead of waiting for a responder.
    auto_response: Option<bool>,
    safe_commands: Vec<String>,
}

impl PermissionBroker {
    pub fn new(bus: Arc<EventBus>, safe_commands: Vec<String>) -> Self {
        Self {
            bus,
            pending: Mutex::new(HashMap::new()),
            grants: Mutex::new(HashMap::new()),
            auto_response: None,
            safe_commands,
        }
    }

    /// Answer every prompt with `granted` without publishing it.  Used by
    /// non-interactive runs and tests.
    pub fn with_auto_response(mut self, granted: bool) -> Self {
        self.auto_response = Some(granted);
        self
    }

    /// Block until the request is granted or denied.  Cancellation of
    /// `cancel` while the prompt is pending resolves as denial.
    pub async fn request(&self, cancel: &CancellationToken, req: PermissionRequest) -> bool {
        if self.is_granted(&req) {
            return true;
        }
        if let Some(answer) = self.auto_response {
            if answer {
                self.remember(&req);
            }
            return answer;
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);

        self.bus.permissions.publish(PermissionEvent::Requested(PermissionPrompt {
            id: id.clone(),
            session_id: req.session_id.clone(),
            tool: req.tool.clone(),
            action: req.action.clone(),
            description: req.description.clone(),
            params: req.params.clone(),
            path: req.path.clone(),
        }));

        let granted = tokio::select! {
            _ = cancel.cancelled() => {
                self.pending.lock().unwrap().remove(&id);
                false
            }
            outcome = rx => outcome.unwrap_or(false),
        };
        debug!(tool = %req.tool, action = %req.action, granted, "permission resolved");
        self.bus
            .permissions
            .publish(PermissionEvent::Resolved { id, granted });
        if granted {
            self.remember(&req);
        }
        granted
    }

    /// Answer a pending prompt.  `remember` is honored when granting by the
    /// caching in `request`; denials are never cached.
    pub fn resolve(&self, id: &str, granted: bool) {
        if let Some(tx) = self.pending.lock().unwrap().remove(id) {
            let _ = tx.send(granted);
        }
    }

    /// Forget everything remembered for a session (session teardown).
    pub fn clear_session(&self, session_id: &str) {
        self.grants.lock().unwrap().remove(session_id);
    }

    fn remember(&self, req: &PermissionRequest) {
        let key = GrantKey {
            tool: req.tool.clone(),
            action: req.action.clone(),
            path_prefix: req.path.clone().unwrap_or_default(),
        };
        let mut grants = self.grants.lock().unwrap();
        let list = grants.entry(req.session_id.clone()).or_default();
        if !list.contains(&key) {
            list.push(key);
        }
    }

    fn is_granted(&self, req: &PermissionRequest) -> bool {
        let grants = self.grants.lock().unwrap();
        let Some(list) = grants.get(&req.session_id) else {
            return false;
        };
        let path = req.path.as_deref().unwrap_or("");
        list.iter().any(|g| {
            g.tool == req.tool
                && g.action == req.action
                && (g.path_prefix.is_empty() || path.starts_with(&g.path_prefix))
        })
    }

    /// Whether a shell command line auto-approves: its command name must be
    /// on the allowlist and its arguments must contain no metacharacters
    /// that enable redirection, piping, chaining, or substitution.
    pub fn is_safe_command(&self, command_line: &str) -> bool {
        let trimmed = command_line.trim();
        let Some(first) = trimmed.split_whitespace().next() else {
            return false;
        };
        // Strip a path prefix: "/bin/ls" counts as "ls".
        let name = first.rsplit('/').next().unwrap_or(first);
        if !self.safe_commands.iter().any(|c| c == name) {
            return false;
        }
        !has_shell_metacharacters(trimmed)
    }
}

/// Metacharacters that turn a read-only command into a write or a pipeline:
/// redirection (`>`/`>>`/`<`), pipes, chaining (`;`, `&`, `&&`), and command
/// or process substitution (backticks, `$(`, `<(`).
pub fn has_shell_metacharacters(s: &str) -> bool {
    if s.contains(['>', '|', ';', '&', '`', '<', '\n']) {
        return true;
    }
    s.contains("$(")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
