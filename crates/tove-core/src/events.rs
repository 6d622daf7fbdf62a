// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;
use serde_json::Value;
use tove_model::Usage;

/// Events emitted by a run to its consumer (TUI, CLI printer, tests).
///
/// Exactly one terminal event (`Done`, or `Error` with `fatal = true`)
/// closes the channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A chunk of assistant response text, in producer order.
    Progress { text: String },
    /// A chunk of model reasoning, when the model exposes it.
    Thinking { text: String },
    /// A tool call is about to execute.
    ToolStarted { id: String, name: String, input: Value },
    /// A tool call finished; `result` is what the model will see.
    ToolFinished { id: String, result: String, is_error: bool },
    /// The model ended its turn; cumulative usage for the run so far.
    TurnComplete { usage: Usage },
    /// A continuation user message was synthesized instead of finishing.
    AutoContinue { reason: String },
    /// A run-level failure.  `fatal = false` still terminates the run but
    /// leaves the session usable for the next one.
    Error { fatal: bool, message: String },
    /// Terminal: the run is over.
    Done,
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done | AgentEvent::Error { fatal: true, .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_and_fatal_error_are_terminal() {
        assert!(AgentEvent::Done.is_terminal());
        assert!(AgentEvent::Error { fatal: true, message: "x".into() }.is_terminal());
        assert!(!AgentEvent::Error { fatal: false, message: "x".into() }.is_terminal());
        assert!(!AgentEvent::Progress { text: "x".into() }.is_terminal());
    }

    #[test]
    fn serializes_as_tagged_records() {
        let ev = AgentEvent::ToolFinished {
            id: "t1".into(),
            result: "ok".into(),
            is_error: false,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"tool_finished\""), "{json}");
        assert!(json.contains("\"id\":\"t1\""), "{json}");
    }
}
