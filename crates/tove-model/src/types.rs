use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One content part of a message.
///
/// A message is an ordered sequence of parts.  Parts are append-only while
/// the owning message is streaming and frozen once it is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        content: String,
    },
    /// Reasoning stream from models that expose it.
    Thinking {
        content: String,
    },
    /// Assistant-emitted tool invocation.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Tool-role reply paired to a `ToolCall` by `call_id`.
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
    /// User-supplied attachment, carried as base64.
    Attachment {
        mime: String,
        data: String,
    },
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text { content: content.into() }
    }

    /// Approximate token count for context management (4 chars ≈ 1 token).
    pub fn approx_tokens(&self) -> usize {
        let chars = match self {
            Part::Text { content } | Part::Thinking { content } => content.len(),
            Part::ToolCall { name, input, .. } => name.len() + input.to_string().len(),
            Part::ToolResult { content, .. } => content.len(),
            // Attachments are sized by their base64 payload; providers bill
            // them very differently, so this stays a rough upper bound.
            Part::Attachment { data, .. } => data.len(),
        };
        (chars / 4).max(1)
    }
}

/// A single message in a conversation as seen by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, parts: vec![Part::text(text)] }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, parts: vec![Part::text(text)] }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, parts: vec![Part::text(text)] }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::ToolResult {
                call_id: call_id.into(),
                content: content.into(),
                is_error,
            }],
        }
    }

    /// Concatenated text content of all `Text` parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All `ToolCall` parts, in order.
    pub fn tool_calls(&self) -> Vec<&Part> {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::ToolCall { .. }))
            .collect()
    }

    pub fn approx_tokens(&self) -> usize {
        self.parts.iter().map(Part::approx_tokens).sum::<usize>().max(1)
    }
}

// ─── Provider request/response ────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System prompt, kept separate from the message list so providers can
    /// place it in their native system slot.
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: Option<u32>,
}

/// Token usage for one turn or accumulated over a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    ToolUse,
    Length,
    Stop,
    Canceled,
}

/// A single streamed event from a provider.
///
/// Ordering guarantees: for each tool-use id, `ToolUseStart` precedes any
/// `ToolUseDelta` for that id; `Complete` arrives after all deltas; at most
/// one `Complete` or one terminal `Error` per stream.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ContentStart,
    ContentDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ToolUseStart {
        id: String,
        name: String,
    },
    ToolUseDelta {
        id: String,
        /// Fragment of the JSON argument object; fragments concatenate into
        /// the full input.
        fragment: String,
    },
    Complete {
        usage: Usage,
        finish_reason: FinishReason,
    },
    Error {
        retryable: bool,
        message: String,
        /// Server-advertised wait before the next attempt, when present.
        retry_after: Option<Duration>,
    },
}

/// Non-streaming completion result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub parts: Vec<Part>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
