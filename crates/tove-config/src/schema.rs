// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
#[allow(dead_code)]
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// External tool servers contacted at startup.  A server that fails
    /// discovery is skipped with a warning; it never prevents the agent
    /// from running.
    #[serde(default)]
    pub mcp: Vec<McpServerConfig>,
    /// Named provider configurations.  Reference them by name with
    /// `--model <key>` or `--model <key>/<model>`.
    #[serde(default)]
    pub providers: HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "anthropic" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4-5".into(),
            api_key_env: Some("ANTHROPIC_API_KEY".into()),
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

fn default_compact_threshold() -> f64 {
    0.80
}
fn default_max_todo_continuations() -> u32 {
    10
}
fn default_provider_retries() -> u32 {
    5
}
fn default_max_tool_rounds() -> u32 {
    48
}
fn default_max_length_continuations() -> u32 {
    3
}
fn default_compaction_keep_recent() -> usize {
    8
}

fn default_safe_shell_allowlist() -> Vec<String> {
    [
        "ls", "cat", "pwd", "head", "tail", "grep", "find", "wc", "file", "which", "echo", "date",
        "env", "whoami", "id",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Fraction of the model context window at which the session is
    /// summarized into a child session before the next turn.
    #[serde(default = "default_compact_threshold")]
    pub auto_compact_threshold: f64,

    /// When set, an `end_turn` with incomplete todos synthesizes a
    /// continuation user message instead of finishing the run.
    #[serde(default)]
    pub auto_continue_todos: bool,

    /// Upper bound on synthesized continuations per user message.  Must be
    /// at least 1; the counter resets on every externally supplied message.
    #[serde(default = "default_max_todo_continuations")]
    pub max_todo_continuations: u32,

    /// Maximum provider retries on retryable stream errors.
    #[serde(default = "default_provider_retries")]
    pub provider_retries: u32,

    /// Per-tool execution timeouts in seconds.  Tools not listed use the
    /// built-in defaults (bash 60, fetch 30, others 30).  The bash value is
    /// capped at 600 regardless of what the user configures.
    #[serde(default)]
    pub tool_timeouts: HashMap<String, u64>,

    /// Shell commands auto-approved without prompting, provided their
    /// arguments contain no redirection, piping, chaining, or substitution.
    #[serde(default = "default_safe_shell_allowlist")]
    pub safe_shell_allowlist: Vec<String>,

    /// Hard ceiling on model↔tool rounds within a single run.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// How many "continue" turns to request when the model stops with a
    /// length finish reason before giving up with a truncation notice.
    #[serde(default = "default_max_length_continuations")]
    pub max_length_continuations: u32,

    /// Number of recent non-summary messages preserved verbatim when a
    /// session is summarized into a child.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,

    /// Optional system prompt override.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_compact_threshold: default_compact_threshold(),
            auto_continue_todos: false,
            max_todo_continuations: default_max_todo_continuations(),
            provider_retries: default_provider_retries(),
            tool_timeouts: HashMap::new(),
            safe_shell_allowlist: default_safe_shell_allowlist(),
            max_tool_rounds: default_max_tool_rounds(),
            max_length_continuations: default_max_length_continuations(),
            compaction_keep_recent: default_compaction_keep_recent(),
            system_prompt: None,
        }
    }
}

/// Hard cap on the bash timeout — user overrides never exceed this.
pub const BASH_TIMEOUT_CAP_SECS: u64 = 600;

impl AgentConfig {
    /// Reject configurations that would make the loop misbehave rather than
    /// silently clamping them.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.1..=1.0).contains(&self.auto_compact_threshold) {
            anyhow::bail!(
                "agent.auto_compact_threshold must be within 0.1..=1.0, got {}",
                self.auto_compact_threshold
            );
        }
        if self.max_todo_continuations < 1 {
            anyhow::bail!("agent.max_todo_continuations must be >= 1");
        }
        Ok(())
    }

    /// Effective timeout for a tool, applying the built-in defaults and the
    /// bash cap.
    pub fn tool_timeout(&self, tool: &str) -> Duration {
        let default_secs = match tool {
            "bash" => 60,
            _ => 30,
        };
        let mut secs = self.tool_timeouts.get(tool).copied().unwrap_or(default_secs);
        if tool == "bash" {
            secs = secs.min(BASH_TIMEOUT_CAP_SECS);
        }
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database location.  Defaults to `~/.local/share/tove/tove.db`;
    /// `:memory:` gives an ephemeral store.
    pub path: Option<String>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> String {
        match &self.path {
            Some(p) => shellexpand::tilde(p).into_owned(),
            None => dirs::data_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("tove/tove.db")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

/// One external tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Name used to prefix discovered tool names (`<name>_<tool>`).
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum McpTransportConfig {
    /// Line-delimited JSON-RPC over a child process's stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Server-sent events over HTTPS with a bearer header.
    Sse {
        url: String,
        /// Environment variable holding the bearer token.
        bearer_token_env: Option<String>,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
