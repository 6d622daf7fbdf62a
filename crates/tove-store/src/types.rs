// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tove_model::{Part, Role, Usage};

/// A persisted conversation session.
///
/// Counters always equal the aggregate over owned messages; they are
/// maintained inside the same transaction as the message mutation that
/// changes them.  `parent_id` links summarized child sessions to their
/// parent; `summary_message_id` references a message stored in the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub message_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    pub summary_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted message with its ordered content parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    /// Model identifier for assistant messages.
    pub model: Option<String>,
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on successful completion or terminal error.
    /// Parts are frozen afterwards.
    pub finished_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// Convert to the canonical provider-facing message.
    pub fn to_message(&self) -> tove_model::Message {
        tove_model::Message { role: self.role, parts: self.parts.clone() }
    }
}

/// One immutable snapshot of a file mutated during a session.
///
/// Labels run `"initial", "v1", "v2", …` per (session, path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVersion {
    pub id: String,
    pub session_id: String,
    pub path: String,
    pub content: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

/// Counter deltas applied atomically to a session row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDelta {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost: f64,
}

/// Compute the label that follows `latest` in the version sequence.
pub fn next_version_label(latest: Option<&str>) -> String {
    match latest {
        None => "initial".to_string(),
        Some("initial") => "v1".to_string(),
        Some(v) => {
            let n: u64 = v.trim_start_matches('v').parse().unwrap_or(0);
            format!("v{}", n + 1)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
