// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! SQLite persistence for sessions, messages, and file versions.
//!
//! `rusqlite::Connection` is neither `Send` nor `Sync`, so the connection
//! lives behind `Arc<Mutex<..>>` and every operation runs on the blocking
//! pool via `spawn_blocking`.  Writes are serialized by the mutex; all
//! multi-statement mutations run inside a transaction so the session
//! counters never drift from the owned messages.  Every successful mutation
//! publishes the corresponding event on the bus after commit.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task::spawn_blocking;
use tracing::{debug, warn};
use uuid::Uuid;

use tove_model::{Part, Role, Usage};

use crate::bus::{EventBus, FileEvent, MessageEvent, SessionEvent};
use crate::error::{Result, StoreError};
use crate::types::{next_version_label, CounterDelta, FileVersion, MessageRecord, Session};

/// Attempts to re-derive a file-version label after a uniqueness collision
/// before surfacing `Conflict`.
const VERSION_RETRIES: usize = 3;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id                 TEXT PRIMARY KEY,
    parent_id          TEXT,
    title              TEXT NOT NULL,
    message_count      INTEGER NOT NULL DEFAULT 0,
    prompt_tokens      INTEGER NOT NULL DEFAULT 0,
    completion_tokens  INTEGER NOT NULL DEFAULT 0,
    cost               REAL NOT NULL DEFAULT 0,
    summary_message_id TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id                 TEXT PRIMARY KEY,
    session_id         TEXT NOT NULL REFERENCES sessions(id),
    role               TEXT NOT NULL,
    parts              TEXT NOT NULL,
    model              TEXT,
    prompt_tokens      INTEGER NOT NULL DEFAULT 0,
    completion_tokens  INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    finished_at        TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_session
    ON messages(session_id, created_at);

CREATE TABLE IF NOT EXISTS files (
    id         TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    path       TEXT NOT NULL,
    content    TEXT NOT NULL,
    version    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(session_id, path, version)
);
"#;

pub struct Store {
    conn: Arc<Mutex<Connection>>,
    bus: Arc<EventBus>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Ephemeral store for tests and `--store :memory:`.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), bus: Arc::new(EventBus::new()) })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Run `f` with the connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| {
                warn!("store mutex poisoned, recovering");
                poisoned.into_inner()
            });
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    pub async fn create_session(
        &self,
        parent_id: Option<String>,
        title: impl Into<String>,
    ) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            parent_id,
            title: title.into(),
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: 0.0,
            summary_message_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let row = session.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, parent_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.id,
                    row.parent_id,
                    row.title,
                    row.created_at.to_rfc3339(),
                    row.updated_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?;
        debug!(session = %session.id, "session created");
        self.bus.sessions.publish(SessionEvent::Created(session.clone()));
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![id.clone()], |r| {
                row_to_session(r)
            })
            .optional()?
            .ok_or(StoreError::NotFound { kind: "session", id })
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY created_at DESC")?;
            let rows = stmt
                .query_map([], row_to_session)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Apply token/cost deltas to a session row.
    pub async fn update_session_counters(&self, id: &str, delta: CounterDelta) -> Result<Session> {
        let sid = id.to_string();
        let session = self
            .call(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE sessions SET
                        prompt_tokens = prompt_tokens + ?2,
                        completion_tokens = completion_tokens + ?3,
                        cost = cost + ?4,
                        updated_at = ?5
                     WHERE id = ?1",
                    params![
                        sid,
                        delta.prompt_tokens,
                        delta.completion_tokens,
                        delta.cost,
                        Utc::now().to_rfc3339()
                    ],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound { kind: "session", id: sid });
                }
                let session =
                    tx.query_row("SELECT * FROM sessions WHERE id = ?1", params![sid], row_to_session)?;
                tx.commit()?;
                Ok(session)
            })
            .await?;
        self.bus.sessions.publish(SessionEvent::Updated(session.clone()));
        Ok(session)
    }

    /// Record the summary message (persisted in the parent) on a child
    /// session created by summarization.
    pub async fn set_summary(&self, session_id: &str, message_id: &str) -> Result<Session> {
        let sid = session_id.to_string();
        let mid = message_id.to_string();
        let session = self
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE sessions SET summary_message_id = ?2, updated_at = ?3 WHERE id = ?1",
                    params![sid, mid, Utc::now().to_rfc3339()],
                )?;
                if changed == 0 {
                    return Err(StoreError::NotFound { kind: "session", id: sid });
                }
                conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![sid], row_to_session)
                    .map_err(Into::into)
            })
            .await?;
        self.bus.sessions.publish(SessionEvent::Updated(session.clone()));
        Ok(session)
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Insert a message and bump the owning session's message count in one
    /// transaction.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        parts: Vec<Part>,
        model: Option<String>,
    ) -> Result<MessageRecord> {
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            parts,
            model,
            usage: Usage::default(),
            created_at: Utc::now(),
            finished_at: None,
        };
        let row = record.clone();
        self.call(move |conn| {
            let parts_json = serde_json::to_string(&row.parts)?;
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE sessions SET message_count = message_count + 1, updated_at = ?2
                 WHERE id = ?1",
                params![row.session_id, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound { kind: "session", id: row.session_id });
            }
            tx.execute(
                "INSERT INTO messages (id, session_id, role, parts, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id,
                    row.session_id,
                    row.role.as_str(),
                    parts_json,
                    row.model,
                    row.created_at.to_rfc3339()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        self.bus.messages.publish(MessageEvent::Created(record.clone()));
        Ok(record)
    }

    pub async fn get_message(&self, id: &str) -> Result<MessageRecord> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT * FROM messages WHERE id = ?1", params![id.clone()], |r| {
                row_to_message(r)
            })
            .optional()?
            .ok_or(StoreError::NotFound { kind: "message", id })
        })
        .await
    }

    /// Replace a streaming message's parts/usage and optionally finalize it.
    ///
    /// A message whose `finished_at` is already set is frozen; further
    /// updates are a `Conflict`.
    pub async fn update_message(
        &self,
        id: &str,
        parts: Vec<Part>,
        usage: Usage,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<MessageRecord> {
        let mid = id.to_string();
        let record = self
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<Option<String>> = tx
                    .query_row(
                        "SELECT finished_at FROM messages WHERE id = ?1",
                        params![mid],
                        |r| r.get(0),
                    )
                    .optional()?;
                match existing {
                    None => {
                        return Err(StoreError::NotFound { kind: "message", id: mid })
                    }
                    Some(Some(_)) => {
                        return Err(StoreError::Conflict(format!(
                            "message {mid} is finalized; parts are frozen"
                        )))
                    }
                    Some(None) => {}
                }
                let parts_json = serde_json::to_string(&parts)?;
                tx.execute(
                    "UPDATE messages SET parts = ?2, prompt_tokens = ?3,
                        completion_tokens = ?4, finished_at = ?5
                     WHERE id = ?1",
                    params![
                        mid,
                        parts_json,
                        usage.prompt_tokens as i64,
                        usage.completion_tokens as i64,
                        finished_at.map(|t| t.to_rfc3339())
                    ],
                )?;
                let record =
                    tx.query_row("SELECT * FROM messages WHERE id = ?1", params![mid], row_to_message)?;
                tx.commit()?;
                Ok(record)
            })
            .await?;
        self.bus.messages.publish(MessageEvent::Updated(record.clone()));
        Ok(record)
    }

    /// All messages of a session in append order.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let sid = session_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE session_id = ?1 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map(params![sid], row_to_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // ── File versions ────────────────────────────────────────────────────────

    /// Snapshot a file mutation.  On a label collision (two writers racing
    /// on the same path) the next label is recomputed and the insert
    /// retried; `Conflict` surfaces only when all retries fail.
    pub async fn create_file_version(
        &self,
        session_id: &str,
        path: &str,
        content: &str,
    ) -> Result<FileVersion> {
        let sid = session_id.to_string();
        let fpath = path.to_string();
        let body = content.to_string();
        let version = self
            .call(move |conn| {
                for _attempt in 0..VERSION_RETRIES {
                    let latest: Option<String> = conn
                        .query_row(
                            "SELECT version FROM files
                             WHERE session_id = ?1 AND path = ?2
                             ORDER BY rowid DESC LIMIT 1",
                            params![sid, fpath],
                            |r| r.get(0),
                        )
                        .optional()?;
                    let label = next_version_label(latest.as_deref());
                    let fv = FileVersion {
                        id: Uuid::new_v4().to_string(),
                        session_id: sid.clone(),
                        path: fpath.clone(),
                        content: body.clone(),
                        version: label,
                        created_at: Utc::now(),
                    };
                    let inserted = conn.execute(
                        "INSERT INTO files (id, session_id, path, content, version, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            fv.id,
                            fv.session_id,
                            fv.path,
                            fv.content,
                            fv.version,
                            fv.created_at.to_rfc3339()
                        ],
                    );
                    match inserted {
                        Ok(_) => return Ok(fv),
                        Err(rusqlite::Error::SqliteFailure(e, _))
                            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                        {
                            // Raced with another writer; recompute and retry.
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(StoreError::Conflict(format!(
                    "file version label contention on {fpath}"
                )))
            })
            .await?;
        self.bus.files.publish(FileEvent::Created(version.clone()));
        Ok(version)
    }

    pub async fn latest_file_version(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<Option<FileVersion>> {
        let sid = session_id.to_string();
        let fpath = path.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT * FROM files WHERE session_id = ?1 AND path = ?2
                 ORDER BY rowid DESC LIMIT 1",
                params![sid, fpath],
                row_to_file,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    /// Full version history for a (session, path), oldest first.
    pub async fn list_file_versions(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<Vec<FileVersion>> {
        let sid = session_id.to_string();
        let fpath = path.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM files WHERE session_id = ?1 AND path = ?2 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map(params![sid, fpath], row_to_file)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Paths that have at least one version in the session.
    pub async fn list_file_paths(&self, session_id: &str) -> Result<Vec<String>> {
        let sid = session_id.to_string();
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT path FROM files WHERE session_id = ?1")?;
            let rows = stmt
                .query_map(params![sid], |r| r.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_session(r: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: r.get("id")?,
        parent_id: r.get("parent_id")?,
        title: r.get("title")?,
        message_count: r.get::<_, i64>("message_count")? as u64,
        prompt_tokens: r.get::<_, i64>("prompt_tokens")? as u64,
        completion_tokens: r.get::<_, i64>("completion_tokens")? as u64,
        cost: r.get("cost")?,
        summary_message_id: r.get("summary_message_id")?,
        created_at: parse_ts(r.get("created_at")?),
        updated_at: parse_ts(r.get("updated_at")?),
    })
}

fn row_to_message(r: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let parts_json: String = r.get("parts")?;
    let role_str: String = r.get("role")?;
    Ok(MessageRecord {
        id: r.get("id")?,
        session_id: r.get("session_id")?,
        role: role_str.parse().unwrap_or(Role::User),
        parts: serde_json::from_str(&parts_json).unwrap_or_default(),
        model: r.get("model")?,
        usage: Usage {
            prompt_tokens: r.get::<_, i64>("prompt_tokens")? as u64,
            completion_tokens: r.get::<_, i64>("completion_tokens")? as u64,
        },
        created_at: parse_ts(r.get("created_at")?),
        finished_at: r.get::<_, Option<String>>("finished_at")?.map(parse_ts),
    })
}

fn row_to_file(r: &rusqlite::Row<'_>) -> rusqlite::Result<FileVersion> {
    Ok(FileVersion {
        id: r.get("id")?,
        session_id: r.get("session_id")?,
        path: r.get("path")?,
        content: r.get("content")?,
        version: r.get("version")?,
        created_at: parse_ts(r.get("created_at")?),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
