// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session runtime state.
//!
//! Everything a session accumulates outside the store — todo list,
//! continuation counter, shell process, file read-times, path locks —
//! lives in one [`SessionRuntime`], created lazily on the first run and
//! held in a process-wide map.  No module-level globals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};

use tove_tools::{ShellSession, TodoItem, ToolEvent, Workspace};

pub struct SessionRuntime {
    pub session_id: String,
    /// Shared with the todo tools; drained by the loop via `tool_events`.
    pub todos: Arc<Mutex<Vec<TodoItem>>>,
    /// Read-time records backing the stale-read gate.
    pub workspace: Arc<Workspace>,
    /// Lazily-spawned persistent shell; the mutex also serializes bash
    /// calls within the session.
    pub shell: Arc<Mutex<Option<ShellSession>>>,
    /// Sender given to stateful tools; receiver drained by the loop.
    pub tool_event_tx: mpsc::Sender<ToolEvent>,
    pub tool_event_rx: Arc<Mutex<mpsc::Receiver<ToolEvent>>>,
    continuations: AtomicU32,
    running: AtomicBool,
    path_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRuntime {
    fn new(session_id: String) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            session_id,
            todos: Arc::new(Mutex::new(Vec::new())),
            workspace: Arc::new(Workspace::new()),
            shell: Arc::new(Mutex::new(None)),
            tool_event_tx: tx,
            tool_event_rx: Arc::new(Mutex::new(rx)),
            continuations: AtomicU32::new(0),
            running: AtomicBool::new(false),
            path_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// One run per session: returns `false` when a run is already active.
    pub fn try_begin_run(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_run(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn continuations(&self) -> u32 {
        self.continuations.load(Ordering::Acquire)
    }

    pub fn increment_continuations(&self) -> u32 {
        self.continuations.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Called on every externally supplied user message.
    pub fn reset_continuations(&self) {
        self.continuations.store(0, Ordering::Release);
    }

    pub fn set_continuations(&self, n: u32) {
        self.continuations.store(n, Ordering::Release);
    }

    /// Lock serializing mutations of one path within this session.  The
    /// map only ever grows during a run; entries are dropped with the
    /// runtime.
    pub fn path_lock(&self, path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock().unwrap();
        Arc::clone(locks.entry(path.to_string()).or_default())
    }
}

/// Process-wide registry of session runtimes.
#[derive(Default)]
pub struct RuntimeRegistry {
    map: StdMutex<HashMap<String, Arc<SessionRuntime>>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionRuntime> {
        let mut map = self.map.lock().unwrap();
        Arc::clone(
            map.entry(session_id.to_string())
                .or_insert_with(|| Arc::new(SessionRuntime::new(session_id.to_string()))),
        )
    }

    /// Explicit teardown on session close.
    pub fn remove(&self, session_id: &str) {
        self.map.lock().unwrap().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().unwrap().is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_the_same_runtime() {
        let reg = RuntimeRegistry::new();
        let a = reg.get_or_create("s1");
        let b = reg.get_or_create("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn distinct_sessions_get_distinct_runtimes() {
        let reg = RuntimeRegistry::new();
        let a = reg.get_or_create("s1");
        let b = reg.get_or_create("s2");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn busy_gate_admits_one_run_at_a_time() {
        let rt = SessionRuntime::new("s".into());
        assert!(rt.try_begin_run());
        assert!(!rt.try_begin_run(), "second run must be rejected");
        rt.end_run();
        assert!(rt.try_begin_run(), "released runtime accepts a new run");
    }

    #[test]
    fn continuation_counter_increments_and_resets() {
        let rt = SessionRuntime::new("s".into());
        assert_eq!(rt.continuations(), 0);
        assert_eq!(rt.increment_continuations(), 1);
        assert_eq!(rt.increment_continuations(), 2);
        rt.reset_continuations();
        assert_eq!(rt.continuations(), 0);
    }

    #[test]
    fn path_lock_is_shared_per_path() {
        let rt = SessionRuntime::new("s".into());
        let a = rt.path_lock("src/a.rs");
        let b = rt.path_lock("src/a.rs");
        let c = rt.path_lock("src/b.rs");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn remove_drops_the_runtime() {
        let reg = RuntimeRegistry::new();
        reg.get_or_create("s1");
        reg.remove("s1");
        assert!(reg.is_empty());
    }
}
