// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-session workspace state backing the read-before-write gate.
//!
//! `view` records when it last read each path; `edit`/`write`/`patch`
//! refuse to touch an existing file whose on-disk mtime is newer than that
//! recorded read.  Writers refresh the record after a successful mutation
//! so their own change does not trip the gate on the next call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

#[derive(Default)]
pub struct Workspace {
    reads: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` was read just now.
    pub fn record_read(&self, path: &Path) {
        self.reads
            .lock()
            .unwrap()
            .insert(canonical(path), SystemTime::now());
    }

    pub fn last_read(&self, path: &Path) -> Option<SystemTime> {
        self.reads.lock().unwrap().get(&canonical(path)).copied()
    }

    /// The stale-read gate.  `Ok` when the file does not exist (nothing to
    /// be stale against) or when the last in-session read is at least as
    /// new as the file's mtime.
    pub fn check_fresh(&self, path: &Path) -> Result<(), String> {
        let Ok(meta) = std::fs::metadata(path) else {
            return Ok(());
        };
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        match self.last_read(path) {
            None => Err(format!(
                "StaleRead: {} has not been viewed in this session. \
                 Use the view tool first, then retry.",
                path.display()
            )),
            Some(read_at) if read_at < mtime => Err(format!(
                "StaleRead: {} changed on disk after it was last viewed. \
                 View it again to pick up the current content, then retry.",
                path.display()
            )),
            Some(_) => Ok(()),
        }
    }

    /// Snapshot for carrying read state into a summarized child session.
    pub fn snapshot(&self) -> HashMap<PathBuf, SystemTime> {
        self.reads.lock().unwrap().clone()
    }

    pub fn absorb(&self, reads: HashMap<PathBuf, SystemTime>) {
        self.reads.lock().unwrap().extend(reads);
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
