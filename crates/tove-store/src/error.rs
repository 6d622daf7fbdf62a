// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A uniqueness conflict that survived the internal retry budget
    /// (file-version label races) or an attempt to mutate a frozen record.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A run is already active for the session.
    #[error("session busy: {0}")]
    Busy(String),

    #[error("database error: {0}")]
    Sqlite(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Sqlite(format!("serialization: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
