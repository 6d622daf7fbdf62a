// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable storage for sessions, messages, and file versions, plus the
//! in-process event bus that publishes every mutation.

pub mod bus;
mod error;
mod sqlite;
mod types;

pub use bus::{
    Delivery, EventBus, FileEvent, MessageEvent, PermissionEvent, PermissionPrompt, SessionEvent,
    Subscription, Topic,
};
pub use error::{Result, StoreError};
pub use sqlite::Store;
pub use types::{next_version_label, CounterDelta, FileVersion, MessageRecord, Session};
