// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-process typed pub/sub.
//!
//! One topic per entity kind.  Publishers never block; each subscriber has a
//! bounded queue and, when it falls behind, the oldest events are dropped
//! and the subscription yields an [`Delivery::Overflow`] marker so the
//! consumer can resync by refetching.  Per-topic publication order is
//! preserved; cross-topic ordering is not guaranteed.  Dropping or closing a
//! subscription guarantees no further delivery.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::{FileVersion, MessageRecord, Session};

/// Per-subscriber queue capacity.  Small on purpose: the UI is expected to
/// refetch on overflow rather than buffer unbounded history.
const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created(Session),
    Updated(Session),
}

#[derive(Debug, Clone)]
pub enum MessageEvent {
    Created(MessageRecord),
    Updated(MessageRecord),
}

#[derive(Debug, Clone)]
pub enum FileEvent {
    Created(FileVersion),
}

/// A pending permission prompt as published to interested consumers.
#[derive(Debug, Clone)]
pub struct PermissionPrompt {
    pub id: String,
    pub session_id: String,
    pub tool: String,
    pub action: String,
    pub description: String,
    pub params: Value,
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PermissionEvent {
    Requested(PermissionPrompt),
    Resolved { id: String, granted: bool },
}

/// What a subscriber receives: either an event or a marker that `missed`
/// events were dropped because the subscriber lagged.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Event(T),
    Overflow { missed: u64 },
}

pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Receive the next delivery.  Returns `None` once the topic is closed
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        match self.rx.recv().await {
            Ok(ev) => Some(Delivery::Event(ev)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Some(Delivery::Overflow { missed })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant used by tests and pollers.
    pub fn try_recv(&mut self) -> Option<Delivery<T>> {
        match self.rx.try_recv() {
            Ok(ev) => Some(Delivery::Event(ev)),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                Some(Delivery::Overflow { missed })
            }
            _ => None,
        }
    }

    /// Explicit unsubscribe; equivalent to dropping the subscription.
    /// After this returns, nothing more is delivered.
    pub fn close(self) {}
}

pub struct Topic<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Topic<T> {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(TOPIC_CAPACITY);
        Self { tx }
    }

    /// Publish without blocking.  Events sent while nobody subscribes are
    /// simply dropped.
    pub fn publish(&self, ev: T) {
        let _ = self.tx.send(ev);
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription { rx: self.tx.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// The process-wide bus: one typed topic per entity kind.
pub struct EventBus {
    pub sessions: Topic<SessionEvent>,
    pub messages: Topic<MessageEvent>,
    pub files: Topic<FileEvent>,
    pub permissions: Topic<PermissionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sessions: Topic::new(),
            messages: Topic::new(),
            files: Topic::new(),
            permissions: Topic::new(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
