// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Canonical conversation types and the model-provider contract.
//!
//! Everything the agent loop needs from a model goes through
//! [`ModelProvider`]: a streaming completion call yielding
//! [`ProviderEvent`]s, plus a non-streaming fallback assembled from the
//! stream.  Concrete adapters translate the canonical [`Message`] sequence
//! into their wire format; the loop never sees provider-specific JSON.

pub mod anthropic;
pub mod catalog;
pub mod mock;
pub mod provider;
pub mod retry;
mod types;

pub use anthropic::AnthropicProvider;
pub use catalog::{lookup, static_catalog, ModelSpec};
pub use mock::{MockProvider, ScriptedProvider};
pub use provider::{EventStream, ModelProvider};
pub use retry::RetryPolicy;
pub use types::{
    Completion, CompletionRequest, FinishReason, Message, Part, ProviderEvent, Role, ToolSchema,
    Usage,
};
