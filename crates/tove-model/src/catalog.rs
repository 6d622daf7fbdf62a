// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Descriptor for one model in the bundled catalog.
///
/// Costs are expressed in USD per million tokens so that
/// `tokens × cost / 1e6` gives the dollar amount directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Catalog identifier (e.g. "claude-sonnet-4-5")
    pub id: String,
    /// Provider identifier: "anthropic" | "mock"
    pub provider: String,
    /// Model name sent on the wire, when it differs from `id`.
    #[serde(default)]
    pub api_model: Option<String>,
    /// Total context window in tokens (input + output)
    pub context_window: u64,
    /// Default maximum output tokens per completion
    pub default_max_tokens: u32,
    pub cost_per_million_in: f64,
    pub cost_per_million_out: f64,
    #[serde(default)]
    pub cost_per_million_in_cached: Option<f64>,
    #[serde(default)]
    pub cost_per_million_out_cached: Option<f64>,
    #[serde(default)]
    pub supports_reasoning: bool,
    #[serde(default)]
    pub supports_attachments: bool,
}

impl ModelSpec {
    /// The name to put on the wire.
    pub fn wire_name(&self) -> &str {
        self.api_model.as_deref().unwrap_or(&self.id)
    }

    /// Dollar cost of a turn given prompt and completion token counts.
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.cost_per_million_in
            + completion_tokens as f64 * self.cost_per_million_out)
            / 1_000_000.0
    }

    /// Fallback spec for tests and unknown models: a large window and zero
    /// cost so accounting still runs without a catalog entry.
    pub fn fallback(provider: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            provider: provider.to_string(),
            api_model: None,
            context_window: 128_000,
            default_max_tokens: 4_096,
            cost_per_million_in: 0.0,
            cost_per_million_out: 0.0,
            cost_per_million_in_cached: None,
            cost_per_million_out_cached: None,
            supports_reasoning: false,
            supports_attachments: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelSpec>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelSpec> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// Look up a single model by provider and id.  Returns `None` if not found.
pub fn lookup(provider: &str, id: &str) -> Option<ModelSpec> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && e.id == id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
