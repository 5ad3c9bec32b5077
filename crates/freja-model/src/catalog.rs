// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models.

use serde::{Deserialize, Serialize};

/// Capabilities a model may declare beyond plain text completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Accepts image input.
    Vision,
    /// Supports an extended-reasoning ("thinking") mode.
    Thinking,
}

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier (e.g. "claude-sonnet-4-5")
    pub id: String,
    /// Provider identifier: "anthropic" | "openai" | "mock"
    pub provider: String,
    /// Total context window in tokens (input + output)
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// Resolved descriptor handed to the run controller together with a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub provider: String,
    pub id: String,
    pub context_window_tokens: u32,
    pub max_output_tokens: u32,
    pub capabilities: Vec<Capability>,
}

impl ModelDescriptor {
    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// `"provider/model"` tag used in error messages and result metadata.
    pub fn tag(&self) -> String {
        format!("{}/{}", self.provider, self.id)
    }
}

impl From<ModelCatalogEntry> for ModelDescriptor {
    fn from(e: ModelCatalogEntry) -> Self {
        Self {
            provider: e.provider,
            id: e.id,
            context_window_tokens: e.context_window,
            max_output_tokens: e.max_output_tokens,
            capabilities: e.capabilities,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// Look up a single model by provider and id.
/// Returns `None` if not found in the static catalog.
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && e.id == model_id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
