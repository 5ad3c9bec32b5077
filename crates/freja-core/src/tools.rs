// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool runtime contract.
//!
//! Concrete tools (web search, calendar, memory, skills) live with their
//! host applications.  The run engine only needs a way to advertise
//! schemas, invoke by name with JSON arguments, and distinguish
//! client-hosted tools that the caller must fulfil out-of-band.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::abort::AbortHandle;
use freja_model::ToolSchema;

/// One tool call as surfaced by a model driver.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub ok: bool,
    pub result: String,
    /// Coarse error class; `Some("fatal")` ends the attempt.
    pub error_category: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            ok: true,
            result: result.into(),
            error_category: None,
        }
    }

    pub fn err(message: impl Into<String>, category: Option<String>) -> Self {
        Self {
            ok: false,
            result: message.into(),
            error_category: category,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.error_category.as_deref() == Some("fatal")
    }
}

#[async_trait]
pub trait ToolRuntime: Send + Sync {
    /// Schemas advertised to the model.  Empty means tool-free turns.
    fn schemas(&self) -> Vec<ToolSchema> {
        Vec::new()
    }

    /// Client-hosted tools are not invoked here; the run surfaces them to
    /// the caller as a pending tool call instead.
    fn is_client_hosted(&self, _name: &str) -> bool {
        false
    }

    /// Invoke a tool.  Must observe `abort` promptly.
    async fn invoke(&self, call: &ToolInvocation, abort: &AbortHandle) -> ToolOutcome;
}

/// Runtime with no tools at all.
pub struct NullToolRuntime;

#[async_trait]
impl ToolRuntime for NullToolRuntime {
    async fn invoke(&self, call: &ToolInvocation, _abort: &AbortHandle) -> ToolOutcome {
        ToolOutcome::err(format!("unknown tool: {}", call.name), None)
    }
}

/// Canned-response runtime for tests: maps tool name → fixed output and
/// records every invocation.
#[derive(Default)]
pub struct StaticToolRuntime {
    responses: HashMap<String, ToolOutcome>,
    client_hosted: Vec<String>,
    invocations: std::sync::Mutex<Vec<ToolInvocation>>,
}

impl StaticToolRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: impl Into<String>, outcome: ToolOutcome) -> Self {
        self.responses.insert(name.into(), outcome);
        self
    }

    pub fn with_client_hosted(mut self, name: impl Into<String>) -> Self {
        self.client_hosted.push(name.into());
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolRuntime for StaticToolRuntime {
    fn schemas(&self) -> Vec<ToolSchema> {
        self.responses
            .keys()
            .map(|name| ToolSchema {
                name: name.clone(),
                description: format!("static test tool {name}"),
                parameters: serde_json::json!({ "type": "object" }),
            })
            .collect()
    }

    fn is_client_hosted(&self, name: &str) -> bool {
        self.client_hosted.iter().any(|n| n == name)
    }

    async fn invoke(&self, call: &ToolInvocation, _abort: &AbortHandle) -> ToolOutcome {
        self.invocations.lock().unwrap().push(call.clone());
        self.responses
            .get(&call.name)
            .cloned()
            .unwrap_or_else(|| ToolOutcome::err(format!("unknown tool: {}", call.name), None))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
