// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use freja_model::Usage;

fn is_false(b: &bool) -> bool {
    !b
}

/// One record in a session's append-only log.
///
/// The log is the single source of truth for a conversation: events are
/// timestamped, appended in order, and never rewritten.  A `Branch` event
/// closes the preceding history — context building reads only what follows
/// the most recent branch, while everything before it stays on disk for
/// audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    User {
        timestamp: DateTime<Utc>,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
    },
    Assistant {
        timestamp: DateTime<Utc>,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    ToolCall {
        timestamp: DateTime<Utc>,
        id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        timestamp: DateTime<Utc>,
        id: String,
        content: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_error: bool,
    },
    System {
        timestamp: DateTime<Utc>,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    /// Closes the current branch.  `summary` is the compaction summary that
    /// opens the new branch.
    Branch {
        timestamp: DateTime<Utc>,
        branch_id: String,
        summary: String,
    },
    /// The turn was cancelled; any partial assistant text is preserved.
    Aborted {
        timestamp: DateTime<Utc>,
        partial_text: String,
    },
}

impl LogEvent {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            timestamp: Utc::now(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user_with_images(content: impl Into<String>, images: Vec<String>) -> Self {
        Self::User {
            timestamp: Utc::now(),
            content: content.into(),
            images,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            timestamp: Utc::now(),
            content: content.into(),
            provider: None,
            model: None,
            usage: None,
            stop_reason: None,
        }
    }

    pub fn assistant_from(
        content: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        usage: Option<Usage>,
        stop_reason: Option<String>,
    ) -> Self {
        Self::Assistant {
            timestamp: Utc::now(),
            content: content.into(),
            provider: Some(provider.into()),
            model: Some(model.into()),
            usage,
            stop_reason,
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            timestamp: Utc::now(),
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            timestamp: Utc::now(),
            id: id.into(),
            content: content.into(),
            is_error,
        }
    }

    pub fn system(content: impl Into<String>, kind: Option<String>) -> Self {
        Self::System {
            timestamp: Utc::now(),
            content: content.into(),
            kind,
        }
    }

    pub fn branch(branch_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::Branch {
            timestamp: Utc::now(),
            branch_id: branch_id.into(),
            summary: summary.into(),
        }
    }

    pub fn aborted(partial_text: impl Into<String>) -> Self {
        Self::Aborted {
            timestamp: Utc::now(),
            partial_text: partial_text.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LogEvent::User { timestamp, .. }
            | LogEvent::Assistant { timestamp, .. }
            | LogEvent::ToolCall { timestamp, .. }
            | LogEvent::ToolResult { timestamp, .. }
            | LogEvent::System { timestamp, .. }
            | LogEvent::Branch { timestamp, .. }
            | LogEvent::Aborted { timestamp, .. } => *timestamp,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
