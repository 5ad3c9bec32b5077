// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use freja_config::{ThinkLevel, ToolResultFormat};
use freja_model::{FailureReason, Usage};
use freja_session::SessionKey;

use crate::abort::AbortHandle;

/// Sentinel the caller may require in the assistant's final block.  A
/// missing sentinel is a soft condition reported on the attempt; the
/// controller ignores it unless asked otherwise.
pub const FINAL_TAG: &str = "[[final]]";

/// Immutable input for one turn.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_key: SessionKey,
    pub prompt: String,
    /// Image references (data or HTTPS URLs) attached to the user turn.
    pub images: Vec<String>,
    pub provider: String,
    pub model: String,
    pub think_level: ThinkLevel,
    pub tool_result_format: ToolResultFormat,
    /// Replaces the built-in default system prompt (board personality,
    /// task framing, …).
    pub extra_system_prompt: Option<String>,
    /// Try this auth profile first.
    pub preferred_profile: Option<String>,
    /// Require [`FINAL_TAG`] in the last assistant block.
    pub require_final_tag: bool,
    pub abort: AbortHandle,
}

impl RunRequest {
    pub fn new(
        session_key: impl Into<SessionKey>,
        prompt: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            prompt: prompt.into(),
            images: Vec::new(),
            provider: provider.into(),
            model: model.into(),
            think_level: ThinkLevel::default(),
            tool_result_format: ToolResultFormat::default(),
            extra_system_prompt: None,
            preferred_profile: None,
            require_final_tag: false,
            abort: AbortHandle::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.extra_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_think_level(mut self, level: ThinkLevel) -> Self {
        self.think_level = level;
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }
}

/// A tool call surfaced by the driver that the host must fulfil
/// out-of-band before resuming the turn.
#[derive(Debug, Clone)]
pub struct ClientToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Record of one executed tool call inside an attempt.
#[derive(Debug, Clone)]
pub struct ToolMeta {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub output: String,
    pub is_error: bool,
}

/// The final assistant message of an attempt, with its provenance.
#[derive(Debug, Clone)]
pub struct LastAssistant {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
    pub stop_reason: Option<String>,
}

/// Outcome of one driver round trip.
#[derive(Debug, Default)]
pub struct Attempt {
    pub assistant_texts: Vec<String>,
    pub tool_metas: Vec<ToolMeta>,
    pub last_assistant: Option<LastAssistant>,
    pub usage: Usage,
    /// The stream could not be opened (provider rejected the prompt).
    pub prompt_error: Option<String>,
    /// The provider reported an error mid-stream.
    pub stream_error: Option<String>,
    pub timed_out: bool,
    pub aborted: bool,
    /// Set when the driver surfaced a client-hosted tool call.
    pub client_tool_call: Option<ClientToolCall>,
    /// The required final sentinel was absent (soft condition).
    pub missing_final_tag: bool,
    /// The composed system prompt actually sent, for observability.
    pub system_prompt_report: Option<String>,
}

impl Attempt {
    /// The provider error to classify, if any.
    pub fn error_text(&self) -> Option<&str> {
        self.prompt_error
            .as_deref()
            .or(self.stream_error.as_deref())
    }

    /// The structural outcome of the attempt, when one applies.  Abort
    /// and timeout never come from provider text, so they enter the
    /// failure taxonomy here rather than through the classifier.
    pub fn terminal_signal(&self) -> Option<FailureReason> {
        if self.aborted {
            Some(FailureReason::Aborted)
        } else if self.timed_out {
            Some(FailureReason::Timeout)
        } else {
            None
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.aborted && !self.timed_out && self.error_text().is_none()
    }
}

/// One block of the final reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub text: String,
    pub is_error: bool,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub duration_ms: u64,
    pub session_id: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
    pub stop_reason: Option<String>,
    pub error: Option<String>,
    /// Auth profile that served the successful attempt.
    pub profile_id: Option<String>,
    pub aborted: bool,
}

/// Final output of a turn.
#[derive(Debug, Default)]
pub struct RunResult {
    pub payloads: Vec<Payload>,
    pub meta: RunMeta,
    /// Non-empty when `meta.stop_reason == "tool_calls"`.
    pub pending_tool_calls: Vec<ClientToolCall>,
}

impl RunResult {
    /// Concatenated non-error payload text (the user-visible reply).
    pub fn reply_text(&self) -> String {
        self.payloads
            .iter()
            .filter(|p| !p.is_error)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_error(&self) -> bool {
        self.payloads.iter().any(|p| p.is_error)
    }

    /// Concatenated error payload text, empty for clean turns.
    pub fn error_text(&self) -> String {
        self.payloads
            .iter()
            .filter(|p| p.is_error)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
