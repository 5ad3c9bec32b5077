// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider error classification.
//!
//! Providers report failures as free text (HTTP bodies, stream error
//! events).  Every recovery decision in the run controller keys off a
//! [`FailureReason`], and all of the string sniffing lives in this one
//! place.  Two reasons are structural rather than textual — `Aborted`
//! comes from the caller's abort signal and `Timeout` from the attempt
//! deadline — the run engine constructs those directly.

use serde::{Deserialize, Serialize};

/// Marker embedded in error text when transcript compaction itself failed.
/// Its presence short-circuits further overflow recovery for the turn.
pub const COMPACTION_FAILED_MARKER: &str = "[compaction-failed]";

/// Why an attempt (or a profile) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Prompt too large; recoverable once via compaction.
    ContextOverflow,
    /// Compaction itself failed; terminal for the turn.
    CompactionFailure,
    /// Provider rejected the message ordering; terminal, suggest a fresh session.
    RoleOrdering,
    /// Image payload rejected on byte size.
    ImageSize,
    /// Image payload rejected on pixel dimensions.
    ImageDimension,
    /// Throttled; recoverable via wait, rotation, then fallback.
    RateLimit,
    /// Credentials rejected; recoverable via rotation or fallback.
    Auth,
    /// No response within budget; treated like a rate limit.
    Timeout,
    /// Anything else; recoverable via rotation or fallback.
    Unknown,
    /// Caller-cancelled; terminal with no error payload.  Never produced
    /// by [`classify`] — the run engine constructs it from the abort
    /// signal.
    Aborted,
    /// A tool invocation failed.  Ordinary tool errors stay in-band and
    /// never reach this enum; only a fatal tool failure (which ends the
    /// attempt with the marker the run engine writes) classifies here.
    ToolError,
}

impl FailureReason {
    /// HTTP-like status carried on a failover escalation.
    pub fn status(self) -> u16 {
        match self {
            FailureReason::RateLimit => 429,
            FailureReason::Timeout => 408,
            FailureReason::Auth => 401,
            _ => 500,
        }
    }

    /// Terminal reasons end the turn without rotation or fallback.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FailureReason::CompactionFailure
                | FailureReason::RoleOrdering
                | FailureReason::ImageSize
                | FailureReason::ImageDimension
                | FailureReason::Aborted
                | FailureReason::ToolError
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::ContextOverflow => "context_overflow",
            FailureReason::CompactionFailure => "compaction_failure",
            FailureReason::RoleOrdering => "role_ordering",
            FailureReason::ImageSize => "image_size",
            FailureReason::ImageDimension => "image_dimension",
            FailureReason::RateLimit => "rate_limit",
            FailureReason::Auth => "auth",
            FailureReason::Timeout => "timeout",
            FailureReason::Unknown => "unknown",
            FailureReason::Aborted => "aborted",
            FailureReason::ToolError => "tool_error",
        };
        write!(f, "{s}")
    }
}

/// Classify a provider error message into a [`FailureReason`].
///
/// Ordering matters: the compaction marker wins over the overflow phrases
/// it usually accompanies, and image rejections are checked before the
/// generic size phrases they share words with.
pub fn classify(message: &str) -> FailureReason {
    let msg = message.to_ascii_lowercase();

    if message.contains(COMPACTION_FAILED_MARKER) {
        return FailureReason::CompactionFailure;
    }
    // The run engine's own fatal-tool marker; checked early so phrases
    // inside the tool's output cannot shadow it.
    if msg.contains("tool '") && msg.contains("failed fatally") {
        return FailureReason::ToolError;
    }
    if msg.contains("image dimensions")
        || msg.contains("image exceeds") && msg.contains("pixels")
        || msg.contains("dimensions exceed")
    {
        return FailureReason::ImageDimension;
    }
    if msg.contains("image exceeds") || msg.contains("image too large") {
        return FailureReason::ImageSize;
    }
    if msg.contains("prompt is too long")
        || msg.contains("context length")
        || msg.contains("maximum context")
        || msg.contains("exceed_context_size")
        || msg.contains("too many tokens")
        || msg.contains("input is too long")
    {
        return FailureReason::ContextOverflow;
    }
    if msg.contains("roles must alternate")
        || msg.contains("unexpected role")
        || msg.contains("incorrect role ordering")
        || msg.contains("message order")
    {
        return FailureReason::RoleOrdering;
    }
    if msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("rate_limit")
        || msg.contains("overloaded")
        || msg.contains("quota")
    {
        return FailureReason::RateLimit;
    }
    if msg.contains("401")
        || msg.contains("403")
        || msg.contains("invalid api key")
        || msg.contains("invalid x-api-key")
        || msg.contains("authentication")
        || msg.contains("unauthorized")
    {
        return FailureReason::Auth;
    }
    if msg.contains("timed out") || msg.contains("timeout") || msg.contains("deadline exceeded") {
        return FailureReason::Timeout;
    }
    FailureReason::Unknown
}

/// Whether the error text signals that the requested thinking level is not
/// available on this model.  Handled separately from [`classify`] because
/// the recovery (step the level down) is not a profile failure.
pub fn is_unsupported_thinking(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    (msg.contains("thinking") || msg.contains("reasoning"))
        && (msg.contains("not supported") || msg.contains("unsupported") || msg.contains("invalid"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
