// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Identifies one conversation log.
///
/// Encodes `surface:conversation`, optionally namespaced with an agent-role
/// prefix (`board:<role>:…`) by the board orchestrator.  The key is the
/// session's identity everywhere: lane keying, log file naming, routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn for_conversation(surface: &str, conversation: &str) -> Self {
        Self(format!("{surface}:{conversation}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The surface portion (everything before the first `:`), used for
    /// per-channel history limits.
    pub fn surface(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    /// Filesystem-safe name for the backing log file.
    pub fn file_name(&self) -> String {
        let sanitized: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{sanitized}.jsonl")
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
