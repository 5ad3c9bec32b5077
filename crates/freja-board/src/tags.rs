// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-band signalling tags.
//!
//! Agents address each other through a bounded grammar embedded in their
//! replies: `[[consult:<role>]] <question>` and — for the general role
//! only — `[[board_meeting]] <topic>`.  A question or topic runs to the
//! end of its line.  All tags are stripped from the user-visible text;
//! anything unparseable is stripped and dropped.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::roles::BoardRole;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsultTag {
    pub role: BoardRole,
    pub question: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedReply {
    /// Reply with every tag removed.
    pub clean: String,
    pub consultations: Vec<ConsultTag>,
    pub meeting_topic: Option<String>,
}

fn consult_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[consult:([a-zA-Z]+)\]\][ \t]*([^\n]*)").unwrap())
}

fn meeting_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[board_meeting\]\][ \t]*([^\n]*)").unwrap())
}

/// Extract and strip the signalling tags from an agent reply.
///
/// Meeting tags are honoured only for the general role; specialists who
/// emit one get it silently stripped.
pub fn process_response(reply: &str, agent_role: BoardRole) -> ParsedReply {
    let mut consultations = Vec::new();
    for cap in consult_re().captures_iter(reply) {
        let role_raw = &cap[1];
        let question = cap[2].trim().to_string();
        match role_raw.parse::<BoardRole>() {
            Ok(role) => consultations.push(ConsultTag { role, question }),
            Err(_) => warn!(role = %role_raw, "stripping consult tag with unknown role"),
        }
    }

    let mut meeting_topic = None;
    if let Some(cap) = meeting_re().captures(reply) {
        let topic = cap[1].trim().to_string();
        if agent_role == BoardRole::General && !topic.is_empty() {
            meeting_topic = Some(topic);
        } else if agent_role != BoardRole::General {
            warn!(role = %agent_role, "stripping meeting tag from non-general agent");
        }
    }

    let without_consults = consult_re().replace_all(reply, "");
    let without_meetings = meeting_re().replace_all(&without_consults, "");
    let clean = without_meetings
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    ParsedReply {
        clean,
        consultations,
        meeting_topic,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
