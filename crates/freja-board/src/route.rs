// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Message routing: which board agent answers, under which session key.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use freja_config::{BoardConfig, ThinkLevel};
use freja_session::SessionKey;

use crate::roles::{BoardRole, SPECIALISTS};

/// Why a message landed on a given agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    /// The group topic is mapped to this agent.
    Topic,
    /// An explicit `/agent:<role>` directive.
    Directive,
    /// An `@<role>` mention.
    Mention,
    /// Keyword inference cleared the score threshold.
    Keyword,
    /// Nothing claimed it; the general agent answers.
    Default,
}

/// Everything the turn pipeline needs to run a routed message.
#[derive(Debug, Clone)]
pub struct BoardContext {
    pub agent_role: BoardRole,
    pub route_reason: RouteReason,
    /// Message body with directives and mentions stripped.
    pub cleaned_body: String,
    pub session_key: SessionKey,
    pub extra_system_prompt: String,
    pub model_override: Option<String>,
    pub thinking_override: Option<ThinkLevel>,
}

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*/agent:([a-zA-Z]+)\b[ \t]*").unwrap())
}

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([a-zA-Z]+)\b").unwrap())
}

/// Pick the answering role and clean the body.
///
/// Precedence: topic mapping, `/agent:` directive, `@role` mention,
/// keyword inference, then the general default.  Keyword inference only
/// claims a message when the top score is at least 3 points AND at least
/// twice the runner-up — ambiguity always falls through to general.
pub fn route(cfg: &BoardConfig, body: &str, topic_id: Option<&str>) -> (BoardRole, RouteReason, String) {
    // 1. Topic mapping.
    if let Some(topic) = topic_id {
        for agent in &cfg.agents {
            if agent.topic_id.as_deref() == Some(topic) {
                if let Ok(role) = agent.role.parse::<BoardRole>() {
                    return (role, RouteReason::Topic, body.trim().to_string());
                }
            }
        }
    }

    // 2. /agent:<role> directive.
    if let Some(cap) = directive_re().captures(body) {
        if let Ok(role) = cap[1].parse::<BoardRole>() {
            let cleaned = directive_re().replace(body, "").trim().to_string();
            return (role, RouteReason::Directive, cleaned);
        }
    }

    // 3. @<role> mention.
    for cap in mention_re().captures_iter(body) {
        if let Ok(role) = cap[1].parse::<BoardRole>() {
            let cleaned = body.replacen(&cap[0], "", 1).trim().to_string();
            return (role, RouteReason::Mention, cleaned);
        }
    }

    // 4. Keyword inference.
    if let Some(role) = infer_by_keywords(body) {
        return (role, RouteReason::Keyword, body.trim().to_string());
    }

    // 5. Default.
    (BoardRole::General, RouteReason::Default, body.trim().to_string())
}

fn infer_by_keywords(body: &str) -> Option<BoardRole> {
    let lower = body.to_lowercase();
    let mut scores: Vec<(BoardRole, u32)> = SPECIALISTS
        .iter()
        .map(|role| {
            let score = role
                .keywords()
                .iter()
                .map(|(kw, weight)| lower.matches(kw).count() as u32 * weight)
                .sum();
            (*role, score)
        })
        .collect();
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let (top_role, top) = scores[0];
    let runner_up = scores[1].1;
    if top >= 3 && top >= runner_up * 2 {
        debug!(role = %top_role, score = top, runner_up, "keyword routing");
        Some(top_role)
    } else {
        None
    }
}

/// Derive the session key for a routed message.
///
/// The general agent keeps the base key so direct chats stay one
/// continuous conversation.  Specialists get their own namespaced
/// sessions — per group when the message came from the board group.
pub fn derive_session_key(
    role: BoardRole,
    base: &SessionKey,
    group_suffix: Option<&str>,
) -> SessionKey {
    if role == BoardRole::General {
        return base.clone();
    }
    match group_suffix {
        Some(group) => SessionKey::new(format!("board:{role}:{group}")),
        None => SessionKey::new(format!("board:{role}")),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use freja_config::BoardAgentConfig;

    fn cfg_with_topic(role: &str, topic: &str) -> BoardConfig {
        BoardConfig {
            agents: vec![BoardAgentConfig {
                role: role.into(),
                name: None,
                emoji: None,
                model: None,
                thinking_default: None,
                topic_id: Some(topic.into()),
                soul_file: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn topic_mapping_wins_over_everything() {
        let cfg = cfg_with_topic("finance", "42");
        let (role, reason, body) = route(&cfg, "/agent:legal what about the contract", Some("42"));
        assert_eq!(role, BoardRole::Finance);
        assert_eq!(reason, RouteReason::Topic);
        assert!(body.contains("/agent:legal"), "topic routing keeps the body");
    }

    #[test]
    fn directive_routes_and_strips() {
        let cfg = BoardConfig::default();
        let (role, reason, body) = route(&cfg, "/agent:legal check this contract", None);
        assert_eq!(role, BoardRole::Legal);
        assert_eq!(reason, RouteReason::Directive);
        assert_eq!(body, "check this contract");
    }

    #[test]
    fn unknown_directive_falls_through() {
        let cfg = BoardConfig::default();
        let (role, reason, _) = route(&cfg, "/agent:wizard do magic", None);
        assert_eq!(role, BoardRole::General);
        assert_eq!(reason, RouteReason::Default);
    }

    #[test]
    fn mention_routes_and_strips_first_occurrence() {
        let cfg = BoardConfig::default();
        let (role, reason, body) = route(&cfg, "hey @finance what's our runway?", None);
        assert_eq!(role, BoardRole::Finance);
        assert_eq!(reason, RouteReason::Mention);
        assert_eq!(body, "hey  what's our runway?".trim());
    }

    #[test]
    fn mention_of_unknown_name_is_not_routing() {
        let cfg = BoardConfig::default();
        let (role, _, body) = route(&cfg, "ping @alice about lunch", None);
        assert_eq!(role, BoardRole::General);
        assert!(body.contains("@alice"), "non-role mentions stay in the body");
    }

    #[test]
    fn keyword_inference_needs_clear_margin() {
        let cfg = BoardConfig::default();
        // "legal" (2) + "contract" (2) + "compliance" (2) = 6, others 0.
        let (role, reason, _) = route(
            &cfg,
            "is this contract in legal compliance with the new rules?",
            None,
        );
        assert_eq!(role, BoardRole::Legal);
        assert_eq!(reason, RouteReason::Keyword);
    }

    #[test]
    fn weak_keyword_signal_defaults_to_general() {
        let cfg = BoardConfig::default();
        // "cost" alone scores 1 — below the 3-point floor.
        let (role, reason, _) = route(&cfg, "what does this cost?", None);
        assert_eq!(role, BoardRole::General);
        assert_eq!(reason, RouteReason::Default);
    }

    #[test]
    fn contested_keywords_default_to_general() {
        let cfg = BoardConfig::default();
        // finance: budget(2)+cost(1) = 3; marketing: campaign(2)+launch(1) = 3.
        // Top is not 2x runner-up, so nobody claims it.
        let (role, _, _) = route(
            &cfg,
            "budget the cost for the campaign launch",
            None,
        );
        assert_eq!(role, BoardRole::General);
    }

    #[test]
    fn general_preserves_base_session_key() {
        let base = SessionKey::new("telegram:alice");
        assert_eq!(
            derive_session_key(BoardRole::General, &base, None),
            base
        );
    }

    #[test]
    fn specialist_keys_are_namespaced() {
        let base = SessionKey::new("telegram:alice");
        assert_eq!(
            derive_session_key(BoardRole::Finance, &base, None).as_str(),
            "board:finance"
        );
        assert_eq!(
            derive_session_key(BoardRole::Finance, &base, Some("-100200")).as_str(),
            "board:finance:-100200"
        );
    }
}
