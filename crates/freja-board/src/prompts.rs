// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System-prompt composition for board agents.

use std::path::PathBuf;

use tracing::warn;

use freja_config::{BoardAgentConfig, BoardConfig};

use crate::roles::{BoardRole, ALL_ROLES};

/// Find the config entry for a role, if the operator declared one.
pub fn agent_config_for(cfg: &BoardConfig, role: BoardRole) -> Option<&BoardAgentConfig> {
    cfg.agents
        .iter()
        .find(|a| a.role.parse::<BoardRole>().ok() == Some(role))
}

/// The agent's personality: its soul file when configured and readable,
/// the built-in default otherwise.
fn personality(cfg: &BoardConfig, role: BoardRole) -> String {
    let souls_dir = cfg
        .souls_dir
        .as_deref()
        .map(freja_config::expand_path)
        .unwrap_or_else(|| PathBuf::from("souls"));
    let path = agent_config_for(cfg, role)
        .and_then(|a| a.soul_file.as_deref())
        .map(|f| souls_dir.join(f))
        .unwrap_or_else(|| souls_dir.join(format!("{role}.md")));

    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => role.builtin_personality().to_string(),
        Err(e) => {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "soul file unreadable; using built-in personality");
            }
            role.builtin_personality().to_string()
        }
    }
}

/// Compose the full system prompt for one agent.
///
/// Personality, then the colleague roster, the consultation protocol,
/// the meeting protocol (general only), and finally any memory and
/// caller-supplied prompt text.
pub fn compose_system_prompt(
    cfg: &BoardConfig,
    role: BoardRole,
    memory_block: Option<&str>,
    existing_system_prompt: Option<&str>,
) -> String {
    let mut prompt = personality(cfg, role);
    prompt.push_str("\n\nYour colleagues on the board:\n");
    for colleague in ALL_ROLES.iter().filter(|r| **r != role) {
        let (name, emoji) = agent_config_for(cfg, *colleague)
            .map(|a| {
                (
                    a.name.clone().unwrap_or_else(|| colleague.display_name().into()),
                    a.emoji.clone().unwrap_or_else(|| colleague.emoji().into()),
                )
            })
            .unwrap_or_else(|| (colleague.display_name().into(), colleague.emoji().into()));
        prompt.push_str(&format!("- {emoji} {name} (`{colleague}`)\n"));
    }

    if cfg.consultation.enabled {
        prompt.push_str(&format!(
            "\nWhen a question falls outside your expertise, consult a colleague by \
             writing `[[consult:<role>]] <your question>` on its own line. The tag is \
             removed before the user sees your reply, and the colleague's answer is \
             returned to you. At most {} levels of consultation are followed; never \
             consult yourself.\n",
            cfg.consultation.max_depth
        ));
    }

    if role == BoardRole::General && cfg.meetings.enabled {
        prompt.push_str(
            "\nFor decisions that need every specialist's input, convene a board \
             meeting by writing `[[board_meeting]] <topic>` on its own line. Every \
             specialist will weigh in and you will synthesise the final \
             recommendation. Use this sparingly.\n",
        );
    }

    if role == BoardRole::General {
        prompt.push_str(
            "\nYou are the default recipient: messages with no clear specialist \
             owner land on you. Answer directly when you can.\n",
        );
    }

    if let Some(memory) = memory_block {
        prompt.push('\n');
        prompt.push_str(memory);
    }
    if let Some(existing) = existing_system_prompt {
        prompt.push('\n');
        prompt.push_str(existing);
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
