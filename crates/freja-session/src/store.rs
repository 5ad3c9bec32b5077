// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use freja_config::SessionsConfig;
use freja_model::{Message, ModelDriver};

use crate::{event::LogEvent, key::SessionKey, log::SessionLog};

const COMPACTION_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve decisions, names, numbers, open questions, \
     and commitments that may matter to future turns. The summary will replace the original \
     history to free up context space.";

/// Opens per-session logs and builds model context from them.
///
/// Context building is referentially transparent for an unchanged log: the
/// same events, turn limit, and token budget always produce the same
/// message sequence.
pub struct SessionStore {
    root: PathBuf,
    history_turn_limit: usize,
    channel_overrides: std::collections::HashMap<String, usize>,
    /// Events preserved verbatim when a transcript is compacted.
    keep_recent: usize,
}

impl SessionStore {
    pub fn new(cfg: &SessionsConfig, keep_recent: usize) -> Self {
        let root = cfg
            .root
            .as_deref()
            .map(|r| freja_config::expand_path(r))
            .or_else(|| dirs::data_local_dir().map(|d| d.join("freja/sessions")))
            .unwrap_or_else(|| PathBuf::from(".freja/sessions"));
        Self {
            root,
            history_turn_limit: cfg.history_turn_limit,
            channel_overrides: cfg.channel_overrides.clone(),
            keep_recent,
        }
    }

    /// Store rooted at an explicit directory (tests, embedded use).
    pub fn at_root(root: impl Into<PathBuf>, history_turn_limit: usize, keep_recent: usize) -> Self {
        Self {
            root: root.into(),
            history_turn_limit,
            channel_overrides: Default::default(),
            keep_recent,
        }
    }

    pub fn open(&self, key: &SessionKey) -> anyhow::Result<SessionLog> {
        SessionLog::open(self.root.join(key.file_name()))
    }

    /// History turn limit for a session, honouring per-channel overrides.
    pub fn turn_limit_for(&self, key: &SessionKey) -> usize {
        self.channel_overrides
            .get(key.surface())
            .copied()
            .unwrap_or(self.history_turn_limit)
    }

    /// Build the ordered message sequence for a model call.
    ///
    /// Reads only the active branch, prepends its compaction summary (when
    /// present), applies the history-turn limit, and — when a token budget
    /// is given — drops the oldest turns until the sequence fits.  The two
    /// trims compose as "take the minimum": whichever leaves less history
    /// wins.
    pub fn build_context(
        &self,
        log: &SessionLog,
        key: &SessionKey,
        token_budget: Option<usize>,
    ) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(summary) = log.active_branch_summary() {
            messages.push(Message::assistant(summary));
        }
        let summary_len = messages.len();
        messages.extend(log.active_events().iter().filter_map(event_to_message));

        let limit = self.turn_limit_for(key);
        trim_to_turn_limit(&mut messages, summary_len, limit);
        if let Some(budget) = token_budget {
            trim_to_token_budget(&mut messages, summary_len, budget);
        }
        messages
    }

    /// Compact the active branch: summarise everything but the most recent
    /// `keep_recent` events, append a branch marker carrying the summary,
    /// and re-append the preserved tail so it stays in the new branch.  The
    /// pre-compaction history remains in the file for audit.
    pub async fn compact(
        &self,
        log: &mut SessionLog,
        key: &SessionKey,
        summariser: &dyn ModelDriver,
    ) -> anyhow::Result<String> {
        let active: Vec<LogEvent> = log.active_events().to_vec();
        let mut split = active.len().saturating_sub(self.keep_recent);
        // Never split inside a tool-call/result group: the preserved tail
        // must not open with results whose calls were summarised away.
        while split > 0 && split < active.len() {
            match &active[split] {
                LogEvent::ToolResult { .. } | LogEvent::ToolCall { .. } => split -= 1,
                _ => break,
            }
        }
        if split == 0 {
            anyhow::bail!("nothing to compact for session {key}");
        }

        let to_summarise: Vec<Message> = active[..split]
            .iter()
            .filter_map(event_to_message)
            .collect();
        let summary = summariser
            .compact(&to_summarise, COMPACTION_PROMPT)
            .await?;
        if summary.trim().is_empty() {
            anyhow::bail!("summariser returned an empty summary");
        }

        let branch_id = Uuid::new_v4().to_string();
        debug!(session = %key, %branch_id, summarised = split, "compacting transcript");
        log.append(LogEvent::branch(&branch_id, &summary))?;
        log.append_all(active[split..].to_vec())?;
        Ok(summary)
    }

    /// Record that compaction failed so later overflow recovery for this
    /// turn short-circuits instead of looping.
    pub fn record_compaction_failure(
        &self,
        log: &mut SessionLog,
        error: &str,
    ) -> anyhow::Result<()> {
        log.append(LogEvent::system(
            format!("{} {error}", freja_model::COMPACTION_FAILED_MARKER),
            Some("compaction_failed".into()),
        ))
    }
}

/// Map one log event to its model message, when it has one.
fn event_to_message(event: &LogEvent) -> Option<Message> {
    match event {
        LogEvent::User {
            content, images, ..
        } => {
            if images.is_empty() {
                Some(Message::user(content.clone()))
            } else {
                let mut parts = vec![freja_model::ContentPart::text(content.clone())];
                parts.extend(
                    images
                        .iter()
                        .map(|url| freja_model::ContentPart::image(url.clone())),
                );
                Some(Message::user_with_parts(parts))
            }
        }
        LogEvent::Assistant {
            content,
            provider,
            model,
            ..
        } => {
            let msg = Message::assistant(content.clone());
            Some(match (provider, model) {
                (Some(p), Some(m)) => msg.with_origin(p.clone(), m.clone()),
                _ => msg,
            })
        }
        LogEvent::ToolCall {
            id, name, arguments, ..
        } => Some(Message::tool_call(id.clone(), name.clone(), arguments.clone())),
        LogEvent::ToolResult { id, content, .. } => {
            Some(Message::tool_result(id.clone(), content.clone()))
        }
        LogEvent::Aborted { partial_text, .. } if !partial_text.is_empty() => {
            Some(Message::assistant(partial_text.clone()))
        }
        _ => None,
    }
}

/// Keep only the last `limit` user turns (plus the summary prefix).
fn trim_to_turn_limit(messages: &mut Vec<Message>, prefix_len: usize, limit: usize) {
    if limit == 0 {
        return;
    }
    let user_positions: Vec<usize> = messages
        .iter()
        .enumerate()
        .skip(prefix_len)
        .filter(|(_, m)| m.role == freja_model::Role::User)
        .map(|(i, _)| i)
        .collect();
    if user_positions.len() > limit {
        let cut = user_positions[user_positions.len() - limit];
        messages.drain(prefix_len..cut);
    }
}

/// Drop the oldest turns until the sequence fits `budget` tokens.  The
/// final turn is always kept — an empty context is never an improvement.
fn trim_to_token_budget(messages: &mut Vec<Message>, prefix_len: usize, budget: usize) {
    let total = |msgs: &[Message]| -> usize { msgs.iter().map(|m| m.approx_tokens()).sum() };
    while total(messages) > budget {
        // Find the second user message after the prefix; everything before
        // it is the oldest turn.
        let mut users = messages
            .iter()
            .enumerate()
            .skip(prefix_len)
            .filter(|(_, m)| m.role == freja_model::Role::User)
            .map(|(i, _)| i);
        let (first, second) = (users.next(), users.next());
        match (first, second) {
            (Some(_), Some(cut)) => {
                messages.drain(prefix_len..cut);
            }
            _ => break,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
