// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agent-to-agent consultations.

use std::sync::Arc;
use std::time::Duration;

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use freja_config::{Config, ModelRef};
use freja_core::{AbortHandle, RunRequest, TurnEvent, TurnRunner};
use freja_session::SessionKey;
use freja_tasks::AgentMemory;

use crate::{
    prompts::{agent_config_for, compose_system_prompt},
    roles::BoardRole,
    tags::{process_response, ConsultTag},
};

/// One colleague question in flight.
#[derive(Debug, Clone)]
pub struct Consultation {
    pub id: String,
    pub from: BoardRole,
    pub to: BoardRole,
    pub question: String,
    pub depth: u32,
    pub max_depth: u32,
    pub meeting_id: Option<String>,
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConsultationResponse {
    pub request_id: String,
    pub from: BoardRole,
    pub text: String,
    pub duration_ms: u64,
}

/// Executes consultation tags by running child agent turns.
pub struct Consultant {
    config: Arc<Config>,
    turns: Arc<TurnRunner>,
    memory: Arc<AgentMemory>,
}

impl Consultant {
    pub fn new(config: Arc<Config>, turns: Arc<TurnRunner>, memory: Arc<AgentMemory>) -> Self {
        Self {
            config,
            turns,
            memory,
        }
    }

    /// Execute every consultation tag and format the answers into a
    /// single report block.  Returns `None` when nothing ran (disabled,
    /// empty, or depth exhausted).
    ///
    /// Self-consultations are rejected.  A consulted agent's reply may
    /// itself contain consult tags; those are followed until `max_depth`.
    #[async_recursion]
    pub async fn execute_consultations(
        &self,
        tags: Vec<ConsultTag>,
        from: BoardRole,
        depth: u32,
        meeting_id: Option<String>,
    ) -> Option<String> {
        let cfg = &self.config.board.consultation;
        if !cfg.enabled || tags.is_empty() {
            return None;
        }
        if depth >= cfg.max_depth {
            warn!(%from, depth, "consultation depth limit reached; not following tags");
            return None;
        }

        let mut sections = Vec::new();
        let mut handles = Vec::new();
        for tag in tags {
            if tag.role == from {
                warn!(%from, "rejecting self-consultation");
                continue;
            }
            let consultation = Consultation {
                id: Uuid::new_v4().to_string(),
                from,
                to: tag.role,
                question: tag.question,
                depth,
                max_depth: cfg.max_depth,
                meeting_id: meeting_id.clone(),
                timeout_ms: cfg.timeout_ms,
                created_at: Utc::now(),
            };
            handles.push(self.consult_one(consultation));
        }
        if handles.is_empty() {
            return None;
        }

        // Colleagues answer in parallel; the report keeps tag order.
        let responses = futures::future::join_all(handles).await;
        for response in responses {
            let role = response.from;
            sections.push(format!(
                "── {} {} ──\n{}",
                role.emoji(),
                role.display_name(),
                response.text
            ));
        }

        let mut report = String::from("📋 Consultation results:\n\n");
        report.push_str(&sections.join("\n\n"));
        Some(report)
    }

    async fn consult_one(&self, consultation: Consultation) -> ConsultationResponse {
        let started = std::time::Instant::now();
        let to = consultation.to;
        debug!(
            from = %consultation.from,
            %to,
            depth = consultation.depth,
            "consulting colleague"
        );

        let text = match self.run_consulted_agent(&consultation).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%to, error = %e, "consultation failed");
                format!("({} did not respond: {e})", to.display_name())
            }
        };

        ConsultationResponse {
            request_id: consultation.id.clone(),
            from: to,
            text,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn run_consulted_agent(&self, consultation: &Consultation) -> anyhow::Result<String> {
        let to = consultation.to;
        let board = &self.config.board;
        let model: ModelRef = agent_config_for(board, to)
            .and_then(|a| a.model.clone())
            .unwrap_or_else(|| self.config.agents.defaults.model.clone())
            .parse()?;

        let memory_block = self.memory.format_for_prompt(to.as_str());
        let mut system_prompt =
            compose_system_prompt(board, to, memory_block.as_deref(), None);
        system_prompt.push_str(&format!(
            "\nYour colleague {} is consulting you. Answer their question directly \
             and concisely; your reply goes back to them, not to the user.\n",
            consultation.from.display_name()
        ));

        // Each consultation runs in its own short-lived session so a
        // timed-out or failed exchange never pollutes the specialist's
        // ongoing conversations.
        let short_id: String = consultation.id.chars().take(8).collect();
        let session_key = SessionKey::new(format!("board:{to}:consult:{short_id}"));

        let abort = AbortHandle::new();
        let req = RunRequest::new(
            session_key,
            consultation.question.clone(),
            &model.provider,
            &model.model,
        )
        .with_system_prompt(system_prompt)
        .with_abort(abort.clone());

        let (tx, _rx) = mpsc::channel::<TurnEvent>(64);
        let outcome = tokio::time::timeout(
            Duration::from_millis(consultation.timeout_ms),
            self.turns.run_with_fallbacks(&req, tx),
        )
        .await;

        let result = match outcome {
            Ok(result) => result?,
            Err(_) => {
                abort.abort();
                anyhow::bail!("no response within {} ms", consultation.timeout_ms);
            }
        };
        if result.is_error() {
            anyhow::bail!("{}", result.error_text());
        }

        let parsed = process_response(&result.reply_text(), to);
        let mut text = parsed.clean;
        if !parsed.consultations.is_empty() {
            if let Some(nested) = self
                .execute_consultations(
                    parsed.consultations,
                    to,
                    consultation.depth + 1,
                    consultation.meeting_id.clone(),
                )
                .await
            {
                text.push_str("\n\n");
                text.push_str(&nested);
            }
        }
        Ok(text)
    }
}
