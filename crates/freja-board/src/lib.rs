// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The board orchestrator: routing, consultations, and meetings for the
//! six fixed agent roles.

mod consult;
mod meeting;
mod prompts;
mod roles;
mod route;
mod tags;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use freja_channels::ChannelSink;
use freja_config::{Config, ModelRef};
use freja_core::{RunRequest, TurnEvent, TurnRunner};
use freja_session::SessionKey;
use freja_tasks::{AgentMemory, TaskRunner};

pub use consult::{Consultant, Consultation, ConsultationResponse};
pub use meeting::{BoardMeeting, MeetingRunner, MeetingStatus, SpecialistInput};
pub use prompts::{agent_config_for, compose_system_prompt};
pub use roles::{BoardRole, ALL_ROLES, SPECIALISTS};
pub use route::{derive_session_key, route, BoardContext, RouteReason};
pub use tags::{process_response, ConsultTag, ParsedReply};

/// Facade over routing, consultation, and meeting execution.
pub struct Board {
    config: Arc<Config>,
    turns: Arc<TurnRunner>,
    memory: Arc<AgentMemory>,
    consultant: Consultant,
    meetings: MeetingRunner,
}

impl Board {
    pub fn new(
        config: Arc<Config>,
        turns: Arc<TurnRunner>,
        tasks: Arc<TaskRunner>,
        sink: Arc<dyn ChannelSink>,
    ) -> Self {
        let memory = tasks.memory().clone();
        let consultant = Consultant::new(config.clone(), turns.clone(), memory.clone());
        let meetings = MeetingRunner::new(
            config.clone(),
            turns.clone(),
            tasks,
            memory.clone(),
            sink,
        );
        Self {
            config,
            turns,
            memory,
            consultant,
            meetings,
        }
    }

    pub fn meetings(&self) -> &MeetingRunner {
        &self.meetings
    }

    pub fn consultant(&self) -> &Consultant {
        &self.consultant
    }

    /// Route an incoming message and assemble everything the turn
    /// pipeline needs: the answering role, its namespaced session key,
    /// the composed system prompt, and per-agent overrides.
    pub fn prepare_context(
        &self,
        body: &str,
        base_key: &SessionKey,
        topic_id: Option<&str>,
        existing_system_prompt: Option<&str>,
    ) -> BoardContext {
        let board_cfg = &self.config.board;
        let (role, reason, cleaned_body) = if board_cfg.enabled {
            route::route(board_cfg, body, topic_id)
        } else {
            (
                BoardRole::General,
                RouteReason::Default,
                body.trim().to_string(),
            )
        };

        // A message is "in the group" when its conversation id is the
        // configured board group; specialists then get per-group sessions.
        let group_suffix = board_cfg.group_id.as_deref().filter(|g| {
            base_key
                .as_str()
                .split_once(':')
                .map_or(false, |(_, convo)| convo == *g)
        });
        let session_key = route::derive_session_key(role, base_key, group_suffix);

        let memory_block = self.memory.format_for_prompt(role.as_str());
        let extra_system_prompt = compose_system_prompt(
            board_cfg,
            role,
            memory_block.as_deref(),
            existing_system_prompt,
        );

        let agent_cfg = agent_config_for(board_cfg, role);
        BoardContext {
            agent_role: role,
            route_reason: reason,
            cleaned_body,
            session_key,
            extra_system_prompt,
            model_override: agent_cfg.and_then(|a| a.model.clone()),
            thinking_override: agent_cfg.and_then(|a| a.thinking_default),
        }
    }

    /// Full inbound flow: route, run the turn, follow consultation tags,
    /// and convene a meeting when the general agent asks for one.
    /// Returns the user-visible reply text.
    pub async fn handle_message(
        &self,
        body: &str,
        base_key: &SessionKey,
        topic_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let ctx = self.prepare_context(body, base_key, topic_id, None);
        info!(
            role = %ctx.agent_role,
            reason = ?ctx.route_reason,
            session = %ctx.session_key,
            "message routed"
        );

        let model: ModelRef = ctx
            .model_override
            .clone()
            .unwrap_or_else(|| self.config.agents.defaults.model.clone())
            .parse()?;
        let mut req = RunRequest::new(
            ctx.session_key.clone(),
            ctx.cleaned_body.clone(),
            &model.provider,
            &model.model,
        )
        .with_system_prompt(ctx.extra_system_prompt.clone());
        req.think_level = ctx
            .thinking_override
            .unwrap_or(self.config.agents.defaults.thinking);

        let (tx, _rx) = mpsc::channel::<TurnEvent>(256);
        let result = self.turns.run_with_fallbacks(&req, tx).await?;
        if result.is_error() {
            return Ok(result.error_text());
        }

        let parsed = process_response(&result.reply_text(), ctx.agent_role);
        let mut reply = parsed.clean.clone();

        if let Some(report) = self
            .consultant
            .execute_consultations(parsed.consultations, ctx.agent_role, 0, None)
            .await
        {
            reply.push_str("\n\n");
            reply.push_str(&report);
        }

        if let Some(topic) = parsed.meeting_topic {
            let meeting = self.meetings.execute_async_meeting(&topic).await?;
            reply.push_str(&format!(
                "\n\n🏛️ Board meeting convened on: {topic} (id {})",
                meeting.id
            ));
        }

        Ok(reply)
    }
}
