// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Board meetings: every specialist weighs in, the general agent
//! synthesises.
//!
//! Two execution shapes share the synthesis step.  A *sync* meeting runs
//! the specialists as parallel turns and blocks until the recommendation
//! is ready.  An *async* meeting runs each specialist as an autonomous
//! task; a completion hook fires the synthesis automatically once the
//! last specialist task reaches a terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use freja_channels::{ChannelSink, OutboundMessage};
use freja_config::{Config, ModelRef};
use freja_core::{RunRequest, TurnEvent, TurnRunner};
use freja_session::SessionKey;
use freja_tasks::{AgentMemory, Task, TaskCompletionHook, TaskRunner, TaskState, TaskStep};

use crate::{
    prompts::{agent_config_for, compose_system_prompt},
    roles::{BoardRole, SPECIALISTS},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingStatus {
    Pending,
    InProgress,
    Synthesizing,
    Completed,
    Failed,
    Cancelled,
}

/// One specialist's contribution.  `None` text means the specialist
/// failed or timed out; the meeting continues without them.
#[derive(Debug, Clone)]
pub struct SpecialistInput {
    pub role: BoardRole,
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BoardMeeting {
    pub id: String,
    pub topic: String,
    pub status: MeetingStatus,
    pub initiated_by: BoardRole,
    pub inputs: Vec<SpecialistInput>,
    pub synthesis: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub max_duration_ms: u64,
    pub max_turns_per_agent: u32,
}

impl BoardMeeting {
    fn new(topic: impl Into<String>, config: &Config) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            status: MeetingStatus::Pending,
            initiated_by: BoardRole::General,
            inputs: Vec::new(),
            synthesis: None,
            created_at: Utc::now(),
            completed_at: None,
            max_duration_ms: config.board.meetings.max_duration_ms,
            max_turns_per_agent: config.board.meetings.max_turns_per_agent,
        }
    }
}

/// Shared progress of async meetings, keyed by meeting id.
type Tracker = Arc<Mutex<HashMap<String, AsyncMeetingState>>>;

struct AsyncMeetingState {
    meeting: BoardMeeting,
    remaining: Vec<String>,
    /// Wall-clock budget; specialists still running past it cancel the
    /// meeting instead of reaching synthesis.
    deadline: DateTime<Utc>,
}

pub struct MeetingRunner {
    config: Arc<Config>,
    turns: Arc<TurnRunner>,
    tasks: Arc<TaskRunner>,
    memory: Arc<AgentMemory>,
    tracker: Tracker,
}

impl MeetingRunner {
    pub fn new(
        config: Arc<Config>,
        turns: Arc<TurnRunner>,
        tasks: Arc<TaskRunner>,
        memory: Arc<AgentMemory>,
        sink: Arc<dyn ChannelSink>,
    ) -> Self {
        let tracker: Tracker = Arc::new(Mutex::new(HashMap::new()));
        // The completion hook lets the task runner call back into meeting
        // progress without depending on this crate.
        tasks.hooks().register(
            "board_meeting",
            Arc::new(MeetingHook {
                config: config.clone(),
                turns: turns.clone(),
                sink,
                tracker: tracker.clone(),
            }),
        );
        Self {
            config,
            turns,
            tasks,
            memory,
            tracker,
        }
    }

    /// Snapshot of an async meeting's current state.
    pub fn meeting(&self, id: &str) -> Option<BoardMeeting> {
        self.tracker
            .lock()
            .unwrap()
            .get(id)
            .map(|s| s.meeting.clone())
    }

    /// Ids of every tracked async meeting.
    pub fn meeting_ids(&self) -> Vec<String> {
        self.tracker.lock().unwrap().keys().cloned().collect()
    }

    /// Run a meeting to completion: specialists in parallel, then
    /// synthesis.  Individual failures and timeouts do not stop the
    /// meeting; the synthesis prompt lists them as failed.
    ///
    /// Status on the way out: `Cancelled` when the specialist round blows
    /// the whole `max_duration_ms` budget (synthesis never attempted),
    /// `Failed` when synthesis itself errors or times out, `Completed`
    /// otherwise.
    pub async fn execute_meeting(&self, topic: &str) -> anyhow::Result<BoardMeeting> {
        let mut meeting = BoardMeeting::new(topic, &self.config);
        if !self.config.board.meetings.enabled {
            anyhow::bail!("board meetings are disabled");
        }
        info!(meeting = %meeting.id, %topic, "board meeting starting");
        meeting.status = MeetingStatus::InProgress;
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(meeting.max_duration_ms);

        // Each specialist is individually bounded by the consultation
        // timeout (fail-individual); the round as a whole by the meeting
        // budget.
        let per_agent = Duration::from_millis(self.config.board.consultation.timeout_ms);
        let mut set: JoinSet<(BoardRole, Option<String>)> = JoinSet::new();
        for role in SPECIALISTS {
            let turns = self.turns.clone();
            let config = self.config.clone();
            let memory = self.memory.clone();
            let topic = topic.to_string();
            let meeting_id = meeting.id.clone();
            set.spawn(async move {
                let outcome = tokio::time::timeout(
                    per_agent,
                    run_specialist_turn(&config, &turns, &memory, role, &topic, &meeting_id),
                )
                .await;
                match outcome {
                    Ok(Ok(text)) => (role, Some(text)),
                    Ok(Err(e)) => {
                        warn!(%role, error = %e, "specialist failed; meeting continues");
                        (role, None)
                    }
                    Err(_) => {
                        warn!(%role, "specialist timed out; meeting continues");
                        (role, None)
                    }
                }
            });
        }

        let mut by_role: HashMap<BoardRole, Option<String>> = HashMap::new();
        let round_complete = tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => false,
            _ = async {
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok((role, text)) => {
                            by_role.insert(role, text);
                        }
                        Err(e) => warn!(error = %e, "specialist task panicked; meeting continues"),
                    }
                }
            } => true,
        };
        meeting.inputs = SPECIALISTS
            .iter()
            .map(|role| SpecialistInput {
                role: *role,
                text: by_role.get(role).cloned().flatten(),
            })
            .collect();

        if !round_complete {
            // Budget exhausted before synthesis was ever attempted.
            warn!(meeting = %meeting.id, "meeting budget exhausted before synthesis");
            meeting.status = MeetingStatus::Cancelled;
            meeting.completed_at = Some(Utc::now());
            return Ok(meeting);
        }

        meeting.status = MeetingStatus::Synthesizing;
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let synthesis = tokio::time::timeout(
            remaining,
            synthesise(&self.config, &self.turns, &meeting.id, topic, &meeting.inputs),
        )
        .await;
        match synthesis {
            Ok(Ok(text)) => {
                meeting.synthesis = Some(text);
                meeting.status = MeetingStatus::Completed;
            }
            Ok(Err(e)) => {
                warn!(meeting = %meeting.id, error = %e, "synthesis failed");
                meeting.status = MeetingStatus::Failed;
            }
            Err(_) => {
                warn!(meeting = %meeting.id, "synthesis timed out");
                meeting.status = MeetingStatus::Failed;
            }
        }
        meeting.completed_at = Some(Utc::now());
        Ok(meeting)
    }

    /// Start a meeting whose specialists run as autonomous tasks.
    ///
    /// Returns immediately with the in-progress meeting; synthesis fires
    /// from the task-completion hook once all five specialist tasks
    /// terminate.  Progress reports flow to each specialist's topic.
    pub async fn execute_async_meeting(&self, topic: &str) -> anyhow::Result<BoardMeeting> {
        if !self.config.board.meetings.enabled {
            anyhow::bail!("board meetings are disabled");
        }
        let mut meeting = BoardMeeting::new(topic, &self.config);
        meeting.status = MeetingStatus::InProgress;
        info!(meeting = %meeting.id, %topic, "async board meeting starting");

        self.tracker.lock().unwrap().insert(
            meeting.id.clone(),
            AsyncMeetingState {
                deadline: meeting.created_at
                    + chrono::Duration::milliseconds(meeting.max_duration_ms as i64),
                meeting: meeting.clone(),
                remaining: SPECIALISTS.iter().map(|r| r.as_str().to_string()).collect(),
            },
        );

        for role in SPECIALISTS {
            let memory_block = self.memory.format_for_prompt(role.as_str());
            let system_prompt =
                compose_system_prompt(&self.config.board, role, memory_block.as_deref(), None);
            let agent_cfg = agent_config_for(&self.config.board, role);

            let mut task = Task::new(
                format!("Board meeting input: {topic}"),
                role.as_str(),
                SessionKey::new(format!("board:{role}:meeting:{}", meeting.id)),
                vec![TaskStep::new(
                    format!("{} assessment", role.display_name()),
                    specialist_prompt(topic, role),
                )],
            )
            .with_meeting(meeting.id.clone())
            .with_system_prompt(system_prompt);
            if let Some(model) = agent_cfg.and_then(|a| a.model.clone()) {
                task = task.with_model_override(model);
            }
            if let (Some(group), Some(topic_id)) = (
                self.config.board.group_id.clone(),
                agent_cfg.and_then(|a| a.topic_id.clone()),
            ) {
                task = task.with_report_target("board", group, Some(topic_id));
            }
            task.step_interval_ms = self.config.tasks.default_step_interval_ms;
            let (_id, _handle) = self.tasks.spawn(task);
        }
        Ok(meeting)
    }
}

/// Hook invoked by the task runner for every terminal task; drives async
/// meetings forward and fires synthesis when the last specialist is done.
struct MeetingHook {
    config: Arc<Config>,
    turns: Arc<TurnRunner>,
    sink: Arc<dyn ChannelSink>,
    tracker: Tracker,
}

#[async_trait]
impl TaskCompletionHook for MeetingHook {
    async fn on_task_complete(&self, task: &Task) {
        let Some(meeting_id) = &task.meeting_id else {
            return;
        };
        let Ok(role) = task.agent_role.parse::<BoardRole>() else {
            return;
        };

        let ready = {
            let mut tracker = self.tracker.lock().unwrap();
            let Some(state) = tracker.get_mut(meeting_id) else {
                return;
            };
            let text = if task.state == TaskState::Completed {
                task.final_result().map(str::to_string)
            } else {
                None
            };
            state.meeting.inputs.push(SpecialistInput { role, text });
            state.remaining.retain(|r| r != role.as_str());
            debug!(
                meeting = %meeting_id,
                %role,
                remaining = state.remaining.len(),
                "specialist task finished"
            );
            if !state.remaining.is_empty() {
                None
            } else if Utc::now() > state.deadline {
                // The round outlived the meeting budget; synthesis is
                // never attempted.
                warn!(meeting = %meeting_id, "meeting budget exhausted before synthesis");
                state.meeting.status = MeetingStatus::Cancelled;
                state.meeting.completed_at = Some(Utc::now());
                None
            } else {
                state.meeting.status = MeetingStatus::Synthesizing;
                Some((state.meeting.topic.clone(), state.meeting.inputs.clone()))
            }
        };

        let Some((topic, inputs)) = ready else {
            return;
        };
        let synthesis = synthesise(&self.config, &self.turns, meeting_id, &topic, &inputs).await;
        let mut tracker = self.tracker.lock().unwrap();
        let Some(state) = tracker.get_mut(meeting_id) else {
            return;
        };
        match synthesis {
            Ok(text) => {
                state.meeting.synthesis = Some(text.clone());
                state.meeting.status = MeetingStatus::Completed;
                state.meeting.completed_at = Some(Utc::now());
                if let Some(group) = &self.config.board.group_id {
                    let msg = OutboundMessage::new(
                        "board",
                        group,
                        format!("🏛️ Board meeting concluded: {topic}\n\n{text}"),
                    );
                    let sink = self.sink.clone();
                    tokio::spawn(async move {
                        if let Err(e) = sink.send(msg).await {
                            warn!(error = %e, "meeting summary delivery failed");
                        }
                    });
                }
            }
            Err(e) => {
                warn!(meeting = %meeting_id, error = %e, "async synthesis failed");
                state.meeting.status = MeetingStatus::Failed;
                state.meeting.completed_at = Some(Utc::now());
            }
        }
    }
}

fn specialist_prompt(topic: &str, role: BoardRole) -> String {
    format!(
        "The board is meeting on the following topic:\n\n{topic}\n\n\
         Give your assessment strictly from the {} perspective. State your \
         recommendation, the key risks you see, and what you would need to \
         change your mind.",
        role.display_name()
    )
}

/// Run one specialist as a direct turn (sync meetings).
async fn run_specialist_turn(
    config: &Arc<Config>,
    turns: &Arc<TurnRunner>,
    memory: &Arc<AgentMemory>,
    role: BoardRole,
    topic: &str,
    meeting_id: &str,
) -> anyhow::Result<String> {
    let model: ModelRef = agent_config_for(&config.board, role)
        .and_then(|a| a.model.clone())
        .unwrap_or_else(|| config.agents.defaults.model.clone())
        .parse()?;
    let memory_block = memory.format_for_prompt(role.as_str());
    let system_prompt = compose_system_prompt(&config.board, role, memory_block.as_deref(), None);

    let req = RunRequest::new(
        SessionKey::new(format!("board:{role}:meeting:{meeting_id}")),
        specialist_prompt(topic, role),
        &model.provider,
        &model.model,
    )
    .with_system_prompt(system_prompt);
    let (tx, _rx) = mpsc::channel::<TurnEvent>(64);
    let result = turns.run_with_fallbacks(&req, tx).await?;
    if result.is_error() {
        anyhow::bail!("{}", result.error_text());
    }
    Ok(result.reply_text())
}

/// Run the general agent over all specialist inputs to produce the final
/// recommendation.  Missing inputs are listed explicitly as failed.
async fn synthesise(
    config: &Arc<Config>,
    turns: &Arc<TurnRunner>,
    meeting_id: &str,
    topic: &str,
    inputs: &[SpecialistInput],
) -> anyhow::Result<String> {
    let mut prompt = format!(
        "The board met on the following topic:\n\n{topic}\n\n\
         The specialists reported:\n"
    );
    for input in inputs {
        prompt.push_str(&format!(
            "\n## {} {}\n",
            input.role.emoji(),
            input.role.display_name()
        ));
        match &input.text {
            Some(text) => prompt.push_str(text),
            None => prompt.push_str("(failed — no input received)"),
        }
        prompt.push('\n');
    }
    prompt.push_str(
        "\nSynthesise the board's final recommendation. Weigh the inputs, note \
         any disagreement, and end with a clear decision.",
    );

    let model: ModelRef = config.agents.defaults.model.parse()?;
    let memory_block = None;
    let system_prompt =
        compose_system_prompt(&config.board, BoardRole::General, memory_block, None);
    let req = RunRequest::new(
        SessionKey::new(format!("board:general:meeting:{meeting_id}")),
        prompt,
        &model.provider,
        &model.model,
    )
    .with_system_prompt(system_prompt);
    let (tx, _rx) = mpsc::channel::<TurnEvent>(64);
    let result = turns.run_with_fallbacks(&req, tx).await?;
    if result.is_error() {
        anyhow::bail!("{}", result.error_text());
    }
    Ok(result.reply_text())
}
