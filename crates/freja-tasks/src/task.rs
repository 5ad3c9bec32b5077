// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use freja_core::AbortHandle;
use freja_session::SessionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One prompt in an autonomous plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub description: String,
    pub prompt: String,
    pub result: Option<String>,
    pub duration_ms: Option<u64>,
    pub state: StepState,
}

impl TaskStep {
    pub fn new(description: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            prompt: prompt.into(),
            result: None,
            duration_ms: None,
            state: StepState::Pending,
        }
    }
}

/// A multi-step autonomous plan executed as a sequence of turns.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    /// Board role this task acts as; owns the memory the result lands in.
    pub agent_role: String,
    pub steps: Vec<TaskStep>,
    pub session_key: SessionKey,
    pub system_prompt: Option<String>,
    /// `<provider>/<model>` override; defaults come from config.
    pub model_override: Option<String>,
    /// Where progress reports go.
    pub report_channel: String,
    pub report_to: Option<String>,
    pub report_topic_id: Option<String>,
    pub step_interval_ms: u64,
    /// Report cadence in completed steps.
    pub progress_every: usize,
    /// Set when this task is one specialist's share of a board meeting.
    pub meeting_id: Option<String>,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub abort: AbortHandle,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        agent_role: impl Into<String>,
        session_key: SessionKey,
        steps: Vec<TaskStep>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            agent_role: agent_role.into(),
            steps,
            session_key,
            system_prompt: None,
            model_override: None,
            report_channel: "cli".into(),
            report_to: None,
            report_topic_id: None,
            step_interval_ms: 0,
            progress_every: 1,
            meeting_id: None,
            state: TaskState::Queued,
            created_at: Utc::now(),
            abort: AbortHandle::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_meeting(mut self, meeting_id: impl Into<String>) -> Self {
        self.meeting_id = Some(meeting_id.into());
        self
    }

    pub fn with_report_target(
        mut self,
        channel: impl Into<String>,
        to: impl Into<String>,
        topic_id: Option<String>,
    ) -> Self {
        self.report_channel = channel.into();
        self.report_to = Some(to.into());
        self.report_topic_id = topic_id;
        self
    }

    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    /// The final step's textual result, when the task completed.
    pub fn final_result(&self) -> Option<&str> {
        self.steps.last().and_then(|s| s.result.as_deref())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
