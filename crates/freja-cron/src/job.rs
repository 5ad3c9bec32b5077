// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// One instant.
    At { at: DateTime<Utc> },
    /// A repeating cron expression evaluated in `tz`.
    Cron { expr: String, tz: String },
}

impl Schedule {
    /// The next fire time strictly after `now`, or `None` when the
    /// schedule is exhausted (a past one-shot) or unparseable.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::At { at } => (*at > now).then_some(*at),
            Schedule::Cron { expr, tz } => {
                let schedule = cron::Schedule::from_str(expr).ok()?;
                let tz: chrono_tz::Tz = tz.parse().ok()?;
                schedule
                    .after(&now.with_timezone(&tz))
                    .next()
                    .map(|t| t.with_timezone(&Utc))
            }
        }
    }

    /// One-shot schedules never fire twice.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Schedule::At { .. })
    }
}

/// What the firing synthesises into the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronPayload {
    /// A normal user turn routed through the board.
    AgentTurn { message: String },
    /// A system event appended to the session log without a model call.
    SystemEvent { text: String },
}

/// How the fired payload runs relative to the scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WakeMode {
    /// Dispatch inline: the tick waits for the turn to finish before
    /// touching the next due job.
    #[default]
    Now,
    /// Dispatch detached: the turn runs in the background so one slow
    /// job cannot delay other jobs due on the same tick.
    Background,
}

/// Whether the produced reply is delivered outward or kept in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    #[default]
    Announce,
    Silent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronJobState {
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: Schedule,
    /// Session key the synthesized turn targets.
    pub session_target: String,
    #[serde(default)]
    pub wake_mode: WakeMode,
    pub payload: CronPayload,
    #[serde(default)]
    pub delivery: DeliveryPolicy,
    /// Remove the job after a one-shot fires.
    #[serde(default)]
    pub delete_after_run: bool,
    #[serde(default)]
    pub state: CronJobState,
}

impl CronJob {
    pub fn new(
        name: impl Into<String>,
        schedule: Schedule,
        session_target: impl Into<String>,
        payload: CronPayload,
    ) -> Self {
        let state = CronJobState {
            next_run_at: schedule.next_after(Utc::now()),
            last_run_at: None,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            enabled: true,
            schedule,
            session_target: session_target.into(),
            wake_mode: WakeMode::default(),
            payload,
            delivery: DeliveryPolicy::default(),
            delete_after_run: false,
            state,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.state.next_run_at.map_or(false, |t| t <= now)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
