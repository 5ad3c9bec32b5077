// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so a named function is required for opt-out fields.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub cron: CronConfig,
}

// ─── Model reference ──────────────────────────────────────────────────────────

/// A `"<provider>/<model>"` reference as written in config
/// (`agents.defaults.model` and the fallback chain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl FromStr for ModelRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("model reference '{s}' must be <provider>/<model>"))?;
        if provider.is_empty() || model.is_empty() {
            anyhow::bail!("model reference '{s}' must be <provider>/<model>");
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

// ─── Agent defaults ───────────────────────────────────────────────────────────

/// Reasoning effort requested from the model.  Levels above what a model
/// supports are downgraded automatically by the run controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkLevel {
    Off,
    Minimal,
    Low,
    #[default]
    Medium,
    High,
}

impl ThinkLevel {
    /// The next lower level, or `None` when already at `Off`.
    pub fn step_down(self) -> Option<ThinkLevel> {
        match self {
            ThinkLevel::High => Some(ThinkLevel::Medium),
            ThinkLevel::Medium => Some(ThinkLevel::Low),
            ThinkLevel::Low => Some(ThinkLevel::Minimal),
            ThinkLevel::Minimal => Some(ThinkLevel::Off),
            ThinkLevel::Off => None,
        }
    }
}

impl std::fmt::Display for ThinkLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThinkLevel::Off => "off",
            ThinkLevel::Minimal => "minimal",
            ThinkLevel::Low => "low",
            ThinkLevel::Medium => "medium",
            ThinkLevel::High => "high",
        };
        write!(f, "{s}")
    }
}

/// How tool activity is rendered into the reply payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultFormat {
    /// Tool activity is not surfaced to the user at all.
    Hidden,
    /// One line per tool call (name + ok/error).
    #[default]
    Compact,
    /// Full tool output is appended to the reply.
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    /// Default driver target as `<provider>/<model>`.
    #[serde(default = "default_model")]
    pub model: String,
    /// Ordered model chain consulted when the current model raises a
    /// failover signal.  Same `<provider>/<model>` shape as `model`.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default)]
    pub thinking: ThinkLevel,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4-5".into()
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            fallbacks: Vec::new(),
            thinking: ThinkLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindowConfig {
    /// Proceed but log when the resolved model's window is below this.
    #[serde(default = "default_warn_below_tokens")]
    pub warn_below_tokens: u32,
    /// Reject the turn outright when the window is below this — retrying
    /// against an unusably small model would loop forever.
    #[serde(default = "default_hard_min_tokens")]
    pub hard_min_tokens: u32,
}

fn default_warn_below_tokens() -> u32 {
    16_000
}
fn default_hard_min_tokens() -> u32 {
    4_000
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            warn_below_tokens: default_warn_below_tokens(),
            hard_min_tokens: default_hard_min_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Wait window applied once per turn before rotating profiles.
    #[serde(default = "default_rate_limit_wait_ms")]
    pub wait_ms: u64,
}

fn default_rate_limit_wait_ms() -> u64 {
    30_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            wait_ms: default_rate_limit_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
    #[serde(default)]
    pub context_window: ContextWindowConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Wall-clock budget for a single model attempt in seconds (0 = no limit).
    /// Timed-out attempts are treated as potential rate limiting.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Number of recent events preserved verbatim when the transcript is
    /// compacted; everything older is summarised into the new branch.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    /// Token floor reserved for the model's reply when building context.
    /// Composes with `sessions.history_turn_limit` by taking the minimum
    /// resulting window.
    #[serde(default = "default_compaction_reserve_tokens")]
    pub compaction_reserve_tokens: u32,
}

fn default_attempt_timeout_secs() -> u64 {
    300
}
fn default_compaction_keep_recent() -> usize {
    6
}
fn default_compaction_reserve_tokens() -> u32 {
    2_000
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
            context_window: ContextWindowConfig::default(),
            rate_limit: RateLimitConfig::default(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            compaction_keep_recent: default_compaction_keep_recent(),
            compaction_reserve_tokens: default_compaction_reserve_tokens(),
        }
    }
}

// ─── Auth profiles ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthProfileConfig {
    pub id: String,
    pub provider: String,
    /// Name of the environment variable (or secret-store key) holding the
    /// credential.  The credential itself never appears in config or in the
    /// persisted auth store.
    pub credential_ref: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Exponential base for rate-limit cooldowns; doubles per consecutive
    /// failure with jitter, capped at `rate_limit_cap_ms`.
    #[serde(default = "default_rate_limit_base_ms")]
    pub rate_limit_base_ms: u64,
    #[serde(default = "default_rate_limit_cap_ms")]
    pub rate_limit_cap_ms: u64,
    /// Long fixed hold — a rejected credential is unlikely to recover soon.
    #[serde(default = "default_auth_hold_ms")]
    pub auth_hold_ms: u64,
    #[serde(default = "default_timeout_hold_ms")]
    pub timeout_hold_ms: u64,
    #[serde(default = "default_unknown_hold_ms")]
    pub unknown_hold_ms: u64,
}

fn default_rate_limit_base_ms() -> u64 {
    60_000
}
fn default_rate_limit_cap_ms() -> u64 {
    3_600_000
}
fn default_auth_hold_ms() -> u64 {
    21_600_000
}
fn default_timeout_hold_ms() -> u64 {
    30_000
}
fn default_unknown_hold_ms() -> u64 {
    300_000
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            rate_limit_base_ms: default_rate_limit_base_ms(),
            rate_limit_cap_ms: default_rate_limit_cap_ms(),
            auth_hold_ms: default_auth_hold_ms(),
            timeout_hold_ms: default_timeout_hold_ms(),
            unknown_hold_ms: default_unknown_hold_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub profiles: Vec<AuthProfileConfig>,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    /// Path of the durable auth store (default: `<state dir>/auth.json`).
    #[serde(default)]
    pub store_path: Option<String>,
}

// ─── Sessions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding per-session JSONL logs
    /// (default: `~/.local/share/freja/sessions`).
    #[serde(default)]
    pub root: Option<String>,
    /// Maximum number of conversation turns loaded into model context.
    #[serde(default = "default_history_turn_limit")]
    pub history_turn_limit: usize,
    /// Per-channel overrides of `history_turn_limit`, keyed by surface name
    /// (e.g. "telegram-group").
    #[serde(default)]
    pub channel_overrides: HashMap<String, usize>,
}

fn default_history_turn_limit() -> usize {
    40
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            root: None,
            history_turn_limit: default_history_turn_limit(),
            channel_overrides: HashMap::new(),
        }
    }
}

// ─── Board ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardAgentConfig {
    /// One of the six fixed roles: general, finance, research, operations,
    /// marketing, legal.
    pub role: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    /// Per-agent model override as `<provider>/<model>`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thinking_default: Option<ThinkLevel>,
    /// Group-topic id mapped to this agent (topic routing precedence 1).
    #[serde(default)]
    pub topic_id: Option<String>,
    /// Personality file in the workspace; falls back to the built-in soul.
    #[serde(default)]
    pub soul_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_consult_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_consult_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_consult_max_depth() -> u32 {
    2
}
fn default_consult_timeout_ms() -> u64 {
    120_000
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: default_consult_max_depth(),
            timeout_ms: default_consult_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_meeting_max_duration_ms")]
    pub max_duration_ms: u64,
    #[serde(default = "default_meeting_max_turns")]
    pub max_turns_per_agent: u32,
}

fn default_meeting_max_duration_ms() -> u64 {
    600_000
}
fn default_meeting_max_turns() -> u32 {
    10
}

impl Default for MeetingsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_duration_ms: default_meeting_max_duration_ms(),
            max_turns_per_agent: default_meeting_max_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Group chat the board lives in (topic routing applies there).
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub agents: Vec<BoardAgentConfig>,
    #[serde(default)]
    pub consultation: ConsultationConfig,
    #[serde(default)]
    pub meetings: MeetingsConfig,
    /// Directory of soul files (default: `<workspace>/souls`).
    #[serde(default)]
    pub souls_dir: Option<String>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_id: None,
            agents: Vec::new(),
            consultation: ConsultationConfig::default(),
            meetings: MeetingsConfig::default(),
            souls_dir: None,
        }
    }
}

// ─── Tasks & cron ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Pause between autonomous task steps.
    #[serde(default = "default_step_interval_ms")]
    pub default_step_interval_ms: u64,
    /// Progress report cadence (every N completed steps).
    #[serde(default = "default_progress_every_steps")]
    pub progress_every_steps: usize,
    /// Directory of per-agent memory files
    /// (default: `~/.local/share/freja/memory`).
    #[serde(default)]
    pub memory_dir: Option<String>,
    /// Number of most-recent memory entries retained on read.
    #[serde(default = "default_memory_retention")]
    pub memory_retention: usize,
}

fn default_step_interval_ms() -> u64 {
    2_000
}
fn default_progress_every_steps() -> usize {
    1
}
fn default_memory_retention() -> usize {
    20
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            default_step_interval_ms: default_step_interval_ms(),
            progress_every_steps: default_progress_every_steps(),
            memory_dir: None,
            memory_retention: default_memory_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    #[serde(default = "default_cron_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Path of the durable job store (default: `<state dir>/cron.json`).
    #[serde(default)]
    pub store_path: Option<String>,
}

fn default_cron_tick_interval_ms() -> u64 {
    30_000
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_cron_tick_interval_ms(),
            store_path: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
