// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod schema;

pub use loader::{expand_path, load};
pub use schema::{
    AgentDefaults, AgentsConfig, AuthConfig, AuthProfileConfig, BoardAgentConfig, BoardConfig,
    Config, ConsultationConfig, ContextWindowConfig, CooldownConfig, CronConfig, MeetingsConfig,
    ModelRef, RateLimitConfig, SessionsConfig, TasksConfig, ThinkLevel, ToolResultFormat,
};
