// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod abort;
mod attempt;
mod events;
mod failover;
mod lanes;
mod request;
mod tools;
#[cfg(test)]
mod tests;

pub use abort::AbortHandle;
pub use events::TurnEvent;
pub use failover::{FailoverError, TurnError, TurnRunner};
pub use lanes::{LaneCancelled, LaneManager};
pub use request::{
    Attempt, ClientToolCall, LastAssistant, Payload, RunMeta, RunRequest, RunResult, ToolMeta,
    FINAL_TAG,
};
pub use tools::{NullToolRuntime, StaticToolRuntime, ToolInvocation, ToolOutcome, ToolRuntime};
