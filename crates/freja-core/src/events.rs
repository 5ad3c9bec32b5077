// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Events emitted while a turn runs.
///
/// Consumers (messaging adapters, CLI, task runner) subscribe through an
/// mpsc channel.  Sends are awaited inline with the driver stream, so slow
/// consumers apply natural back-pressure; deliveries for one turn are in
/// stream order and the final flush precedes `Completed`.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A streamed chunk of the assistant's reply.
    PartialText(String),
    /// A streamed chunk of model reasoning.
    Reasoning(String),
    /// The model requested a tool call.
    ToolStarted { id: String, name: String },
    /// A tool call finished.
    ToolFinished {
        id: String,
        name: String,
        is_error: bool,
    },
    /// The transcript was compacted into a new branch.
    Compacted { summary: String },
    /// The controller is waiting out a rate limit.
    RateLimitWait { wait_ms: u64 },
    /// The turn finished (result follows via the run's return value).
    Completed,
    /// The turn was cancelled; partial text was preserved in the log.
    Aborted { partial_text: String },
}
