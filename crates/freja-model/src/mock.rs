// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use crate::{driver::ChunkStream, CompletionRequest, Message, ModelDriver, Role, StreamChunk};

/// Deterministic mock driver for tests.  Echoes the last user message back
/// as the assistant response.
pub struct MockDriver {
    model: String,
}

impl MockDriver {
    pub fn named(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::named("mock-model")
    }
}

#[async_trait]
impl ModelDriver for MockDriver {
    fn provider(&self) -> &str {
        "mock"
    }
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let chunks: Vec<anyhow::Result<StreamChunk>> = vec![
            Ok(StreamChunk::TextDelta(format!("MOCK: {reply}"))),
            Ok(StreamChunk::Usage {
                input_tokens: 10,
                output_tokens: 10,
            }),
            Ok(StreamChunk::Done),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// One scripted `stream()` call.
#[derive(Debug, Clone)]
pub enum ScriptedCall {
    /// Emit these chunks.
    Chunks(Vec<StreamChunk>),
    /// Emit these chunks after an initial delay (for timeout tests).
    DelayedChunks(u64, Vec<StreamChunk>),
    /// Fail to open the stream entirely (a prompt-level error).
    OpenError(String),
}

/// A pre-scripted driver.  Each `stream()` call pops the next script from
/// the front of the queue, so tests can specify exact event sequences —
/// including open failures and tool calls — without network access.
pub struct ScriptedMockDriver {
    model: String,
    scripts: Mutex<VecDeque<ScriptedCall>>,
    /// Scripted `compact()` results; when exhausted, a canned summary is
    /// returned.  `Err` strings produce a compaction failure.
    compact_scripts: Mutex<VecDeque<Result<String, String>>>,
    /// Every `CompletionRequest` seen, in order, so tests can inspect what
    /// was sent.
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedMockDriver {
    pub fn new(scripts: Vec<ScriptedCall>) -> Self {
        Self {
            model: "mock-model".into(),
            scripts: Mutex::new(scripts.into()),
            compact_scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Queue a scripted `compact()` outcome.
    pub fn script_compact(self, result: Result<String, String>) -> Self {
        self.compact_scripts.lock().unwrap().push_back(result);
        self
    }

    /// Convenience: a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![text_call(reply)])
    }

    /// Convenience: an ordered sequence of text replies, one per call.
    pub fn texts(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(replies.into_iter().map(text_call).collect())
    }

    /// Convenience: the first call fails to open with `error`, the second
    /// succeeds with `reply`.
    pub fn fail_then_text(error: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::new(vec![ScriptedCall::OpenError(error.into()), text_call(reply)])
    }

    /// Convenience: one assistant turn containing an interleaved tool call
    /// followed by the final text.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![ScriptedCall::Chunks(vec![
            StreamChunk::ToolCall {
                index: 0,
                id: tool_id.into(),
                name: tool_name.into(),
                arguments: args_json.into(),
            },
            StreamChunk::ToolCallEnd { index: 0 },
            StreamChunk::TextDelta(final_text.into()),
            StreamChunk::Usage {
                input_tokens: 5,
                output_tokens: 5,
            },
            StreamChunk::Done,
        ])])
    }

    /// Number of `stream()` calls served so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The last request seen, if any.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

fn text_call(reply: impl Into<String>) -> ScriptedCall {
    ScriptedCall::Chunks(vec![
        StreamChunk::TextDelta(reply.into()),
        StreamChunk::Usage {
            input_tokens: 5,
            output_tokens: 5,
        },
        StreamChunk::Done,
    ])
}

#[async_trait]
impl ModelDriver for ScriptedMockDriver {
    fn provider(&self) -> &str {
        "mock"
    }
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream> {
        self.requests.lock().unwrap().push(req);
        let call = self.scripts.lock().unwrap().pop_front();
        let chunks = match call {
            None => vec![
                StreamChunk::TextDelta("[no more scripts]".into()),
                StreamChunk::Done,
            ],
            Some(ScriptedCall::OpenError(e)) => anyhow::bail!(e),
            Some(ScriptedCall::Chunks(c)) => c,
            Some(ScriptedCall::DelayedChunks(ms, c)) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                c
            }
        };
        let wrapped: Vec<anyhow::Result<StreamChunk>> = chunks.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }

    async fn compact(&self, messages: &[Message], _instructions: &str) -> anyhow::Result<String> {
        match self.compact_scripts.lock().unwrap().pop_front() {
            Some(Ok(summary)) => Ok(summary),
            Some(Err(e)) => anyhow::bail!(e),
            None => Ok(format!("Summary of {} earlier messages.", messages.len())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
