// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One driver round trip: open the stream, demultiplex chunks, dispatch
//! tool calls, and finalise the assistant message into the session log.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use freja_config::ThinkLevel;
use freja_model::{scrub, CompletionRequest, Message, ModelDriver, StreamChunk};
use freja_session::{LogEvent, SessionKey, SessionLog, SessionStore};

use crate::{
    abort::AbortHandle,
    events::TurnEvent,
    request::{Attempt, ClientToolCall, LastAssistant, ToolMeta, FINAL_TAG},
    tools::{ToolInvocation, ToolRuntime},
};

pub(crate) struct AttemptCtx<'a> {
    pub driver: &'a dyn ModelDriver,
    pub tools: &'a dyn ToolRuntime,
    pub store: &'a SessionStore,
    pub log: &'a mut SessionLog,
    pub key: &'a SessionKey,
    pub system_prompt: String,
    pub api_key: Option<String>,
    pub think_level: ThinkLevel,
    pub token_budget: Option<usize>,
    pub timeout: Option<Duration>,
    pub require_final_tag: bool,
    pub abort: AbortHandle,
    pub events: mpsc::Sender<TurnEvent>,
}

struct PendingTool {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingTool {
    fn finish(self, fallback_id: u32) -> ToolInvocation {
        // Tool arguments must resolve to a JSON object; a model that emits
        // broken JSON gets an empty object rather than a poisoned turn.
        let arguments = if self.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.args_buf).unwrap_or_else(|e| {
                warn!(tool = %self.name, error = %e, "invalid tool-call arguments; substituting {{}}");
                serde_json::Value::Object(Default::default())
            })
        };
        let id = if self.id.is_empty() {
            format!("tc_synthetic_{fallback_id}")
        } else {
            self.id
        };
        ToolInvocation {
            id,
            name: self.name,
            arguments,
        }
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Run one attempt.  Never fails as a function — every failure mode is a
/// field on the returned [`Attempt`] so the controller can classify it.
pub(crate) async fn run_attempt(ctx: AttemptCtx<'_>) -> Attempt {
    let mut attempt = Attempt {
        system_prompt_report: Some(ctx.system_prompt.clone()),
        ..Default::default()
    };
    let deadline = ctx.timeout.map(|t| Instant::now() + t);

    // Context: system prompt + active branch of the log, scrubbed of
    // provider refusal sentinels just before send.
    let mut messages = vec![Message::system(&ctx.system_prompt)];
    messages.extend(ctx.store.build_context(ctx.log, ctx.key, ctx.token_budget));
    let req = CompletionRequest {
        messages: scrub::scrub_messages(messages),
        tools: ctx.tools.schemas(),
        think_level: ctx.think_level,
        api_key: ctx.api_key.clone(),
        system_suffix: None,
        max_tokens: None,
    };

    let opened = tokio::select! {
        biased;
        _ = ctx.abort.cancelled() => {
            record_abort(ctx.log, &mut attempt, String::new(), &ctx.events).await;
            return attempt;
        }
        _ = deadline_sleep(deadline) => {
            attempt.timed_out = true;
            return attempt;
        }
        opened = ctx.driver.stream(req) => opened,
    };
    let mut stream = match opened {
        Ok(s) => s,
        Err(e) => {
            attempt.prompt_error = Some(format!("{e:#}"));
            return attempt;
        }
    };

    let mut text_buf = String::new();
    let mut pending: HashMap<u32, PendingTool> = HashMap::new();
    let mut stop_reason: Option<String> = None;
    let dcx = DispatchCtx {
        tools: ctx.tools,
        abort: ctx.abort.clone(),
        events: ctx.events.clone(),
    };

    'stream: loop {
        let next = tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => {
                record_abort(ctx.log, &mut attempt, text_buf, &ctx.events).await;
                return attempt;
            }
            _ = deadline_sleep(deadline) => {
                attempt.timed_out = true;
                return attempt;
            }
            next = stream.next() => next,
        };

        let chunk = match next {
            None => break,
            Some(Err(e)) => {
                attempt.stream_error = Some(format!("{e:#}"));
                break;
            }
            Some(Ok(c)) => c,
        };

        match chunk {
            StreamChunk::TextDelta(delta) if !delta.is_empty() => {
                text_buf.push_str(&delta);
                let _ = ctx.events.send(TurnEvent::PartialText(delta)).await;
            }
            StreamChunk::TextDelta(_) => {}
            StreamChunk::ReasoningDelta(delta) => {
                let _ = ctx.events.send(TurnEvent::Reasoning(delta)).await;
            }
            StreamChunk::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let entry = pending.entry(index).or_insert_with(|| PendingTool {
                    id: String::new(),
                    name: String::new(),
                    args_buf: String::new(),
                });
                if !id.is_empty() {
                    entry.id = id;
                }
                if !name.is_empty() {
                    entry.name = name;
                }
                entry.args_buf.push_str(&arguments);
            }
            StreamChunk::ToolCallEnd { index } => {
                if let Some(p) = pending.remove(&index) {
                    if dispatch_tool(&dcx, ctx.log, p, index, &mut attempt, deadline)
                        .await
                        .is_break()
                    {
                        break 'stream;
                    }
                }
            }
            StreamChunk::Usage {
                input_tokens,
                output_tokens,
            } => {
                attempt.usage.add(input_tokens, output_tokens);
            }
            StreamChunk::Error(e) => {
                attempt.stream_error = Some(e);
                break;
            }
            StreamChunk::Done => {
                // Flush any tool calls the driver never explicitly closed.
                let mut leftovers: Vec<(u32, PendingTool)> = pending.drain().collect();
                leftovers.sort_by_key(|(idx, _)| *idx);
                for (idx, p) in leftovers {
                    if dispatch_tool(&dcx, ctx.log, p, idx, &mut attempt, deadline)
                        .await
                        .is_break()
                    {
                        break 'stream;
                    }
                }
                break;
            }
        }
    }

    if attempt.client_tool_call.is_some() {
        stop_reason = Some("tool_calls".into());
    }

    // Only a clean attempt commits an assistant message to the log; failed
    // attempts leave the transcript exactly as their tool events wrote it.
    if !text_buf.is_empty() && attempt.succeeded() {
        let mut final_text = text_buf;
        if final_text.contains(FINAL_TAG) {
            final_text = final_text.replace(FINAL_TAG, "").trim().to_string();
        } else if ctx.require_final_tag {
            attempt.missing_final_tag = true;
        }

        let provider = ctx.driver.provider().to_string();
        let model = ctx.driver.model_id().to_string();
        if let Err(e) = ctx.log.append(LogEvent::assistant_from(
            &final_text,
            &provider,
            &model,
            Some(attempt.usage),
            stop_reason.clone(),
        )) {
            attempt.stream_error = Some(format!("session log write failed: {e:#}"));
            return attempt;
        }
        attempt.last_assistant = Some(LastAssistant {
            content: final_text.clone(),
            provider,
            model,
            usage: attempt.usage,
            stop_reason,
        });
        attempt.assistant_texts.push(final_text);
    }

    attempt
}

/// The borrow-friendly subset of [`AttemptCtx`] needed while the log is
/// mutably borrowed for tool dispatch.
struct DispatchCtx<'a> {
    tools: &'a dyn ToolRuntime,
    abort: AbortHandle,
    events: mpsc::Sender<TurnEvent>,
}

/// Dispatch one completed tool call.  Returns `Break` when the attempt
/// must stop (fatal tool error, abort, timeout, log write failure).
async fn dispatch_tool(
    ctx: &DispatchCtx<'_>,
    log: &mut SessionLog,
    pending: PendingTool,
    index: u32,
    attempt: &mut Attempt,
    deadline: Option<Instant>,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    if pending.name.is_empty() {
        warn!("dropping tool call with empty name; cannot dispatch");
        return ControlFlow::Continue(());
    }
    let invocation = pending.finish(index);

    // Client-hosted tools are surfaced, not invoked.
    if ctx.tools.is_client_hosted(&invocation.name) {
        attempt.client_tool_call = Some(ClientToolCall {
            id: invocation.id,
            name: invocation.name,
            arguments: invocation.arguments,
        });
        return ControlFlow::Continue(());
    }

    let args_json = invocation.arguments.to_string();
    if let Err(e) = log.append(LogEvent::tool_call(
        &invocation.id,
        &invocation.name,
        &args_json,
    )) {
        attempt.stream_error = Some(format!("session log write failed: {e:#}"));
        return ControlFlow::Break(());
    }
    let _ = ctx
        .events
        .send(TurnEvent::ToolStarted {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
        })
        .await;

    let outcome = tokio::select! {
        biased;
        _ = ctx.abort.cancelled() => {
            attempt.aborted = true;
            let _ = log.append(LogEvent::aborted(""));
            return ControlFlow::Break(());
        }
        _ = deadline_sleep(deadline) => {
            attempt.timed_out = true;
            return ControlFlow::Break(());
        }
        outcome = ctx.tools.invoke(&invocation, &ctx.abort) => outcome,
    };

    if let Err(e) = log.append(LogEvent::tool_result(
        &invocation.id,
        &outcome.result,
        !outcome.ok,
    )) {
        attempt.stream_error = Some(format!("session log write failed: {e:#}"));
        return ControlFlow::Break(());
    }
    let _ = ctx
        .events
        .send(TurnEvent::ToolFinished {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            is_error: !outcome.ok,
        })
        .await;

    attempt.tool_metas.push(ToolMeta {
        id: invocation.id,
        name: invocation.name.clone(),
        arguments: args_json,
        output: outcome.result.clone(),
        is_error: !outcome.ok,
    });

    if outcome.is_fatal() {
        attempt.stream_error = Some(format!(
            "tool '{}' failed fatally: {}",
            invocation.name, outcome.result
        ));
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

async fn record_abort(
    log: &mut SessionLog,
    attempt: &mut Attempt,
    partial_text: String,
    events: &mpsc::Sender<TurnEvent>,
) {
    attempt.aborted = true;
    if let Err(e) = log.append(LogEvent::aborted(&partial_text)) {
        warn!(error = %e, "failed to record abort event");
    }
    let _ = events.send(TurnEvent::Aborted { partial_text }).await;
}
