// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use freja_channels::{ChannelSink, OutboundMessage};
use freja_config::{Config, ModelRef};
use freja_core::{RunRequest, TurnEvent, TurnRunner};

use crate::{
    hooks::HookTable,
    memory::{extract_memory_entry, AgentMemory},
    task::{StepState, Task, TaskState},
};

/// Executes autonomous multi-step tasks through the turn pipeline.
///
/// Steps run strictly in order; each step's textual result is appended as
/// context to the next step's prompt.  Retries live at the turn level
/// inside the failover controller — a failing step fails the task.
pub struct TaskRunner {
    turns: Arc<TurnRunner>,
    sink: Arc<dyn ChannelSink>,
    hooks: Arc<HookTable>,
    memory: Arc<AgentMemory>,
    config: Arc<Config>,
}

impl TaskRunner {
    pub fn new(
        turns: Arc<TurnRunner>,
        sink: Arc<dyn ChannelSink>,
        hooks: Arc<HookTable>,
        memory: Arc<AgentMemory>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            turns,
            sink,
            hooks,
            memory,
            config,
        }
    }

    pub fn hooks(&self) -> &Arc<HookTable> {
        &self.hooks
    }

    pub fn memory(&self) -> &Arc<AgentMemory> {
        &self.memory
    }

    /// Run a task in the background; the handle yields the finished task.
    pub fn spawn(self: &Arc<Self>, task: Task) -> (String, tokio::task::JoinHandle<Task>) {
        let id = task.id.clone();
        let runner = self.clone();
        let handle = tokio::spawn(async move { runner.run_task(task).await });
        (id, handle)
    }

    /// Drive a task to a terminal state.
    pub async fn run_task(&self, mut task: Task) -> Task {
        info!(task = %task.name, id = %task.id, steps = task.steps.len(), "task starting");
        task.state = TaskState::Running;

        let model: ModelRef = {
            let raw = task
                .model_override
                .clone()
                .unwrap_or_else(|| self.config.agents.defaults.model.clone());
            match raw.parse() {
                Ok(m) => m,
                Err(e) => {
                    warn!(task = %task.id, error = %e, "task has an unusable model reference");
                    task.state = TaskState::Failed;
                    self.finish(&mut task, Some(format!("bad model reference: {e}")))
                        .await;
                    return task;
                }
            }
        };

        let total = task.steps.len();
        let mut context_acc = String::new();
        let mut failure: Option<String> = None;

        for i in 0..total {
            if task.abort.is_aborted() {
                task.state = TaskState::Cancelled;
                break;
            }

            task.steps[i].state = StepState::Running;
            let mut prompt = task.steps[i].prompt.clone();
            if !context_acc.is_empty() {
                prompt.push_str("\n\nResults from previous steps:\n");
                prompt.push_str(&context_acc);
            }

            let mut req = RunRequest::new(
                task.session_key.clone(),
                prompt,
                &model.provider,
                &model.model,
            )
            .with_abort(task.abort.clone());
            if let Some(sys) = &task.system_prompt {
                req = req.with_system_prompt(sys.clone());
            }

            let started = std::time::Instant::now();
            let (tx, _rx) = mpsc::channel::<TurnEvent>(64);
            let outcome = self.turns.run_with_fallbacks(&req, tx).await;
            task.steps[i].duration_ms = Some(started.elapsed().as_millis() as u64);

            match outcome {
                Ok(result) if result.meta.aborted => {
                    task.state = TaskState::Cancelled;
                    break;
                }
                Ok(result) if result.is_error() => {
                    task.steps[i].state = StepState::Failed;
                    failure = Some(result.error_text());
                    task.state = TaskState::Failed;
                    break;
                }
                Ok(result) => {
                    let text = result.reply_text();
                    context_acc.push_str(&format!(
                        "\nStep {} ({}): {}\n",
                        i + 1,
                        task.steps[i].description,
                        text
                    ));
                    task.steps[i].result = Some(text);
                    task.steps[i].state = StepState::Completed;
                }
                Err(e) => {
                    task.steps[i].state = StepState::Failed;
                    failure = Some(e.to_string());
                    task.state = TaskState::Failed;
                    break;
                }
            }

            let done = i + 1;
            if done < total && task.progress_every > 0 && done % task.progress_every == 0 {
                self.report(
                    &task,
                    format!(
                        "⏳ {}: step {done}/{total} complete — {}",
                        task.name, task.steps[i].description
                    ),
                )
                .await;
            }

            if done < total && task.step_interval_ms > 0 {
                tokio::select! {
                    biased;
                    _ = task.abort.cancelled() => {
                        task.state = TaskState::Cancelled;
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(task.step_interval_ms)) => {}
                }
            }
        }

        if !task.state.is_terminal() {
            task.state = TaskState::Completed;
        }
        self.finish(&mut task, failure).await;
        task
    }

    async fn finish(&self, task: &mut Task, failure: Option<String>) {
        match task.state {
            TaskState::Completed => {
                self.report(task, format!("✅ Task '{}' completed", task.name))
                    .await;
                if let Some(result) = task.final_result() {
                    let entry = extract_memory_entry(&task.name, &task.id, result);
                    if let Err(e) = self.memory.append(&task.agent_role, &entry) {
                        warn!(task = %task.id, error = %e, "failed to append agent memory");
                    }
                }
            }
            TaskState::Failed => {
                let detail = failure.unwrap_or_else(|| "unknown error".into());
                self.report(task, format!("❌ Task '{}' failed: {detail}", task.name))
                    .await;
            }
            TaskState::Cancelled => {
                debug!(task = %task.id, "task cancelled");
            }
            _ => {}
        }
        self.hooks.notify(task).await;
    }

    async fn report(&self, task: &Task, text: String) {
        let Some(to) = &task.report_to else {
            return;
        };
        let mut msg = OutboundMessage::new(&task.report_channel, to, text);
        if let Some(topic) = &task.report_topic_id {
            msg = msg.with_topic(topic);
        }
        if let Err(e) = self.sink.send(msg).await {
            warn!(task = %task.id, error = %e, "progress report failed");
        }
    }
}
