// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Task-completion hooks.
//!
//! A small registered-callback table so collaborators (the board meeting
//! runner in particular) can react to task completion without this crate
//! depending on them.  Hooks are registered once at startup and notified
//! for every task that reaches a terminal state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::task::Task;

#[async_trait]
pub trait TaskCompletionHook: Send + Sync {
    /// Called after a task reaches a terminal state (completed, failed,
    /// or cancelled).  Implementations filter on the task's fields.
    async fn on_task_complete(&self, task: &Task);
}

#[derive(Default)]
pub struct HookTable {
    hooks: Mutex<HashMap<String, Arc<dyn TaskCompletionHook>>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a hook under `name`.
    pub fn register(&self, name: impl Into<String>, hook: Arc<dyn TaskCompletionHook>) {
        let name = name.into();
        debug!(hook = %name, "registering task completion hook");
        self.hooks.lock().unwrap().insert(name, hook);
    }

    /// Notify every registered hook about a terminal task.
    pub async fn notify(&self, task: &Task) {
        let hooks: Vec<Arc<dyn TaskCompletionHook>> =
            self.hooks.lock().unwrap().values().cloned().collect();
        for hook in hooks {
            hook.on_task_complete(task).await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
