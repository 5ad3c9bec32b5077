// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-agent persistent memory.
//!
//! One JSONL file per agent role; an entry is appended when a task
//! completes.  Reads trim to the most recent N entries so prompts stay
//! bounded no matter how long an agent has been working.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

const MAX_KEY_FACTS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub timestamp: DateTime<Utc>,
    /// The task directive that produced this memory.
    pub directive: String,
    pub summary: String,
    pub key_facts: Vec<String>,
    pub task_id: String,
}

/// Distil a task's final result into a memory entry: the first paragraph
/// becomes the summary, bullet / numbered lines become key facts (capped).
pub fn extract_memory_entry(directive: &str, task_id: &str, final_result: &str) -> MemoryEntry {
    let summary = final_result
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("")
        .to_string();

    let key_facts: Vec<String> = final_result
        .lines()
        .map(str::trim)
        .filter(|l| {
            l.starts_with("- ")
                || l.starts_with("* ")
                || l.starts_with("• ")
                || l.chars().next().map_or(false, |c| c.is_ascii_digit())
                    && (l.contains(". ") || l.contains(") "))
        })
        .map(|l| {
            l.trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .to_string()
        })
        .filter(|l| !l.is_empty())
        .take(MAX_KEY_FACTS)
        .collect();

    MemoryEntry {
        timestamp: Utc::now(),
        directive: directive.to_string(),
        summary,
        key_facts,
        task_id: task_id.to_string(),
    }
}

/// JSONL-backed memory store, one file per agent role.
pub struct AgentMemory {
    dir: PathBuf,
    retention: usize,
}

impl AgentMemory {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    fn path(&self, role: &str) -> PathBuf {
        self.dir.join(format!("{role}.jsonl"))
    }

    pub fn append(&self, role: &str, entry: &MemoryEntry) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(role))
            .with_context(|| format!("opening memory for {role}"))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// The most recent entries (up to the retention limit), oldest first.
    pub fn recent(&self, role: &str) -> Vec<MemoryEntry> {
        let path = self.path(role);
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        let mut entries: Vec<MemoryEntry> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable memory entry");
                    None
                }
            })
            .collect();
        if entries.len() > self.retention {
            entries.drain(..entries.len() - self.retention);
        }
        entries
    }

    /// Memory rendered for inclusion in a system prompt, or `None` when
    /// the agent has no memory yet.
    pub fn format_for_prompt(&self, role: &str) -> Option<String> {
        let entries = self.recent(role);
        if entries.is_empty() {
            return None;
        }
        let mut out = String::from("Your memory of recent work:\n");
        for e in &entries {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                e.timestamp.format("%Y-%m-%d"),
                e.directive,
                e.summary
            ));
            for fact in &e.key_facts {
                out.push_str(&format!("  • {fact}\n"));
            }
        }
        Some(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
